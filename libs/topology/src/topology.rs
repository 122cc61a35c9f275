//! Validated topology, its builder, TOML loading and content digest.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TopologyError;
use crate::overlay::ConfigOverlay;
use crate::relation::RelationSpec;
use crate::service::{ServiceSpec, StorageSpec};

/// Content digest of a topology (`sha256:<hex>`).
///
/// Used to detect whether an already-converged cluster matches a topology.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopologyDigest(String);

impl TopologyDigest {
    /// Get the digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopologyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Services plus the relations between them.
///
/// Invariant: every relation endpoint references a service in `services`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    services: BTreeMap<String, ServiceSpec>,
    relations: BTreeSet<RelationSpec>,
    #[serde(skip)]
    digest: TopologyDigest,
}

/// Canonical form hashed into the digest.
///
/// Maps are ordered, so the JSON form is canonical without extra sorting.
#[derive(Serialize)]
struct Canonical<'a> {
    services: &'a BTreeMap<String, ServiceSpec>,
    relations: &'a BTreeSet<RelationSpec>,
}

fn digest_of(
    services: &BTreeMap<String, ServiceSpec>,
    relations: &BTreeSet<RelationSpec>,
) -> Result<TopologyDigest, TopologyError> {
    let canonical = serde_json::to_vec(&Canonical { services, relations })?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(TopologyDigest(format!("sha256:{}", hex::encode(hasher.finalize()))))
}

impl Topology {
    /// Start building a topology.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// All services in name order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.values()
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    /// All relations in normalized order.
    pub fn relations(&self) -> impl Iterator<Item = &RelationSpec> {
        self.relations.iter()
    }

    /// Relations one side of which belongs to `service`.
    pub fn relations_of<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a RelationSpec> {
        self.relations.iter().filter(move |r| r.involves(service))
    }

    /// Returns true if the relation is part of this topology.
    pub fn has_relation(&self, relation: &RelationSpec) -> bool {
        self.relations.contains(relation)
    }

    /// Total number of units across services.
    pub fn unit_count(&self) -> u32 {
        self.services.values().map(|s| s.units).sum()
    }

    /// Deterministic content digest, computed when the topology is built.
    pub fn digest(&self) -> TopologyDigest {
        self.digest.clone()
    }

    /// Parse a topology from TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, TopologyError> {
        let file: TopologyFile = toml::from_str(contents)?;
        let mut builder = Topology::builder();

        for (name, entry) in file.services {
            let mut spec = ServiceSpec::new(&name).units(entry.units);
            if let Some(charm) = entry.charm {
                spec = spec.charm(charm);
            }
            for (storage_name, directive) in entry.storage {
                spec = spec.storage(storage_name, directive.parse::<StorageSpec>()?);
            }
            let mut overlay = ConfigOverlay::new();
            for (key, value) in entry.config {
                let value = scalar_to_string(&value).ok_or_else(|| {
                    TopologyError::InvalidConfigValue {
                        service: name.clone(),
                        key: key.clone(),
                        reason: format!("expected a scalar, got {}", value.type_str()),
                    }
                })?;
                overlay.insert(key, value);
            }
            builder = builder.service(spec.config(overlay));
        }

        for (a, b) in file.relations {
            builder = builder.relate(a, b);
        }

        builder.build()
    }

    /// Read and parse a topology file.
    pub fn from_path(path: &Path) -> Result<Self, TopologyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Collects services, relations and overlays, validating on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    services: Vec<ServiceSpec>,
    relations: Vec<(String, String)>,
    overlays: Vec<(String, ConfigOverlay)>,
}

impl TopologyBuilder {
    /// Add a service.
    pub fn service(mut self, spec: ServiceSpec) -> Self {
        self.services.push(spec);
        self
    }

    /// Add a relation between two `service:endpoint` tokens.
    pub fn relate(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.relations.push((a.into(), b.into()));
        self
    }

    /// Layer configuration on top of a service's own overlay.
    pub fn configure(mut self, service: impl Into<String>, overlay: ConfigOverlay) -> Self {
        self.overlays.push((service.into(), overlay));
        self
    }

    /// Validate invariants and produce the topology.
    pub fn build(self) -> Result<Topology, TopologyError> {
        let mut services = BTreeMap::new();
        for spec in self.services {
            spec.validate()?;
            if services.contains_key(&spec.name) {
                return Err(TopologyError::DuplicateService(spec.name));
            }
            services.insert(spec.name.clone(), spec);
        }

        for (target, overlay) in self.overlays {
            let Some(spec) = services.get_mut(&target) else {
                return Err(TopologyError::UnknownOverlayTarget(target));
            };
            spec.config = overlay.merged_over(&spec.config);
        }

        let mut relations = BTreeSet::new();
        for (a, b) in self.relations {
            let relation = RelationSpec::parse(&a, &b)?;
            let (first, second) = relation.endpoints();
            for endpoint in [first, second] {
                if !services.contains_key(endpoint.service()) {
                    return Err(TopologyError::UnknownService {
                        relation: relation.to_string(),
                        service: endpoint.service().to_string(),
                    });
                }
            }
            // Relating an existing pair again is a no-op.
            relations.insert(relation);
        }

        let digest = digest_of(&services, &relations)?;
        Ok(Topology {
            services,
            relations,
            digest,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TopologyFile {
    #[serde(default)]
    relations: Vec<(String, String)>,

    #[serde(default)]
    services: BTreeMap<String, ServiceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceEntry {
    #[serde(default)]
    charm: Option<String>,

    #[serde(default = "default_units")]
    units: u32,

    #[serde(default)]
    storage: BTreeMap<String, String>,

    #[serde(default)]
    config: BTreeMap<String, toml::Value>,
}

fn default_units() -> u32 {
    1
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEPH_TOML: &str = r#"
relations = [
    ["ceph-osd:mon", "ceph-mon:osd"],
    ["ceph-mon:osd", "ceph-osd:mon"],
]

[services.ceph-mon]
units = 3
config = { monitor-count = 3, auth-supported = "none" }

[services.ceph-osd]
units = 3
storage = { osd-devices = "cinder,10G" }
config = { osd-devices = "/srv/ceph /dev/test-non-existent" }
"#;

    #[test]
    fn test_from_toml() {
        let topology = Topology::from_toml_str(CEPH_TOML).unwrap();

        assert_eq!(topology.services().count(), 2);
        assert_eq!(topology.unit_count(), 6);
        // Duplicate relation collapses.
        assert_eq!(topology.relations().count(), 1);

        let mon = topology.service("ceph-mon").unwrap();
        assert_eq!(mon.config.get("monitor-count"), Some("3"));

        let osd = topology.service("ceph-osd").unwrap();
        assert_eq!(osd.storage["osd-devices"].pool, "cinder");
    }

    #[test]
    fn test_unknown_service_rejected() {
        let err = Topology::builder()
            .service(ServiceSpec::new("ceph-osd").units(3))
            .relate("ceph-osd:mon", "ceph-mon:osd")
            .build()
            .unwrap_err();

        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("'ceph-mon'"));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let err = Topology::builder()
            .service(ServiceSpec::new("glance"))
            .service(ServiceSpec::new("glance"))
            .build()
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateService(s) if s == "glance"));
    }

    #[test]
    fn test_overlay_merges_over_service_config() {
        let topology = Topology::builder()
            .service(ServiceSpec::new("cinder").config(ConfigOverlay::new().with("block-device", "sdb")))
            .configure("cinder", ConfigOverlay::new().with("block-device", "None"))
            .build()
            .unwrap();
        assert_eq!(
            topology.service("cinder").unwrap().config.get("block-device"),
            Some("None")
        );

        let err = Topology::builder()
            .configure("nova", ConfigOverlay::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, TopologyError::UnknownOverlayTarget(_)));
    }

    #[test]
    fn test_digest_ignores_declaration_order() {
        let a = Topology::builder()
            .service(ServiceSpec::new("glance"))
            .service(ServiceSpec::new("keystone"))
            .relate("glance:identity-service", "keystone:identity-service")
            .build()
            .unwrap();
        let b = Topology::builder()
            .service(ServiceSpec::new("keystone"))
            .service(ServiceSpec::new("glance"))
            .relate("keystone:identity-service", "glance:identity-service")
            .build()
            .unwrap();

        assert_eq!(a.digest(), b.digest());
        assert!(a.digest().as_str().starts_with("sha256:"));

        let c = Topology::builder()
            .service(ServiceSpec::new("keystone").units(2))
            .service(ServiceSpec::new("glance"))
            .build()
            .unwrap();
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_digest_matches_canonical_form() {
        let topology = Topology::builder()
            .service(ServiceSpec::new("ceph-mon").units(3))
            .service(ServiceSpec::new("ceph-osd").units(3))
            .relate("ceph-osd:mon", "ceph-mon:osd")
            .build()
            .unwrap();

        let recomputed = digest_of(&topology.services, &topology.relations).unwrap();
        assert_eq!(topology.digest(), recomputed);

        let json = serde_json::to_value(&topology).unwrap();
        assert!(json.get("digest").is_none());
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_non_scalar_config_rejected() {
        let err = Topology::from_toml_str(
            r#"
[services.keystone]
config = { admin-roles = ["Admin"] }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, TopologyError::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.toml");
        std::fs::write(&path, CEPH_TOML).unwrap();

        let topology = Topology::from_path(&path).unwrap();
        assert_eq!(topology.unit_count(), 6);

        let missing = Topology::from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, TopologyError::Io { .. }));
    }
}
