//! Converged cluster and handles onto its units.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use verity_topology::{Endpoint, Topology, TopologyDigest};

use crate::action::ActionInvocation;
use crate::orchestrator::{CommandOutput, FileStat, ModelStatus, Orchestrator, OrchestratorError, UnitStatus};
use crate::release::Release;

/// A topology the orchestrator has brought to steady state.
///
/// Only [`crate::driver::DeploymentDriver::converge`] creates one, so holding
/// a cluster (and the [`UnitHandle`]s it hands out) means the units existed
/// and were steady at that point.
pub struct ConvergedCluster {
    topology: Topology,
    digest: TopologyDigest,
    release: Release,
    orchestrator: Arc<dyn Orchestrator>,
    /// Handles per service, in unit index order.
    units: BTreeMap<String, Vec<UnitHandle>>,
}

impl ConvergedCluster {
    pub(crate) fn new(
        topology: Topology,
        release: Release,
        orchestrator: Arc<dyn Orchestrator>,
        status: &ModelStatus,
    ) -> Self {
        let mut units = BTreeMap::new();
        for spec in topology.services() {
            let mut handles: Vec<UnitHandle> = status
                .units_of(&spec.name)
                .map(|(name, unit)| UnitHandle {
                    name: name.to_string(),
                    service: spec.name.clone(),
                    index: unit_index(name),
                    public_address: unit.public_address.clone(),
                    orchestrator: orchestrator.clone(),
                })
                .collect();
            handles.sort_by_key(|h| h.index);
            units.insert(spec.name.clone(), handles);
        }

        Self {
            digest: topology.digest(),
            topology,
            release,
            orchestrator,
            units,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn digest(&self) -> &TopologyDigest {
        &self.digest
    }

    pub fn release(&self) -> Release {
        self.release
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    /// Look up a unit by name (`service/N`).
    pub fn unit(&self, name: &str) -> Result<&UnitHandle, OrchestratorError> {
        self.units
            .values()
            .flatten()
            .find(|h| h.name == name)
            .ok_or_else(|| OrchestratorError::UnknownUnit(name.to_string()))
    }

    /// Units of `service` in index order.
    pub fn units_of(&self, service: &str) -> &[UnitHandle] {
        self.units.get(service).map(Vec::as_slice).unwrap_or_default()
    }

    /// All unit handles.
    pub fn units(&self) -> impl Iterator<Item = &UnitHandle> {
        self.units.values().flatten()
    }
}

impl fmt::Debug for ConvergedCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergedCluster")
            .field("digest", &self.digest)
            .field("release", &self.release)
            .field("units", &self.units().map(|u| u.name()).collect::<Vec<_>>())
            .finish()
    }
}

fn unit_index(name: &str) -> u32 {
    name.rsplit('/').next().and_then(|i| i.parse().ok()).unwrap_or(0)
}

/// One running unit.
#[derive(Clone)]
pub struct UnitHandle {
    name: String,
    service: String,
    index: u32,
    public_address: Option<String>,
    orchestrator: Arc<dyn Orchestrator>,
}

impl UnitHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn public_address(&self) -> Option<&str> {
        self.public_address.as_deref()
    }

    /// Run a shell command; non-zero exit codes are returned, not raised.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        debug!(unit = %self.name, command, "Running command");
        self.orchestrator.run(&self.name, command).await
    }

    /// Run a command that must succeed and return its trimmed stdout.
    pub async fn run_ok(&self, command: &str) -> Result<String, OrchestratorError> {
        let output = self.run(command).await?;
        if !output.success() {
            return Err(OrchestratorError::CommandFailed {
                command: format!("{} on {}", command, self.name),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    pub async fn stat(&self, path: &str) -> Result<Option<FileStat>, OrchestratorError> {
        self.orchestrator.stat(&self.name, path).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Option<String>, OrchestratorError> {
        self.orchestrator.read_file(&self.name, path).await
    }

    /// Settings this unit publishes on `endpoint` toward `remote`.
    pub async fn relation_data(
        &self,
        endpoint: &str,
        remote: &Endpoint,
    ) -> Result<Option<BTreeMap<String, String>>, OrchestratorError> {
        self.orchestrator.relation_data(&self.name, endpoint, remote).await
    }

    pub async fn status(&self) -> Result<UnitStatus, OrchestratorError> {
        let model = self.orchestrator.status().await?;
        model
            .unit(&self.name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownUnit(self.name.clone()))
    }

    /// Value the service leader published under `key`.
    pub async fn leader_get(&self, key: &str) -> Result<String, OrchestratorError> {
        self.run_ok(&format!("leader-get {}", key)).await
    }

    /// The unit's wall clock.
    pub async fn clock(&self) -> Result<DateTime<Utc>, OrchestratorError> {
        let raw = self.run_ok("date +%s").await?;
        raw.parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| OrchestratorError::Parse {
                command: "date +%s".to_string(),
                reason: format!("not a timestamp: '{}'", raw),
            })
    }

    /// Prepare an action invocation against this unit.
    pub fn action(&self, name: &str) -> ActionInvocation {
        ActionInvocation::new(self.clone(), name)
    }

    pub(crate) fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("name", &self.name)
            .field("public_address", &self.public_address)
            .finish()
    }
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimTiming, Simulation};
    use verity_topology::ServiceSpec;

    #[test]
    fn test_unit_index() {
        assert_eq!(unit_index("ceph-mon/2"), 2);
        assert_eq!(unit_index("cinder-ceph/0"), 0);
    }

    #[tokio::test]
    async fn test_handles_follow_status() {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 0,
                ..SimTiming::default()
            })
            .build();
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(sim.orchestrator());
        let topology = Topology::builder()
            .service(ServiceSpec::new("ceph-mon").units(3))
            .build()
            .unwrap();
        for spec in topology.services() {
            orchestrator.deploy(spec).await.unwrap();
        }
        let status = orchestrator.status().await.unwrap();

        let cluster = ConvergedCluster::new(topology, Release::default(), orchestrator, &status);
        let names: Vec<&str> = cluster.units_of("ceph-mon").iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["ceph-mon/0", "ceph-mon/1", "ceph-mon/2"]);
        assert!(cluster.unit("ceph-mon/1").unwrap().public_address().is_some());
        assert!(cluster.unit("ceph-osd/0").is_err());

        let unit = cluster.unit("ceph-mon/0").unwrap();
        let clock = unit.clock().await.unwrap();
        assert!(clock.timestamp() > 0);
        assert!(unit.run_ok("false-command").await.is_err());
    }
}
