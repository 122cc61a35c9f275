//! Ordered series/OpenStack release pairs and the behaviour that depends on them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `series-openstack` release pair, ordered chronologically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Release {
    TrustyIcehouse,
    TrustyJuno,
    TrustyKilo,
    TrustyLiberty,
    TrustyMitaka,
    XenialMitaka,
    XenialNewton,
    XenialOcata,
    XenialPike,
    #[default]
    XenialQueens,
    BionicQueens,
    BionicRocky,
    BionicStein,
    BionicTrain,
    BionicUssuri,
    FocalUssuri,
    FocalVictoria,
    FocalWallaby,
}

const NAMES: &[(Release, &str)] = &[
    (Release::TrustyIcehouse, "trusty-icehouse"),
    (Release::TrustyJuno, "trusty-juno"),
    (Release::TrustyKilo, "trusty-kilo"),
    (Release::TrustyLiberty, "trusty-liberty"),
    (Release::TrustyMitaka, "trusty-mitaka"),
    (Release::XenialMitaka, "xenial-mitaka"),
    (Release::XenialNewton, "xenial-newton"),
    (Release::XenialOcata, "xenial-ocata"),
    (Release::XenialPike, "xenial-pike"),
    (Release::XenialQueens, "xenial-queens"),
    (Release::BionicQueens, "bionic-queens"),
    (Release::BionicRocky, "bionic-rocky"),
    (Release::BionicStein, "bionic-stein"),
    (Release::BionicTrain, "bionic-train"),
    (Release::BionicUssuri, "bionic-ussuri"),
    (Release::FocalUssuri, "focal-ussuri"),
    (Release::FocalVictoria, "focal-victoria"),
    (Release::FocalWallaby, "focal-wallaby"),
];

/// Service manager on the units' operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Upstart,
    Systemd,
}

impl Release {
    /// All known releases in chronological order.
    pub fn all() -> impl Iterator<Item = Release> {
        NAMES.iter().map(|(release, _)| *release)
    }

    pub fn as_str(&self) -> &'static str {
        NAMES
            .iter()
            .find(|(release, _)| release == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }

    /// Ubuntu series half of the pair.
    pub fn series(&self) -> &'static str {
        self.as_str().split('-').next().unwrap_or_default()
    }

    /// OpenStack release half of the pair.
    pub fn openstack(&self) -> &'static str {
        self.as_str().split('-').nth(1).unwrap_or_default()
    }

    pub fn init_system(&self) -> InitSystem {
        if *self < Release::XenialMitaka {
            InitSystem::Upstart
        } else {
            InitSystem::Systemd
        }
    }

    /// Pools the storage cluster is expected to carry once clients are related.
    pub fn expected_pools(&self) -> Vec<&'static str> {
        if *self == Release::TrustyIcehouse {
            vec!["data", "metadata", "rbd", "cinder-ceph", "glance"]
        } else if (Release::TrustyKilo..=Release::XenialOcata).contains(self) {
            vec!["rbd", "cinder-ceph", "glance"]
        } else {
            vec!["cinder-ceph", "glance"]
        }
    }

    /// Section of `glance-api.conf` holding the store options.
    pub fn glance_store_section(&self) -> &'static str {
        if *self >= Release::TrustyKilo {
            "glance_store"
        } else {
            "DEFAULT"
        }
    }

    /// Name of the process serving the block-storage API.
    pub fn cinder_api_service(&self) -> &'static str {
        if *self < Release::XenialOcata {
            "cinder-api"
        } else {
            "apache2"
        }
    }

    /// Identity is served by apache2 from liberty on.
    pub fn keystone_behind_apache(&self) -> bool {
        *self >= Release::TrustyLiberty
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned for an unknown release name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown release '{0}' (expected e.g. 'xenial-queens')")]
pub struct UnknownRelease(pub String);

impl FromStr for Release {
    type Err = UnknownRelease;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(release, _)| *release)
            .ok_or_else(|| UnknownRelease(s.to_string()))
    }
}

impl Serialize for Release {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Release {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_order() {
        let mitaka: Release = "trusty-mitaka".parse().unwrap();
        let queens: Release = "xenial_queens".parse().unwrap();
        assert!(mitaka < Release::XenialMitaka);
        assert!(queens > mitaka);
        assert_eq!(queens.series(), "xenial");
        assert_eq!(queens.openstack(), "queens");
        assert!("xenial-grizzly".parse::<Release>().is_err());
    }

    #[test]
    fn test_names_cover_every_release() {
        for release in Release::all() {
            assert_eq!(release.as_str().parse::<Release>().unwrap(), release);
        }
        let ordered: Vec<Release> = Release::all().collect();
        let mut sorted = ordered.clone();
        sorted.sort();
        assert_eq!(ordered, sorted);
    }

    #[test]
    fn test_expected_pools() {
        assert_eq!(Release::TrustyIcehouse.expected_pools().len(), 5);
        assert_eq!(Release::TrustyJuno.expected_pools(), vec!["cinder-ceph", "glance"]);
        assert_eq!(
            Release::XenialOcata.expected_pools(),
            vec!["rbd", "cinder-ceph", "glance"]
        );
        assert_eq!(Release::BionicStein.expected_pools(), vec!["cinder-ceph", "glance"]);
    }

    #[test]
    fn test_release_dependent_names() {
        assert_eq!(Release::TrustyMitaka.init_system(), InitSystem::Upstart);
        assert_eq!(Release::XenialMitaka.init_system(), InitSystem::Systemd);
        assert_eq!(Release::TrustyJuno.glance_store_section(), "DEFAULT");
        assert_eq!(Release::TrustyKilo.glance_store_section(), "glance_store");
        assert_eq!(Release::XenialNewton.cinder_api_service(), "cinder-api");
        assert_eq!(Release::XenialOcata.cinder_api_service(), "apache2");
    }
}
