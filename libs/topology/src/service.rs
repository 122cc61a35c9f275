//! Service declarations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::overlay::ConfigOverlay;

/// Backing for one named storage request, in `pool,size[,count]` notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSpec {
    /// Storage pool the orchestrator allocates from (e.g. `cinder`).
    pub pool: String,

    /// Size with unit suffix (e.g. `10G`).
    pub size: String,

    /// Number of volumes; the orchestrator default applies when absent.
    pub count: Option<u32>,
}

impl StorageSpec {
    /// Create a storage request for a single volume.
    pub fn new(pool: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            size: size.into(),
            count: None,
        }
    }
}

impl fmt::Display for StorageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.count {
            Some(count) => write!(f, "{},{},{}", self.pool, self.size, count),
            None => write!(f, "{},{}", self.pool, self.size),
        }
    }
}

impl FromStr for StorageSpec {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TopologyError::InvalidStorage {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let (pool, size, count) = match parts.as_slice() {
            [pool, size] => (*pool, *size, None),
            [pool, size, count] => {
                let count = count
                    .parse::<u32>()
                    .map_err(|_| invalid("count is not a number"))?;
                (*pool, *size, Some(count))
            }
            _ => return Err(invalid("expected 'pool,size' or 'pool,size,count'")),
        };

        if pool.is_empty() {
            return Err(invalid("pool is empty"));
        }
        let digits = size.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        if digits.is_empty() || digits.parse::<u64>().is_err() {
            return Err(invalid("size must be a number with an optional unit suffix"));
        }

        Ok(Self {
            pool: pool.to_string(),
            size: size.to_string(),
            count,
        })
    }
}

impl Serialize for StorageSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StorageSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A service to deploy: name, unit count, storage and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    /// Service (application) name, unique within a topology.
    pub name: String,

    /// Charm or artifact to deploy; defaults to the service name.
    pub charm: String,

    /// Desired number of units.
    pub units: u32,

    /// Storage requests by storage name.
    pub storage: BTreeMap<String, StorageSpec>,

    /// Configuration overlay applied at deploy time.
    pub config: ConfigOverlay,
}

impl ServiceSpec {
    /// A single-unit service with no storage or configuration.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            charm: name.clone(),
            name,
            units: 1,
            storage: BTreeMap::new(),
            config: ConfigOverlay::new(),
        }
    }

    /// Set the charm to deploy.
    pub fn charm(mut self, charm: impl Into<String>) -> Self {
        self.charm = charm.into();
        self
    }

    /// Set the unit count.
    pub fn units(mut self, units: u32) -> Self {
        self.units = units;
        self
    }

    /// Add a storage request.
    pub fn storage(mut self, name: impl Into<String>, spec: StorageSpec) -> Self {
        self.storage.insert(name.into(), spec);
        self
    }

    /// Replace the configuration overlay.
    pub fn config(mut self, config: ConfigOverlay) -> Self {
        self.config = config;
        self
    }

    /// Unit names the orchestrator will assign (`name/0`, `name/1`, ...).
    pub fn unit_names(&self) -> Vec<String> {
        (0..self.units).map(|i| format!("{}/{}", self.name, i)).collect()
    }

    pub(crate) fn validate(&self) -> Result<(), TopologyError> {
        if self.name.is_empty()
            || self.name.contains(|c: char| c == ':' || c == '/' || c.is_whitespace())
        {
            return Err(TopologyError::InvalidServiceName(self.name.clone()));
        }
        if self.units == 0 {
            return Err(TopologyError::ZeroUnits(self.name.clone()));
        }
        Ok(())
    }
}
