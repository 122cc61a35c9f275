//! Error types for topology construction and loading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or loading a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// An endpoint token is not of the form `service:endpoint`.
    #[error("invalid endpoint '{token}': {reason}")]
    InvalidEndpoint { token: String, reason: &'static str },

    /// A service name is empty or contains reserved characters.
    #[error("invalid service name '{0}'")]
    InvalidServiceName(String),

    /// A relation references a service that is not part of the topology.
    #[error("relation {relation} references unknown service '{service}'")]
    UnknownService { relation: String, service: String },

    /// The same service was declared twice.
    #[error("service '{0}' declared more than once")]
    DuplicateService(String),

    /// A service asked for zero units.
    #[error("service '{0}' must request at least one unit")]
    ZeroUnits(String),

    /// Both ends of a relation belong to the same service.
    #[error("service '{0}' cannot relate to itself")]
    SelfRelation(String),

    /// A storage directive could not be parsed.
    #[error("invalid storage spec '{spec}': {reason}")]
    InvalidStorage { spec: String, reason: String },

    /// A configuration value is not a scalar.
    #[error("invalid config value for {service}.{key}: {reason}")]
    InvalidConfigValue {
        service: String,
        key: String,
        reason: String,
    },

    /// Overlay targets a service that is not part of the topology.
    #[error("config overlay targets unknown service '{0}'")]
    UnknownOverlayTarget(String),

    /// The topology file is not valid TOML.
    #[error("invalid topology TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The topology could not be encoded for its digest.
    #[error("failed to encode topology for digest: {0}")]
    Digest(#[from] serde_json::Error),

    /// The topology file could not be read.
    #[error("failed to read topology from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TopologyError {
    /// Returns true if this error is a violated structural invariant
    /// rather than a syntax problem.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TopologyError::UnknownService { .. }
                | TopologyError::DuplicateService(_)
                | TopologyError::ZeroUnits(_)
                | TopologyError::SelfRelation(_)
                | TopologyError::UnknownOverlayTarget(_)
        )
    }
}
