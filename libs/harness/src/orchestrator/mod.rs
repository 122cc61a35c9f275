//! Orchestrator interface.
//!
//! The orchestrator owns the machines: it deploys services, wires relations,
//! applies configuration and runs commands and actions on units. The harness
//! only talks to it through [`Orchestrator`]:
//! - [`JujuCli`] drives a real model through the `juju` binary
//! - [`crate::sim::SimulatedOrchestrator`] is an in-memory model used by tests

mod juju;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use verity_topology::{ConfigOverlay, Endpoint, RelationSpec, ServiceSpec};

pub use juju::{JujuCli, JujuVersion};

/// Parameters passed to an action.
pub type ActionParams = serde_json::Map<String, serde_json::Value>;

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("'{command}' exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected output from '{command}': {reason}")]
    Parse { command: String, reason: String },

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("action '{action}' is not defined for {unit}")]
    UnknownAction { unit: String, action: String },

    #[error("unknown action id '{0}'")]
    UnknownActionId(String),
}

/// Workload status a unit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadState {
    Active,
    Maintenance,
    Blocked,
    Waiting,
    Error,
    Terminated,
    Unknown,
}

impl WorkloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Blocked => "blocked",
            Self::Waiting => "waiting",
            Self::Error => "error",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "maintenance" => Ok(Self::Maintenance),
            "blocked" => Ok(Self::Blocked),
            "waiting" => Ok(Self::Waiting),
            "error" => Ok(Self::Error),
            "terminated" => Ok(Self::Terminated),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown workload state '{}'", other)),
        }
    }
}

/// Observed status of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub workload: WorkloadState,

    /// Free-form workload message (e.g. `Unit is ready`).
    pub message: String,

    /// Whether the unit agent has no hooks queued or running.
    pub agent_idle: bool,

    pub public_address: Option<String>,

    pub leader: bool,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} '{}'",
            self.workload,
            if self.agent_idle { "" } else { " (executing)" },
            self.message
        )
    }
}

/// Status of every deployed service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    /// Units by service name, each map keyed by unit name.
    pub services: BTreeMap<String, BTreeMap<String, UnitStatus>>,
}

impl ModelStatus {
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn unit(&self, unit: &str) -> Option<&UnitStatus> {
        self.services.values().find_map(|units| units.get(unit))
    }

    /// Every unit across services.
    pub fn units(&self) -> impl Iterator<Item = (&str, &UnitStatus)> {
        self.services
            .values()
            .flat_map(|units| units.iter().map(|(name, status)| (name.as_str(), status)))
    }

    pub fn units_of(&self, service: &str) -> impl Iterator<Item = (&str, &UnitStatus)> {
        self.services
            .get(service)
            .into_iter()
            .flat_map(|units| units.iter().map(|(name, status)| (name.as_str(), status)))
    }
}

/// Result of a command run on a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// File metadata as reported by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub is_dir: bool,
}

/// Identifier of an enqueued action.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Aborted,
}

impl ActionState {
    /// Returns true once the action will not change state again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Observed outcome of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub id: ActionId,
    pub state: ActionState,
    pub results: BTreeMap<String, String>,
    pub message: Option<String>,
}

impl ActionOutcome {
    /// Returns true if the action ran to completion successfully.
    pub fn completed(&self) -> bool {
        self.state == ActionState::Completed
    }
}

/// Operations the harness needs from the orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Deploy a service. Deploying an already present service is a no-op.
    async fn deploy(&self, spec: &ServiceSpec) -> Result<(), OrchestratorError>;

    /// Relate two endpoints. Relating an existing pair is a no-op.
    async fn relate(&self, relation: &RelationSpec) -> Result<(), OrchestratorError>;

    /// Apply configuration to a deployed service.
    async fn configure(&self, service: &str, overlay: &ConfigOverlay) -> Result<(), OrchestratorError>;

    /// Snapshot of every unit's status.
    async fn status(&self) -> Result<ModelStatus, OrchestratorError>;

    /// Run a shell command on a unit.
    async fn run(&self, unit: &str, command: &str) -> Result<CommandOutput, OrchestratorError>;

    /// Settings `unit` publishes on its `endpoint` toward `remote`.
    ///
    /// `None` when no such relation is established yet.
    async fn relation_data(
        &self,
        unit: &str,
        endpoint: &str,
        remote: &Endpoint,
    ) -> Result<Option<BTreeMap<String, String>>, OrchestratorError>;

    async fn enqueue_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> Result<ActionId, OrchestratorError>;

    async fn action_outcome(&self, id: &ActionId) -> Result<ActionOutcome, OrchestratorError>;

    /// Stat a path on a unit. `None` when it does not exist.
    async fn stat(&self, unit: &str, path: &str) -> Result<Option<FileStat>, OrchestratorError>;

    /// Read a file on a unit. `None` when it does not exist.
    async fn read_file(&self, unit: &str, path: &str) -> Result<Option<String>, OrchestratorError>;

    /// Remove a service and its units.
    async fn remove(&self, service: &str) -> Result<(), OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(workload: WorkloadState) -> UnitStatus {
        UnitStatus {
            workload,
            message: "Unit is ready".to_string(),
            agent_idle: true,
            public_address: Some("10.5.0.10".to_string()),
            leader: false,
        }
    }

    #[test]
    fn test_model_status_lookup() {
        let mut model = ModelStatus::default();
        model.services.insert(
            "ceph-mon".to_string(),
            [
                ("ceph-mon/0".to_string(), status(WorkloadState::Active)),
                ("ceph-mon/1".to_string(), status(WorkloadState::Waiting)),
            ]
            .into_iter()
            .collect(),
        );

        assert!(model.has_service("ceph-mon"));
        assert_eq!(model.unit("ceph-mon/1").unwrap().workload, WorkloadState::Waiting);
        assert!(model.unit("ceph-osd/0").is_none());
        assert_eq!(model.units().count(), 2);
        assert_eq!(model.units_of("glance").count(), 0);
    }

    #[test]
    fn test_workload_state_parse() {
        assert_eq!("blocked".parse::<WorkloadState>().unwrap(), WorkloadState::Blocked);
        assert!("sleepy".parse::<WorkloadState>().is_err());
        assert_eq!(WorkloadState::Maintenance.to_string(), "maintenance");
    }

    #[test]
    fn test_action_state_terminal() {
        assert!(!ActionState::Pending.is_terminal());
        assert!(!ActionState::Running.is_terminal());
        assert!(ActionState::Completed.is_terminal());
        assert!(ActionState::Failed.is_terminal());
    }
}
