//! Harness error taxonomy.
//!
//! - Infrastructure errors ([`HarnessError`] variants other than `ChecksFailed`)
//!   abort a run immediately.
//! - [`AssertionFailure`]s are collected per check and surface together as
//!   [`HarnessError::ChecksFailed`] once the run is over.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use verity_topology::TopologyError;

use crate::cloud::CloudError;
use crate::orchestrator::{OrchestratorError, UnitStatus};
use crate::report::FailureReport;

/// Result alias used across the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors surfaced by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The orchestrator refused the topology or a unit entered an error state.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Units did not reach steady state within the wait budget.
    #[error("cluster did not converge after {attempts} polls ({elapsed:?}): {}", summarize(.last))]
    ConvergenceTimeout {
        elapsed: Duration,
        attempts: u32,
        /// Last observed status of every unit in scope.
        last: BTreeMap<String, UnitStatus>,
    },

    /// Credentials or sessions were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("configuration error: {0}")]
    Config(String),

    /// One or more checks failed.
    #[error("{0}")]
    ChecksFailed(FailureReport),
}

impl HarnessError {
    /// Returns true for errors that end a run without running further checks.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::ChecksFailed(_))
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

fn summarize(last: &BTreeMap<String, UnitStatus>) -> String {
    let pending: Vec<String> = last
        .iter()
        .map(|(unit, status)| format!("{} {}", unit, status))
        .collect();
    if pending.is_empty() {
        "no units observed".to_string()
    } else {
        pending.join("; ")
    }
}

/// A single failed assertion inside a check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{check}: {message}")]
pub struct AssertionFailure {
    /// Name of the check that failed.
    pub check: String,

    /// Literal description of expected vs actual.
    pub message: String,
}

impl AssertionFailure {
    pub fn new(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            message: message.into(),
        }
    }
}
