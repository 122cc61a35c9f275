//! # verity-harness
//!
//! Deploys a declared topology, waits for it to converge and runs ordered
//! verification checks against the live cluster.
//!
//! ## Pipeline
//!
//! 1. [`DeploymentDriver`] deploys services, adds relations and polls
//!    unit status until the cluster is steady
//! 2. [`session::authenticate`] opens an admin session against the identity
//!    service found on the cluster and creates a synthetic principal
//! 3. [`VerificationEngine`] runs the scenario's checks in order, skipping
//!    gated ones, and records every outcome in a [`Reporter`]
//! 4. The [`RunReport`] is returned, or [`HarnessError::ChecksFailed`] when any
//!    check failed
//!
//! ## Backends
//!
//! The orchestrator and the cloud API sit behind the [`Orchestrator`] and
//! [`CloudBackend`] traits. `juju` and the OpenStack REST APIs drive a real
//! model; [`sim::Simulation`] answers both in-process for tests and dry runs.

pub mod action;
pub mod checks;
pub mod cloud;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod gates;
pub mod orchestrator;
pub mod release;
pub mod report;
pub mod scenario;
pub mod session;
pub mod sim;

pub use checks::{Check, CheckContext, CheckFailure, VerificationEngine};
pub use cloud::CloudBackend;
pub use cluster::{ConvergedCluster, UnitHandle};
pub use config::HarnessConfig;
pub use driver::{DeploymentDriver, SteadyState};
pub use error::{AssertionFailure, HarnessError, Result};
pub use gates::{Gate, GateTable};
pub use orchestrator::Orchestrator;
pub use release::Release;
pub use report::{CheckResult, FailureReport, Outcome, Reporter, RunReport};
pub use scenario::{run_scenario, Backends, Scenario};
