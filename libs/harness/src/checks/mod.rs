//! Verification engine and check families.
//!
//! A [`Check`] observes a converged cluster (and, for mutation checks,
//! drives it through the [`DeploymentDriver`]) and either passes or fails
//! with a literal expected-vs-actual message. The [`VerificationEngine`]
//! runs checks in the order given, consulting the gate table for skips.
//!
//! Failures come in two kinds:
//! - [`CheckFailure::Assertion`]: recorded, and the run stops (fail-fast)
//!   unless `keep_going` is set
//! - [`CheckFailure::Infrastructure`]: the run is aborted with the error

mod actions;
mod commands;
mod config_files;
mod file_appearance;
mod pools;
mod principal;
mod processes;
mod relations;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};
use verity_expect::{Expected, SectionExpectations};

use crate::cloud::CloudError;
use crate::cluster::ConvergedCluster;
use crate::driver::DeploymentDriver;
use crate::error::{HarnessError, Result};
use crate::gates::GateTable;
use crate::orchestrator::OrchestratorError;
use crate::release::Release;
use crate::report::{CheckFamily, CheckResult, Reporter};
use crate::session::{AdminSession, ScopedSession};

pub use actions::{ActionCall, ActionScript, ActionStep, ActionTarget, Expectation};
pub use commands::CommandCheck;
pub use config_files::ConfigFileCheck;
pub use file_appearance::FileAppearanceCheck;
pub use pools::{PoolConsistencyCheck, PoolResource, PoolSampleCheck};
pub use principal::PrincipalIsolationCheck;
pub use processes::{ProcessCheck, ServiceCheck};
pub use relations::RelationCheck;

/// Why a check did not pass.
#[derive(Debug, Error)]
pub enum CheckFailure {
    /// Observed state differs from the expectation.
    #[error("{0}")]
    Assertion(String),

    /// The check could not observe the cluster at all.
    #[error(transparent)]
    Infrastructure(#[from] HarnessError),
}

impl CheckFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }
}

impl From<OrchestratorError> for CheckFailure {
    fn from(err: OrchestratorError) -> Self {
        Self::Infrastructure(HarnessError::Orchestrator(err))
    }
}

impl From<CloudError> for CheckFailure {
    fn from(err: CloudError) -> Self {
        Self::Infrastructure(HarnessError::Cloud(err))
    }
}

/// Fail with every message joined, or pass when there are none.
pub(crate) fn all_of(messages: Vec<String>) -> std::result::Result<(), CheckFailure> {
    if messages.is_empty() {
        Ok(())
    } else {
        Err(CheckFailure::Assertion(messages.join("; ")))
    }
}

/// What a check may look at and act through.
pub struct CheckContext<'a> {
    pub cluster: &'a ConvergedCluster,
    pub admin: &'a AdminSession,
    /// Session of the synthetic principal, when one was created.
    pub principal: Option<&'a ScopedSession>,
    pub driver: &'a DeploymentDriver,
    pub gates: &'a GateTable,
}

impl CheckContext<'_> {
    pub fn release(&self) -> Release {
        self.cluster.release()
    }
}

/// One verification step.
#[async_trait]
pub trait Check: Send + Sync {
    /// Name used in reports and gate lookups.
    fn name(&self) -> &str;

    fn family(&self) -> CheckFamily;

    async fn run(&self, ctx: &CheckContext<'_>) -> std::result::Result<(), CheckFailure>;
}

/// An expected value, known up front or read from the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedValue {
    Is(Expected),

    /// Whatever `leader-get <key>` prints on `unit`.
    LeaderGet { unit: String, key: String },
}

impl ExpectedValue {
    pub fn leader_get(unit: impl Into<String>, key: impl Into<String>) -> Self {
        Self::LeaderGet {
            unit: unit.into(),
            key: key.into(),
        }
    }

    pub async fn resolve(&self, cluster: &ConvergedCluster) -> std::result::Result<Expected, CheckFailure> {
        match self {
            Self::Is(expected) => Ok(expected.clone()),
            Self::LeaderGet { unit, key } => {
                let value = cluster.unit(unit)?.leader_get(key).await?;
                Ok(Expected::Literal(value))
            }
        }
    }
}

impl From<Expected> for ExpectedValue {
    fn from(expected: Expected) -> Self {
        Self::Is(expected)
    }
}

impl From<&str> for ExpectedValue {
    fn from(value: &str) -> Self {
        Self::Is(Expected::literal(value))
    }
}

/// Flat expectations (relation data bags).
pub type ValueExpectations = BTreeMap<String, ExpectedValue>;

/// `section -> key -> value` expectations (config files).
pub type SectionValueExpectations = BTreeMap<String, ValueExpectations>;

pub(crate) async fn resolve_bag(
    cluster: &ConvergedCluster,
    expected: &ValueExpectations,
) -> std::result::Result<BTreeMap<String, Expected>, CheckFailure> {
    let mut resolved = BTreeMap::new();
    for (key, value) in expected {
        resolved.insert(key.clone(), value.resolve(cluster).await?);
    }
    Ok(resolved)
}

pub(crate) async fn resolve_sections(
    cluster: &ConvergedCluster,
    expected: &SectionValueExpectations,
) -> std::result::Result<SectionExpectations, CheckFailure> {
    let mut resolved = BTreeMap::new();
    for (section, pairs) in expected {
        resolved.insert(section.clone(), resolve_bag(cluster, pairs).await?);
    }
    Ok(resolved)
}

/// Runs checks in order and records their results.
pub struct VerificationEngine {
    checks: Vec<Box<dyn Check>>,
    keep_going: bool,
}

impl VerificationEngine {
    pub fn new(checks: Vec<Box<dyn Check>>) -> Self {
        Self {
            checks,
            keep_going: false,
        }
    }

    /// Run every check even after a failure.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn checks(&self) -> impl Iterator<Item = &dyn Check> {
        self.checks.iter().map(|c| c.as_ref())
    }

    /// Run the checks, recording every result in `reporter`.
    ///
    /// Only infrastructure errors are returned; assertion failures end up in
    /// the reporter.
    pub async fn run(&self, ctx: &CheckContext<'_>, reporter: &mut Reporter) -> Result<()> {
        let release = ctx.release();

        for check in &self.checks {
            if let Some(reason) = ctx.gates.skip_reason(check.name(), release) {
                reporter.record(CheckResult::skipped(check.name(), check.family(), reason));
                continue;
            }

            info!(check = check.name(), family = %check.family(), "Running check");
            let started = Instant::now();
            match check.run(ctx).await {
                Ok(()) => {
                    reporter.record(CheckResult::passed(check.name(), check.family(), started.elapsed()));
                }
                Err(CheckFailure::Assertion(message)) => {
                    reporter.record(CheckResult::failed(
                        check.name(),
                        check.family(),
                        message,
                        started.elapsed(),
                    ));
                    if !self.keep_going {
                        warn!(check = check.name(), "Stopping after first failure");
                        break;
                    }
                }
                Err(CheckFailure::Infrastructure(err)) => {
                    error!(check = check.name(), error = %err, "Check aborted the run");
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for VerificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine")
            .field("checks", &self.checks().map(|c| c.name()).collect::<Vec<_>>())
            .field("keep_going", &self.keep_going)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::gates::Gate;
    use testing::ceph_world;

    struct Fixed {
        name: &'static str,
        outcome: fn() -> std::result::Result<(), CheckFailure>,
        runs: AtomicU32,
    }

    impl Fixed {
        fn boxed(name: &'static str, outcome: fn() -> std::result::Result<(), CheckFailure>) -> Box<dyn Check> {
            Box::new(Self {
                name,
                outcome,
                runs: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Check for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn family(&self) -> CheckFamily {
            CheckFamily::Command
        }

        async fn run(&self, _ctx: &CheckContext<'_>) -> std::result::Result<(), CheckFailure> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn pass() -> std::result::Result<(), CheckFailure> {
        Ok(())
    }

    fn fail() -> std::result::Result<(), CheckFailure> {
        Err(CheckFailure::assertion("1 != expected 2"))
    }

    fn broken() -> std::result::Result<(), CheckFailure> {
        Err(HarnessError::Provisioning("unit vanished".to_string()).into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_after_first_failure() {
        let world = ceph_world(Release::XenialQueens).await;
        let engine = VerificationEngine::new(vec![
            Fixed::boxed("first", pass),
            Fixed::boxed("second", fail),
            Fixed::boxed("third", pass),
        ]);
        let mut reporter = Reporter::new("test", Release::XenialQueens);

        engine.run(&world.ctx(), &mut reporter).await.unwrap();
        let names: Vec<&str> = reporter.results().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_going_runs_everything() {
        let world = ceph_world(Release::XenialQueens).await;
        let engine = VerificationEngine::new(vec![
            Fixed::boxed("first", fail),
            Fixed::boxed("second", fail),
            Fixed::boxed("third", pass),
        ])
        .keep_going(true);
        let mut reporter = Reporter::new("test", Release::XenialQueens);

        engine.run(&world.ctx(), &mut reporter).await.unwrap();
        assert_eq!(reporter.results().len(), 3);
        let HarnessError::ChecksFailed(report) = reporter.finish().unwrap_err() else {
            panic!("expected ChecksFailed");
        };
        assert_eq!(report.failures.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infrastructure_error_aborts() {
        let world = ceph_world(Release::XenialQueens).await;
        let engine = VerificationEngine::new(vec![Fixed::boxed("broken", broken), Fixed::boxed("after", pass)])
            .keep_going(true);
        let mut reporter = Reporter::new("test", Release::XenialQueens);

        let err = engine.run(&world.ctx(), &mut reporter).await.unwrap_err();
        assert!(matches!(err, HarnessError::Provisioning(_)));
        assert!(reporter.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gated_check_is_skipped() {
        let mut world = ceph_world(Release::XenialQueens).await;
        world.gates = GateTable::new(vec![Gate {
            check: "second".to_string(),
            skip_from: None,
            skip_until: None,
            reason: "not on this cloud".to_string(),
        }]);
        let engine = VerificationEngine::new(vec![Fixed::boxed("first", pass), Fixed::boxed("second", fail)]);
        let mut reporter = Reporter::new("test", Release::XenialQueens);

        engine.run(&world.ctx(), &mut reporter).await.unwrap();
        let report = reporter.finish().unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.passed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_get_resolves_fsid() {
        let world = ceph_world(Release::XenialQueens).await;
        let fsid = world
            .sim
            .mutate(|state| state.leader_settings["ceph-mon"]["fsid"].clone())
            .await;

        let resolved = ExpectedValue::leader_get("ceph-mon/0", "fsid")
            .resolve(&world.cluster)
            .await
            .unwrap();
        assert_eq!(resolved, Expected::Literal(fsid));
    }
}
