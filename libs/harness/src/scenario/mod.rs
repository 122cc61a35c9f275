//! Scenarios: a topology plus the ordered checks run against it.
//!
//! [`run_scenario`] is the whole pipeline: converge, authenticate, create the
//! synthetic principal, run the checks, report, and optionally tear down.

pub mod ceph_osd;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use verity_topology::Topology;

use crate::checks::{Check, CheckContext, VerificationEngine};
use crate::cloud::{CloudBackend, OpenStackRest};
use crate::config::{Backend, HarnessConfig};
use crate::driver::{DeploymentDriver, SteadyState};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::report::{Reporter, RunReport};
use crate::session::authenticate;
use crate::sim::Simulation;

/// Per-request timeout of the cloud REST client.
const REST_TIMEOUT: Duration = Duration::from_secs(60);

/// A named topology and the checks that verify it.
pub struct Scenario {
    name: String,
    topology: Topology,
    checks: Vec<Box<dyn Check>>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, topology: Topology, checks: Vec<Box<dyn Check>>) -> Self {
        Self {
            name: name.into(),
            topology,
            checks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn checks(&self) -> impl Iterator<Item = &dyn Check> {
        self.checks.iter().map(|c| c.as_ref())
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("digest", &self.topology.digest())
            .field("checks", &self.checks().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Orchestrator and cloud a run talks to.
#[derive(Clone)]
pub struct Backends {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub cloud: Arc<dyn CloudBackend>,
}

impl Backends {
    /// Real backends, or a fresh Ceph OSD simulation, as configured.
    pub fn from_config(config: &HarnessConfig) -> Self {
        match config.orchestrator.backend {
            Backend::Juju => Self {
                orchestrator: Arc::new(config.orchestrator.juju_cli()),
                cloud: Arc::new(OpenStackRest::new(REST_TIMEOUT)),
            },
            Backend::Simulated => {
                let sim = Simulation::builder()
                    .ceph_osd(config.release)
                    .admin(config.credentials.clone())
                    .build();
                Self::simulated(&sim)
            }
        }
    }

    /// Both halves of one simulated world.
    pub fn simulated(sim: &Simulation) -> Self {
        Self {
            orchestrator: Arc::new(sim.orchestrator()),
            cloud: Arc::new(sim.cloud()),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

fn driver(backends: &Backends, config: &HarnessConfig) -> DeploymentDriver {
    DeploymentDriver::new(backends.orchestrator.clone(), config.release)
        .with_wait(config.waits.convergence())
        .with_steady_state(SteadyState::default().require_idle(config.deploy.require_idle))
}

/// Deploy, verify and report one scenario.
///
/// Returns the report when every check passed or was skipped, and
/// `ChecksFailed` otherwise. Infrastructure errors end the run at once.
pub async fn run_scenario(scenario: Scenario, backends: &Backends, config: &HarnessConfig) -> Result<RunReport> {
    let Scenario { name, topology, checks } = scenario;
    let release = config.release;
    let mut reporter = Reporter::new(&name, release);
    info!(
        run_id = %reporter.run_id(),
        scenario = %name,
        release = %release,
        checks = checks.len(),
        "Starting run"
    );

    let driver = driver(backends, config);
    let cluster = driver.converge(&topology).await?;
    let admin = authenticate(&cluster, backends.cloud.clone(), &config.session()).await?;
    let principal = admin.ensure_principal(&config.principal).await?;

    let ctx = CheckContext {
        cluster: &cluster,
        admin: &admin,
        principal: Some(&principal),
        driver: &driver,
        gates: &config.gates,
    };
    let engine = VerificationEngine::new(checks).keep_going(config.run.keep_going);
    let outcome = engine.run(&ctx, &mut reporter).await;

    if config.run.teardown {
        if let Err(err) = driver.teardown(&topology).await {
            warn!(error = %err, "Teardown failed");
        }
    }

    outcome?;
    reporter.finish()
}

/// Remove every service of `scenario`'s topology.
pub async fn teardown(scenario: &Scenario, backends: &Backends, config: &HarnessConfig) -> Result<()> {
    driver(backends, config).teardown(scenario.topology()).await
}
