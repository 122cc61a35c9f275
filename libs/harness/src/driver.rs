//! Deployment driver: topology in, converged cluster out.
//!
//! Convergence runs in three steps:
//! 1. deploy every missing service (present services get their overlay applied)
//! 2. add every relation (existing relations are left alone)
//! 3. wait until the units in scope reach steady state
//!
//! A topology whose digest matches the last converged one, on a model that is
//! already steady, is returned without touching the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::{info, warn};
use verity_poll::{poll, PollError, PollPolicy, Probe};
use verity_topology::{ConfigOverlay, Topology, TopologyDigest};

use crate::cluster::ConvergedCluster;
use crate::error::{HarnessError, Result};
use crate::orchestrator::{ModelStatus, Orchestrator, UnitStatus, WorkloadState};
use crate::release::Release;

/// What "steady" means for a wait.
#[derive(Debug, Clone)]
pub struct SteadyState {
    /// Workload states accepted for services without an override.
    allowed: BTreeSet<WorkloadState>,

    /// Per-service accepted workload states.
    per_service: BTreeMap<String, BTreeSet<WorkloadState>>,

    /// Pattern the workload message must match (unanchored).
    message: Option<Regex>,

    /// Only these services are waited on, when set.
    include_only: Option<BTreeSet<String>>,

    exclude: BTreeSet<String>,

    /// Require agents to have nothing queued.
    require_idle: bool,
}

impl Default for SteadyState {
    fn default() -> Self {
        Self {
            allowed: [WorkloadState::Active].into_iter().collect(),
            per_service: BTreeMap::new(),
            message: None,
            include_only: None,
            exclude: BTreeSet::new(),
            require_idle: true,
        }
    }
}

impl SteadyState {
    /// Accept `states` for every service without an override.
    pub fn allow(mut self, states: impl IntoIterator<Item = WorkloadState>) -> Self {
        self.allowed = states.into_iter().collect();
        self
    }

    /// Accept `states` for one service.
    pub fn allow_for(
        mut self,
        service: impl Into<String>,
        states: impl IntoIterator<Item = WorkloadState>,
    ) -> Self {
        self.per_service
            .insert(service.into(), states.into_iter().collect());
        self
    }

    pub fn message(mut self, pattern: Regex) -> Self {
        self.message = Some(pattern);
        self
    }

    pub fn include_only<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_only = Some(services.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude(mut self, service: impl Into<String>) -> Self {
        self.exclude.insert(service.into());
        self
    }

    pub fn require_idle(mut self, require_idle: bool) -> Self {
        self.require_idle = require_idle;
        self
    }

    /// Returns true if `service` is waited on.
    pub fn covers(&self, service: &str) -> bool {
        !self.exclude.contains(service)
            && self
                .include_only
                .as_ref()
                .is_none_or(|only| only.contains(service))
    }

    /// Reason `unit` is not steady, if it is not.
    pub fn unsteady_reason(&self, service: &str, status: &UnitStatus) -> Option<String> {
        let allowed = self.per_service.get(service).unwrap_or(&self.allowed);
        if !allowed.contains(&status.workload) {
            return Some(format!("workload is {}", status.workload));
        }
        if self.require_idle && !status.agent_idle {
            return Some("agent is executing".to_string());
        }
        if let Some(pattern) = &self.message {
            if !pattern.is_match(&status.message) {
                return Some(format!("message '{}' does not match {}", status.message, pattern));
            }
        }
        None
    }
}

/// Outcome of one look at the model.
enum Observation {
    Steady,
    Unsteady(String),
    Failed(String),
}

fn observe(topology: &Topology, steady: &SteadyState, model: &ModelStatus) -> Observation {
    let mut waiting = Vec::new();
    for spec in topology.services().filter(|s| steady.covers(&s.name)) {
        let units: Vec<_> = model.units_of(&spec.name).collect();
        for (unit, status) in &units {
            if status.workload == WorkloadState::Error {
                return Observation::Failed(format!("{} is in error: {}", unit, status.message));
            }
            if let Some(reason) = steady.unsteady_reason(&spec.name, status) {
                waiting.push(format!("{} {}", unit, reason));
            }
        }
        if units.len() < spec.units as usize {
            waiting.push(format!(
                "{} has {}/{} units",
                spec.name,
                units.len(),
                spec.units
            ));
        }
    }

    if waiting.is_empty() {
        Observation::Steady
    } else {
        Observation::Unsteady(waiting.join("; "))
    }
}

fn in_scope(topology: &Topology, steady: &SteadyState, model: &ModelStatus) -> BTreeMap<String, UnitStatus> {
    topology
        .services()
        .filter(|s| steady.covers(&s.name))
        .flat_map(|s| model.units_of(&s.name))
        .map(|(unit, status)| (unit.to_string(), status.clone()))
        .collect()
}

/// Drives the orchestrator to a topology.
pub struct DeploymentDriver {
    orchestrator: Arc<dyn Orchestrator>,
    release: Release,
    steady: SteadyState,
    policy: PollPolicy,
    last_converged: Mutex<Option<TopologyDigest>>,
}

impl DeploymentDriver {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, release: Release) -> Self {
        Self {
            orchestrator,
            release,
            steady: SteadyState::default(),
            policy: PollPolicy::default(),
            last_converged: Mutex::new(None),
        }
    }

    /// Poll policy for convergence waits.
    pub fn with_wait(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Steady-state definition used by [`Self::converge`].
    pub fn with_steady_state(mut self, steady: SteadyState) -> Self {
        self.steady = steady;
        self
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    pub fn release(&self) -> Release {
        self.release
    }

    pub fn wait_policy(&self) -> PollPolicy {
        self.policy
    }

    fn last_digest(&self) -> Option<TopologyDigest> {
        self.last_converged
            .lock()
            .map(|digest| digest.clone())
            .unwrap_or_default()
    }

    fn record_digest(&self, digest: Option<TopologyDigest>) {
        if let Ok(mut last) = self.last_converged.lock() {
            *last = digest;
        }
    }

    /// Bring the model to `topology` and wait for steady state.
    pub async fn converge(&self, topology: &Topology) -> Result<ConvergedCluster> {
        let digest = topology.digest();

        if self.last_digest().as_ref() == Some(&digest) {
            let model = self.orchestrator.status().await?;
            if matches!(observe(topology, &self.steady, &model), Observation::Steady) {
                info!(digest = %digest, "Topology already converged");
                return Ok(ConvergedCluster::new(
                    topology.clone(),
                    self.release,
                    self.orchestrator.clone(),
                    &model,
                ));
            }
        }

        info!(
            digest = %digest,
            services = topology.services().count(),
            units = topology.unit_count(),
            release = %self.release,
            "Converging topology"
        );

        let existing = self.orchestrator.status().await?;
        for spec in topology.services() {
            if existing.has_service(&spec.name) {
                if !spec.config.is_empty() {
                    self.orchestrator
                        .configure(&spec.name, &spec.config)
                        .await
                        .map_err(|e| HarnessError::Provisioning(format!("configure {}: {}", spec.name, e)))?;
                }
                continue;
            }
            info!(service = %spec.name, charm = %spec.charm, units = spec.units, "Deploying service");
            self.orchestrator
                .deploy(spec)
                .await
                .map_err(|e| HarnessError::Provisioning(format!("deploy {}: {}", spec.name, e)))?;
        }

        for relation in topology.relations() {
            self.orchestrator
                .relate(relation)
                .await
                .map_err(|e| HarnessError::Provisioning(format!("relate {}: {}", relation, e)))?;
        }

        let model = self.wait_for(topology, &self.steady).await?;
        self.record_digest(Some(digest));
        info!(units = model.units().count(), "Topology converged");

        Ok(ConvergedCluster::new(
            topology.clone(),
            self.release,
            self.orchestrator.clone(),
            &model,
        ))
    }

    /// Wait until every unit `steady` covers is steady.
    pub async fn wait_for(&self, topology: &Topology, steady: &SteadyState) -> Result<ModelStatus> {
        let orchestrator = &self.orchestrator;
        let last: Mutex<BTreeMap<String, UnitStatus>> = Mutex::new(BTreeMap::new());
        let last_ref = &last;

        let result = poll("steady state", self.policy, move |_| async move {
            let model = orchestrator.status().await?;
            if let Ok(mut seen) = last_ref.lock() {
                *seen = in_scope(topology, steady, &model);
            }
            match observe(topology, steady, &model) {
                Observation::Steady => Ok(Probe::Ready(model)),
                Observation::Unsteady(reason) => Ok(Probe::Pending(reason)),
                Observation::Failed(reason) => Err(HarnessError::Provisioning(reason)),
            }
        })
        .await;

        match result {
            Ok(model) => Ok(model),
            Err(PollError::Aborted { source, .. }) => Err(source),
            Err(PollError::Exhausted {
                attempts, elapsed, ..
            }) => {
                let last = last.into_inner().unwrap_or_default();
                warn!(attempts, elapsed = ?elapsed, units = last.len(), "Cluster did not converge");
                Err(HarnessError::ConvergenceTimeout {
                    elapsed,
                    attempts,
                    last,
                })
            }
        }
    }

    /// Apply a configuration change to a running service.
    pub async fn reconfigure(&self, service: &str, overlay: &ConfigOverlay) -> Result<()> {
        info!(service, keys = overlay.len(), "Reconfiguring service");
        self.orchestrator.configure(service, overlay).await?;
        Ok(())
    }

    /// Remove every service of `topology`.
    pub async fn teardown(&self, topology: &Topology) -> Result<()> {
        for spec in topology.services() {
            info!(service = %spec.name, "Removing service");
            self.orchestrator.remove(&spec.name).await?;
        }
        self.record_digest(None);
        Ok(())
    }
}

impl std::fmt::Debug for DeploymentDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentDriver")
            .field("release", &self.release)
            .field("policy", &self.policy)
            .field("steady", &self.steady)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sim::{SimTiming, Simulation};
    use verity_topology::ServiceSpec;

    fn topology() -> Topology {
        Topology::builder()
            .service(ServiceSpec::new("ceph-mon").units(3))
            .service(ServiceSpec::new("glance"))
            .relate("glance:ceph", "ceph-mon:client")
            .build()
            .unwrap()
    }

    fn driver(sim: &Simulation, attempts: u32) -> DeploymentDriver {
        DeploymentDriver::new(Arc::new(sim.orchestrator()), Release::default())
            .with_wait(PollPolicy::new(Duration::from_secs(1), attempts))
    }

    #[test]
    fn test_steady_state_rules() {
        let status = UnitStatus {
            workload: WorkloadState::Blocked,
            message: "Missing relation: monitor".to_string(),
            agent_idle: true,
            public_address: None,
            leader: false,
        };

        let default = SteadyState::default();
        assert!(default.unsteady_reason("ceph-osd", &status).is_some());

        let blocked = SteadyState::default()
            .allow_for("ceph-osd", [WorkloadState::Blocked])
            .message(Regex::new("Missing relation").unwrap());
        assert!(blocked.unsteady_reason("ceph-osd", &status).is_none());
        assert!(blocked.unsteady_reason("ceph-mon", &status).is_some());

        let scoped = SteadyState::default().include_only(["ceph-osd"]).exclude("glance");
        assert!(scoped.covers("ceph-osd"));
        assert!(!scoped.covers("ceph-mon"));
        assert!(!SteadyState::default().exclude("glance").covers("glance"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_waits_for_settling() {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 3,
                ..SimTiming::default()
            })
            .build();
        let driver = driver(&sim, 10);

        let cluster = driver.converge(&topology()).await.unwrap();
        assert_eq!(cluster.units_of("ceph-mon").len(), 3);
        assert_eq!(cluster.units_of("glance").len(), 1);
        assert_eq!(cluster.digest(), &topology().digest());
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_twice_issues_no_mutations() {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 0,
                ..SimTiming::default()
            })
            .build();
        let driver = driver(&sim, 3);

        driver.converge(&topology()).await.unwrap();
        let before = sim.mutate(|state| state.now()).await;
        driver.converge(&topology()).await.unwrap();
        let ticks = sim.mutate(|state| state.now()).await - before;

        // Only the single status observation of the fast path.
        assert_eq!(ticks.num_seconds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_last_status() {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 50,
                ..SimTiming::default()
            })
            .build();
        let driver = driver(&sim, 3);

        let err = driver.converge(&topology()).await.unwrap_err();
        match err {
            HarnessError::ConvergenceTimeout { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.len(), 4);
                assert!(last.values().all(|s| s.workload == WorkloadState::Maintenance));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_unit_aborts_wait() {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 0,
                ..SimTiming::default()
            })
            .on_deploy(|state, service| {
                if service == "glance" {
                    state.set_workload("glance/0", WorkloadState::Error, "hook failed: install");
                }
            })
            .build();
        let driver = driver(&sim, 10);

        let err = driver.converge(&topology()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Provisioning(ref m) if m.contains("glance/0")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_removes_services() {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 0,
                ..SimTiming::default()
            })
            .build();
        let driver = driver(&sim, 3);

        let cluster = driver.converge(&topology()).await.unwrap();
        driver.teardown(cluster.topology()).await.unwrap();
        let remaining = sim.mutate(|state| state.services.len()).await;
        assert_eq!(remaining, 0);
    }
}
