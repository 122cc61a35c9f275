//! Action invocations against units.

use serde_json::Value;
use tracing::{debug, info};
use verity_poll::{poll, PollError, PollPolicy, Probe};

use crate::cluster::UnitHandle;
use crate::orchestrator::{ActionId, ActionOutcome, ActionParams, OrchestratorError};

/// A named action with parameters, bound to one unit.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    target: UnitHandle,
    action: String,
    params: ActionParams,
}

impl ActionInvocation {
    pub fn new(target: UnitHandle, action: impl Into<String>) -> Self {
        Self {
            target,
            action: action.into(),
            params: ActionParams::new(),
        }
    }

    /// Add one parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Replace all parameters.
    pub fn params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    pub fn target(&self) -> &UnitHandle {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.action
    }

    /// Queue the action without waiting for it.
    pub async fn enqueue(&self) -> Result<PendingAction, OrchestratorError> {
        let id = self
            .target
            .orchestrator()
            .enqueue_action(self.target.name(), &self.action, &self.params)
            .await?;
        info!(unit = %self.target, action = %self.action, action_id = %id, "Enqueued action");
        Ok(PendingAction {
            target: self.target.clone(),
            action: self.action.clone(),
            id,
        })
    }

    /// Queue the action and wait for its outcome.
    pub async fn run(&self, policy: PollPolicy) -> Result<ActionOutcome, OrchestratorError> {
        self.enqueue().await?.wait(policy).await
    }
}

/// An enqueued action.
#[derive(Debug, Clone)]
pub struct PendingAction {
    target: UnitHandle,
    action: String,
    id: ActionId,
}

impl PendingAction {
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    /// Wait until the action is terminal.
    ///
    /// When the wait runs out, the last (non-terminal) outcome is returned, so
    /// `completed()` is false rather than the call failing.
    pub async fn wait(&self, policy: PollPolicy) -> Result<ActionOutcome, OrchestratorError> {
        let orchestrator = self.target.orchestrator();
        let id = &self.id;
        let what = format!("action {} on {}", self.action, self.target);

        let result = poll(&what, policy, move |_| async move {
            let outcome = orchestrator.action_outcome(id).await?;
            if outcome.state.is_terminal() {
                Ok(Probe::Ready(outcome))
            } else {
                Ok(Probe::pending(format!("action {} is {}", id, outcome.state)))
            }
        })
        .await;

        match result {
            Ok(outcome) => {
                debug!(unit = %self.target, action = %self.action, state = %outcome.state, "Action finished");
                Ok(outcome)
            }
            Err(PollError::Aborted { source, .. }) => Err(source),
            Err(PollError::Exhausted { .. }) => orchestrator.action_outcome(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cluster::ConvergedCluster;
    use crate::orchestrator::{ActionState, Orchestrator};
    use crate::release::Release;
    use crate::sim::{SimTiming, Simulation};
    use verity_topology::{ServiceSpec, Topology};

    async fn cluster(action_polls: u32) -> ConvergedCluster {
        let sim = Simulation::builder()
            .timing(SimTiming {
                settle_polls: 0,
                action_polls,
                ..SimTiming::default()
            })
            .action("ceph-osd", "list-disks", |_, _, _| {
                Ok([("disks".to_string(), "['/dev/vdb']".to_string())].into_iter().collect())
            })
            .action("ceph-osd", "zap-disk", |_, _, params| {
                if params.get("i-really-mean-it") == Some(&Value::Bool(true)) {
                    Ok(Default::default())
                } else {
                    Err("not confirmed".to_string())
                }
            })
            .build();
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(sim.orchestrator());
        let topology = Topology::builder()
            .service(ServiceSpec::new("ceph-osd"))
            .build()
            .unwrap();
        for spec in topology.services() {
            orchestrator.deploy(spec).await.unwrap();
        }
        let status = orchestrator.status().await.unwrap();
        ConvergedCluster::new(topology, Release::default(), orchestrator, &status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_terminal_state() {
        let cluster = cluster(2).await;
        let unit = cluster.unit("ceph-osd/0").unwrap();

        let outcome = unit
            .action("list-disks")
            .run(PollPolicy::new(Duration::from_secs(1), 5))
            .await
            .unwrap();
        assert!(outcome.completed());
        assert_eq!(outcome.results["disks"], "['/dev/vdb']");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_action_is_not_completed() {
        let cluster = cluster(0).await;
        let unit = cluster.unit("ceph-osd/0").unwrap();

        let outcome = unit
            .action("zap-disk")
            .param("devices", "/dev/vdb")
            .run(PollPolicy::new(Duration::from_secs(1), 3))
            .await
            .unwrap();
        assert_eq!(outcome.state, ActionState::Failed);
        assert!(!outcome.completed());
        assert_eq!(outcome.message.as_deref(), Some("not confirmed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_wait_returns_last_outcome() {
        let cluster = cluster(10).await;
        let unit = cluster.unit("ceph-osd/0").unwrap();

        let outcome = unit
            .action("list-disks")
            .run(PollPolicy::new(Duration::from_secs(1), 2))
            .await
            .unwrap();
        assert_eq!(outcome.state, ActionState::Running);
        assert!(!outcome.completed());
    }

    #[tokio::test]
    async fn test_unknown_action_is_an_error() {
        let cluster = cluster(0).await;
        let unit = cluster.unit("ceph-osd/0").unwrap();
        let err = unit.action("self-destruct").enqueue().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAction { .. }));
    }
}
