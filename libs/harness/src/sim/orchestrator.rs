//! [`Orchestrator`] over the simulated world.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use verity_topology::{ConfigOverlay, Endpoint, RelationSpec, ServiceSpec};

use super::state::{SimAction, SimState, READY_MESSAGE};
use super::SimHooks;
use crate::orchestrator::{
    ActionId, ActionOutcome, ActionParams, ActionState, CommandOutput, FileStat, ModelStatus,
    Orchestrator, OrchestratorError, WorkloadState,
};

/// In-memory orchestrator; obtain one from [`super::Simulation::orchestrator`].
#[derive(Clone)]
pub struct SimulatedOrchestrator {
    state: Arc<Mutex<SimState>>,
    hooks: Arc<SimHooks>,
}

impl SimulatedOrchestrator {
    pub(crate) fn new(state: Arc<Mutex<SimState>>, hooks: Arc<SimHooks>) -> Self {
        Self { state, hooks }
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        code: 0,
    }
}

fn fail(code: i32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        code,
    }
}

/// Commands every simulated machine understands.
fn builtin(state: &SimState, unit: &str, command: &str) -> Option<CommandOutput> {
    let u = state.unit(unit)?;
    let words: Vec<&str> = command.split_whitespace().collect();

    match words.as_slice() {
        ["pidof", "-x", name] | ["pidof", name] => {
            let count = u.processes.get(*name).copied().unwrap_or(0);
            if count == 0 {
                return Some(fail(1, ""));
            }
            let pids: Vec<String> = (0..count).map(|i| (1000 + i).to_string()).collect();
            Some(ok(format!("{}\n", pids.join(" "))))
        }
        ["systemctl", "is-active", "--quiet", name] => {
            let running = u.jobs.get(*name).copied().unwrap_or(false);
            Some(if running { ok("") } else { fail(3, "") })
        }
        ["systemctl", "is-active", name] => {
            let running = u.jobs.get(*name).copied().unwrap_or(false);
            let mut output = ok(if running { "active\n" } else { "inactive\n" });
            if !running {
                output.code = 3;
            }
            Some(output)
        }
        ["date", "+%s"] => Some(ok(format!("{}\n", state.now().timestamp()))),
        ["hostname"] => Some(ok(format!("juju-{}\n", unit.replace('/', "-")))),
        ["leader-get", key] => {
            let value = state
                .leader_settings
                .get(&u.service)
                .and_then(|settings| settings.get(*key))
                .cloned()
                .unwrap_or_default();
            Some(ok(format!("{}\n", value)))
        }
        ["cat", path] => {
            let path = path.trim_matches('\'');
            match u.files.get(path).and_then(|f| f.content.clone()) {
                Some(content) => Some(ok(content)),
                None => Some(fail(1, format!("cat: {}: No such file or directory", path))),
            }
        }
        _ => {
            // Upstart job status: `status <job...>`.
            let job = command.strip_prefix("status ")?;
            let running = u.jobs.get(job.trim()).copied().unwrap_or(false);
            Some(if running {
                ok(format!("{} start/running, process 1000\n", job.trim()))
            } else {
                ok(format!("{} stop/waiting\n", job.trim()))
            })
        }
    }
}

#[async_trait]
impl Orchestrator for SimulatedOrchestrator {
    async fn deploy(&self, spec: &ServiceSpec) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        if state.services.contains_key(&spec.name) {
            debug!(service = %spec.name, "[SIM] Service already deployed");
            return Ok(());
        }

        debug!(service = %spec.name, units = spec.units, "[SIM] Deploying service");
        state.add_service(&spec.name, &spec.charm, spec.units, spec.config.clone());
        state.settle_service(&spec.name, WorkloadState::Active, READY_MESSAGE);
        for hook in &self.hooks.on_deploy {
            hook(&mut *state, &spec.name);
        }
        Ok(())
    }

    async fn relate(&self, relation: &RelationSpec) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        let (a, b) = relation.endpoints();
        for endpoint in [a, b] {
            if !state.services.contains_key(endpoint.service()) {
                return Err(OrchestratorError::UnknownService(endpoint.service().to_string()));
            }
        }
        if !state.relations.insert(relation.clone()) {
            return Ok(());
        }

        debug!(relation = %relation, "[SIM] Relating");
        for hook in &self.hooks.on_relate {
            hook(&mut *state, relation);
        }
        Ok(())
    }

    async fn configure(&self, service: &str, overlay: &ConfigOverlay) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        let Some(svc) = state.services.get_mut(service) else {
            return Err(OrchestratorError::UnknownService(service.to_string()));
        };
        svc.config = overlay.merged_over(&svc.config);

        debug!(service, keys = overlay.len(), "[SIM] Configuring");
        state.settle_service(service, WorkloadState::Active, READY_MESSAGE);
        for hook in &self.hooks.on_configure {
            hook(&mut *state, service, overlay);
        }
        Ok(())
    }

    async fn status(&self) -> Result<ModelStatus, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        state.observe_status();

        let mut model = ModelStatus::default();
        for (name, service) in &state.services {
            let units = service
                .units
                .iter()
                .filter_map(|u| state.unit(u).map(|unit| (u.clone(), unit.status())))
                .collect();
            model.services.insert(name.clone(), units);
        }
        Ok(model)
    }

    async fn run(&self, unit: &str, command: &str) -> Result<CommandOutput, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        if state.unit(unit).is_none() {
            return Err(OrchestratorError::UnknownUnit(unit.to_string()));
        }

        if let Some(output) = builtin(&state, unit, command) {
            return Ok(output);
        }
        for hook in &self.hooks.commands {
            if let Some(output) = hook(&mut *state, unit, command) {
                return Ok(output);
            }
        }
        let program = command.split_whitespace().next().unwrap_or_default();
        Ok(fail(127, format!("{}: command not found", program)))
    }

    async fn relation_data(
        &self,
        unit: &str,
        endpoint: &str,
        remote: &Endpoint,
    ) -> Result<Option<BTreeMap<String, String>>, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        let Some(service) = state.unit(unit).map(|u| u.service.clone()) else {
            return Err(OrchestratorError::UnknownUnit(unit.to_string()));
        };

        let related = state.relations.iter().any(|r| {
            r.endpoint_of(&service).is_some_and(|e| e.name() == endpoint)
                && r.remote_of(&service) == Some(remote)
        });
        if !related {
            return Ok(None);
        }
        Ok(state.read_relation_data(unit, endpoint, remote.service()))
    }

    async fn enqueue_action(
        &self,
        unit: &str,
        action: &str,
        params: &ActionParams,
    ) -> Result<ActionId, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        let Some(service) = state.unit(unit).map(|u| u.service.clone()) else {
            return Err(OrchestratorError::UnknownUnit(unit.to_string()));
        };
        let Some(hook) = self.hooks.actions.get(&(service, action.to_string())) else {
            return Err(OrchestratorError::UnknownAction {
                unit: unit.to_string(),
                action: action.to_string(),
            });
        };

        let id = state.next_action_id();
        let (action_state, results, message) = match hook(&mut *state, unit, params) {
            Ok(results) => (ActionState::Completed, results, None),
            Err(message) => (ActionState::Failed, BTreeMap::new(), Some(message)),
        };
        debug!(unit, action, action_id = %id, state = %action_state, "[SIM] Action ran");

        let remaining = state.timing.action_polls;
        state.actions.insert(
            id.clone(),
            SimAction {
                outcome: ActionOutcome {
                    id: id.clone(),
                    state: action_state,
                    results,
                    message,
                },
                remaining,
            },
        );
        Ok(id)
    }

    async fn action_outcome(&self, id: &ActionId) -> Result<ActionOutcome, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        let Some(action) = state.actions.get_mut(id) else {
            return Err(OrchestratorError::UnknownActionId(id.to_string()));
        };

        if action.remaining > 0 {
            action.remaining -= 1;
            return Ok(ActionOutcome {
                id: id.clone(),
                state: ActionState::Running,
                results: BTreeMap::new(),
                message: None,
            });
        }
        Ok(action.outcome.clone())
    }

    async fn stat(&self, unit: &str, path: &str) -> Result<Option<FileStat>, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        if state.unit(unit).is_none() {
            return Err(OrchestratorError::UnknownUnit(unit.to_string()));
        }
        state.observe_path(unit, path);

        Ok(state
            .unit(unit)
            .and_then(|u| u.files.get(path))
            .map(|file| FileStat {
                size: file.content.as_ref().map_or(4096, |c| c.len() as u64),
                mtime: file.mtime,
                is_dir: file.content.is_none(),
            }))
    }

    async fn read_file(&self, unit: &str, path: &str) -> Result<Option<String>, OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        let Some(u) = state.unit(unit) else {
            return Err(OrchestratorError::UnknownUnit(unit.to_string()));
        };
        Ok(u.files.get(path).and_then(|f| f.content.clone()))
    }

    async fn remove(&self, service: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        state.tick();
        if !state.services.contains_key(service) {
            return Err(OrchestratorError::UnknownService(service.to_string()));
        }
        debug!(service, "[SIM] Removing service");
        state.remove_service(service);
        Ok(())
    }
}
