//! Deterministic in-memory stand-ins for the orchestrator and the cloud.
//!
//! A [`Simulation`] owns one [`SimState`] shared by a [`SimulatedOrchestrator`]
//! and a [`SimulatedCloud`]. The generic engine models units, settling,
//! relation propagation, files and actions; service behaviour is plugged in
//! through hooks ([`SimulationBuilder`]). [`SimulationBuilder::ceph_osd`] installs the
//! hooks for the Ceph OSD cluster the bundled scenario verifies.

mod ceph;
mod cloud;
mod orchestrator;
mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use verity_topology::{ConfigOverlay, RelationSpec};

use crate::orchestrator::{ActionParams, CommandOutput};

pub use cloud::SimulatedCloud;
pub use orchestrator::SimulatedOrchestrator;
pub use state::{
    IdentityState, SimDisk, SimFile, SimPool, SimResource, SimService, SimState, SimTiming,
    SimUnit, SimUser, READY_MESSAGE,
};

/// Answers a command on a unit, or `None` to let the next hook try.
pub type CommandHook = Box<dyn Fn(&mut SimState, &str, &str) -> Option<CommandOutput> + Send + Sync>;

/// Runs an action on a unit: results on success, failure message otherwise.
pub type ActionHook =
    Box<dyn Fn(&mut SimState, &str, &ActionParams) -> Result<BTreeMap<String, String>, String> + Send + Sync>;

/// Called after a service is deployed.
pub type DeployHook = Box<dyn Fn(&mut SimState, &str) + Send + Sync>;

/// Called after configuration is applied, with the applied keys.
pub type ConfigureHook = Box<dyn Fn(&mut SimState, &str, &ConfigOverlay) + Send + Sync>;

/// Called after a relation is established.
pub type RelationHook = Box<dyn Fn(&mut SimState, &RelationSpec) + Send + Sync>;

#[derive(Default)]
pub(crate) struct SimHooks {
    pub(crate) commands: Vec<CommandHook>,
    pub(crate) actions: BTreeMap<(String, String), ActionHook>,
    pub(crate) on_deploy: Vec<DeployHook>,
    pub(crate) on_configure: Vec<ConfigureHook>,
    pub(crate) on_relate: Vec<RelationHook>,
}

/// Builds a [`Simulation`] from timing and behaviour hooks.
#[derive(Default)]
pub struct SimulationBuilder {
    timing: SimTiming,
    hooks: SimHooks,
    admin: Option<crate::cloud::Credentials>,
}

impl SimulationBuilder {
    pub fn timing(mut self, timing: SimTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn command<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimState, &str, &str) -> Option<CommandOutput> + Send + Sync + 'static,
    {
        self.hooks.commands.push(Box::new(hook));
        self
    }

    /// Define `action` on units of `service`.
    pub fn action<F>(mut self, service: &str, action: &str, hook: F) -> Self
    where
        F: Fn(&mut SimState, &str, &ActionParams) -> Result<BTreeMap<String, String>, String>
            + Send
            + Sync
            + 'static,
    {
        self.hooks
            .actions
            .insert((service.to_string(), action.to_string()), Box::new(hook));
        self
    }

    pub fn on_deploy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimState, &str) + Send + Sync + 'static,
    {
        self.hooks.on_deploy.push(Box::new(hook));
        self
    }

    pub fn on_configure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimState, &str, &ConfigOverlay) + Send + Sync + 'static,
    {
        self.hooks.on_configure.push(Box::new(hook));
        self
    }

    pub fn on_relate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimState, &RelationSpec) + Send + Sync + 'static,
    {
        self.hooks.on_relate.push(Box::new(hook));
        self
    }

    /// Seed the identity service with an admin principal.
    pub fn admin(mut self, credentials: crate::cloud::Credentials) -> Self {
        self.admin = Some(credentials);
        self
    }

    pub fn build(self) -> Simulation {
        let mut state = SimState::new(self.timing);
        if let Some(admin) = &self.admin {
            cloud::seed_admin(&mut state, admin);
        }
        Simulation {
            state: Arc::new(Mutex::new(state)),
            hooks: Arc::new(self.hooks),
        }
    }
}

/// A simulated world and handles onto it.
#[derive(Clone)]
pub struct Simulation {
    state: Arc<Mutex<SimState>>,
    hooks: Arc<SimHooks>,
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::default()
    }

    /// Orchestrator view of this world.
    pub fn orchestrator(&self) -> SimulatedOrchestrator {
        SimulatedOrchestrator::new(self.state.clone(), self.hooks.clone())
    }

    /// Cloud view of this world.
    pub fn cloud(&self) -> SimulatedCloud {
        SimulatedCloud::new(self.state.clone())
    }

    /// Inspect or change the world directly.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation").finish_non_exhaustive()
    }
}
