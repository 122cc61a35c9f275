//! Shared in-memory world behind the simulated orchestrator and cloud.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use verity_topology::{ConfigOverlay, RelationSpec};

use crate::orchestrator::{ActionId, ActionOutcome, UnitStatus, WorkloadState};

/// Message units settle on when nothing more specific applies.
pub const READY_MESSAGE: &str = "Unit is ready";

/// Timing knobs of the simulation.
///
/// Counts are in observations: a unit configured with `settle_polls = 2`
/// becomes steady on the second `status` call after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTiming {
    pub settle_polls: u32,
    pub relation_delay: u32,
    pub action_polls: u32,
    pub file_delay: u32,
    pub resource_polls: u32,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            settle_polls: 2,
            relation_delay: 1,
            action_polls: 1,
            file_delay: 2,
            resource_polls: 1,
        }
    }
}

/// A file or directory on a simulated unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFile {
    /// `None` for directories.
    pub content: Option<String>,
    pub mtime: DateTime<Utc>,
}

/// Block device or path attached to a simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimDisk {
    /// Carries foreign data (e.g. a formatted ephemeral disk).
    pub dirty: bool,
    /// Currently consumed by the workload.
    pub in_use: bool,
}

#[derive(Debug, Clone)]
struct Settle {
    remaining: u32,
    workload: WorkloadState,
    message: String,
}

/// One simulated unit.
#[derive(Debug, Clone)]
pub struct SimUnit {
    pub service: String,
    pub address: String,
    pub leader: bool,
    pub workload: WorkloadState,
    pub message: String,
    pub agent_idle: bool,
    /// Running process counts by name.
    pub processes: BTreeMap<String, u32>,
    /// Service manager jobs and whether they are running.
    pub jobs: BTreeMap<String, bool>,
    pub files: BTreeMap<String, SimFile>,
    pub disks: BTreeMap<String, SimDisk>,
    pub blacklist: BTreeSet<String>,
    settle: Option<Settle>,
}

impl SimUnit {
    pub fn status(&self) -> UnitStatus {
        UnitStatus {
            workload: self.workload,
            message: self.message.clone(),
            agent_idle: self.agent_idle,
            public_address: Some(self.address.clone()),
            leader: self.leader,
        }
    }
}

/// A deployed simulated service.
#[derive(Debug, Clone)]
pub struct SimService {
    pub charm: String,
    pub config: ConfigOverlay,
    pub units: Vec<String>,
}

/// A storage pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPool {
    pub id: u32,
    pub objects: u64,
    pub kb_used: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct SimAction {
    pub(crate) outcome: ActionOutcome,
    pub(crate) remaining: u32,
}

/// Identity records.
#[derive(Debug, Clone, Default)]
pub struct IdentityState {
    pub domains: BTreeMap<String, String>,
    /// Project id -> (name, domain id).
    pub projects: BTreeMap<String, (String, String)>,
    pub users: BTreeMap<String, SimUser>,
    pub roles: BTreeMap<String, String>,
    /// (role id, user id, project id)
    pub grants: BTreeSet<(String, String, String)>,
    /// Token -> (user id, project id).
    pub tokens: BTreeMap<String, (String, String)>,
}

#[derive(Debug, Clone)]
pub struct SimUser {
    pub name: String,
    pub domain_id: String,
    pub password: String,
    pub default_project_id: Option<String>,
}

/// A volume or image tracked by the simulated cloud.
#[derive(Debug, Clone)]
pub struct SimResource {
    pub name: String,
    pub status: String,
    pub size_kb: u64,
    pub(crate) remaining: u32,
}

/// Everything the simulation knows.
#[derive(Debug)]
pub struct SimState {
    pub timing: SimTiming,
    clock: DateTime<Utc>,
    pub services: BTreeMap<String, SimService>,
    pub units: BTreeMap<String, SimUnit>,
    pub relations: BTreeSet<RelationSpec>,
    /// (unit, local endpoint, remote service) -> published settings.
    relation_data: BTreeMap<(String, String, String), BTreeMap<String, String>>,
    relation_visibility: BTreeMap<(String, String, String), u32>,
    pub leader_settings: BTreeMap<String, BTreeMap<String, String>>,
    pub pools: BTreeMap<String, SimPool>,
    pending_files: BTreeMap<(String, String), (u32, bool)>,
    pub(crate) actions: BTreeMap<ActionId, SimAction>,
    next_action: u64,
    next_address: u32,
    pub identity: IdentityState,
    pub volumes: BTreeMap<String, SimResource>,
    pub images: BTreeMap<String, SimResource>,
}

impl SimState {
    pub fn new(timing: SimTiming) -> Self {
        Self {
            timing,
            clock: Utc
                .with_ymd_and_hms(2018, 10, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            services: BTreeMap::new(),
            units: BTreeMap::new(),
            relations: BTreeSet::new(),
            relation_data: BTreeMap::new(),
            relation_visibility: BTreeMap::new(),
            leader_settings: BTreeMap::new(),
            pools: BTreeMap::new(),
            pending_files: BTreeMap::new(),
            actions: BTreeMap::new(),
            next_action: 0,
            next_address: 10,
            identity: IdentityState::default(),
            volumes: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }

    /// Current simulated wall clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock
    }

    /// Advance the clock by one second.
    pub fn tick(&mut self) -> DateTime<Utc> {
        self.clock += ChronoDuration::seconds(1);
        self.clock
    }

    pub fn unit(&self, name: &str) -> Option<&SimUnit> {
        self.units.get(name)
    }

    pub fn unit_mut(&mut self, name: &str) -> Option<&mut SimUnit> {
        self.units.get_mut(name)
    }

    /// Unit names of `service` in index order.
    pub fn units_of(&self, service: &str) -> Vec<String> {
        self.services
            .get(service)
            .map(|s| s.units.clone())
            .unwrap_or_default()
    }

    pub fn service_config(&self, service: &str) -> Option<&ConfigOverlay> {
        self.services.get(service).map(|s| &s.config)
    }

    pub fn leader_of(&self, service: &str) -> Option<String> {
        self.units_of(service)
            .into_iter()
            .find(|u| self.units.get(u).is_some_and(|unit| unit.leader))
    }

    pub(crate) fn add_service(&mut self, name: &str, charm: &str, units: u32, config: ConfigOverlay) {
        let mut names = Vec::new();
        for index in 0..units {
            let unit_name = format!("{}/{}", name, index);
            let address = format!("10.5.0.{}", self.next_address);
            self.next_address += 1;
            self.units.insert(
                unit_name.clone(),
                SimUnit {
                    service: name.to_string(),
                    address,
                    leader: index == 0,
                    workload: WorkloadState::Waiting,
                    message: "agent initializing".to_string(),
                    agent_idle: false,
                    processes: BTreeMap::new(),
                    jobs: BTreeMap::new(),
                    files: BTreeMap::new(),
                    disks: BTreeMap::new(),
                    blacklist: BTreeSet::new(),
                    settle: None,
                },
            );
            names.push(unit_name);
        }
        self.services.insert(
            name.to_string(),
            SimService {
                charm: charm.to_string(),
                config,
                units: names,
            },
        );
    }

    pub(crate) fn remove_service(&mut self, name: &str) {
        if let Some(service) = self.services.remove(name) {
            for unit in service.units {
                self.units.remove(&unit);
            }
        }
        self.relations.retain(|r| !r.involves(name));
        self.relation_data
            .retain(|(unit, _, remote), _| !unit.starts_with(&format!("{}/", name)) && remote != name);
        self.leader_settings.remove(name);
    }

    /// Put a unit into maintenance until it settles on `workload`/`message`.
    pub fn settle(&mut self, unit: &str, workload: WorkloadState, message: impl Into<String>) {
        let remaining = self.timing.settle_polls;
        if let Some(u) = self.units.get_mut(unit) {
            let message = message.into();
            if remaining == 0 {
                u.workload = workload;
                u.message = message;
                u.agent_idle = true;
                u.settle = None;
                return;
            }
            u.workload = WorkloadState::Maintenance;
            u.message = "executing config-changed hook".to_string();
            u.agent_idle = false;
            u.settle = Some(Settle {
                remaining,
                workload,
                message,
            });
        }
    }

    /// Settle every unit of `service`.
    pub fn settle_service(&mut self, service: &str, workload: WorkloadState, message: &str) {
        for unit in self.units_of(service) {
            self.settle(&unit, workload, message);
        }
    }

    /// Set workload state immediately, without a settle period.
    pub fn set_workload(&mut self, unit: &str, workload: WorkloadState, message: impl Into<String>) {
        if let Some(u) = self.units.get_mut(unit) {
            u.workload = workload;
            u.message = message.into();
            u.agent_idle = true;
            u.settle = None;
        }
    }

    /// Count one status observation against every settling unit.
    pub(crate) fn observe_status(&mut self) {
        for unit in self.units.values_mut() {
            let Some(settle) = unit.settle.as_mut() else {
                continue;
            };
            settle.remaining = settle.remaining.saturating_sub(1);
            if settle.remaining == 0 {
                if let Some(done) = unit.settle.take() {
                    unit.workload = done.workload;
                    unit.message = done.message;
                    unit.agent_idle = true;
                }
            }
        }
    }

    pub fn write_file(&mut self, unit: &str, path: &str, content: impl Into<String>) {
        let mtime = self.clock;
        if let Some(u) = self.units.get_mut(unit) {
            u.files.insert(
                path.to_string(),
                SimFile {
                    content: Some(content.into()),
                    mtime,
                },
            );
        }
    }

    pub fn make_dir(&mut self, unit: &str, path: &str) {
        let mtime = self.clock;
        if let Some(u) = self.units.get_mut(unit) {
            u.files.insert(path.to_string(), SimFile { content: None, mtime });
        }
    }

    pub fn remove_file(&mut self, unit: &str, path: &str) {
        if let Some(u) = self.units.get_mut(unit) {
            u.files.remove(path);
        }
        self.pending_files.remove(&(unit.to_string(), path.to_string()));
    }

    /// Make a directory (or empty file) appear after a few `stat` observations.
    pub fn schedule_path(&mut self, unit: &str, path: &str, is_dir: bool) {
        self.pending_files.insert(
            (unit.to_string(), path.to_string()),
            (self.timing.file_delay, is_dir),
        );
    }

    /// Count one stat observation of `path`, materializing it if due.
    pub(crate) fn observe_path(&mut self, unit: &str, path: &str) {
        let key = (unit.to_string(), path.to_string());
        let Some((remaining, is_dir)) = self.pending_files.get_mut(&key) else {
            return;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            let is_dir = *is_dir;
            self.pending_files.remove(&key);
            if is_dir {
                self.make_dir(unit, path);
            } else {
                self.write_file(unit, path, "");
            }
        }
    }

    pub fn set_relation_data(
        &mut self,
        unit: &str,
        endpoint: &str,
        remote_service: &str,
        settings: BTreeMap<String, String>,
    ) {
        let key = (unit.to_string(), endpoint.to_string(), remote_service.to_string());
        self.relation_visibility
            .insert(key.clone(), self.timing.relation_delay);
        self.relation_data.insert(key, settings);
    }

    /// Published settings, honouring the propagation delay.
    pub(crate) fn read_relation_data(
        &mut self,
        unit: &str,
        endpoint: &str,
        remote_service: &str,
    ) -> Option<BTreeMap<String, String>> {
        let key = (unit.to_string(), endpoint.to_string(), remote_service.to_string());
        if let Some(remaining) = self.relation_visibility.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return None;
            }
        }
        Some(self.relation_data.get(&key).cloned().unwrap_or_default())
    }

    /// Create a pool if it does not exist, returning its id.
    pub fn create_pool(&mut self, name: &str) -> u32 {
        if let Some(pool) = self.pools.get(name) {
            return pool.id;
        }
        let id = self.pools.values().map(|p| p.id + 1).max().unwrap_or(0);
        self.pools.insert(
            name.to_string(),
            SimPool {
                id,
                objects: 0,
                kb_used: 0,
            },
        );
        id
    }

    /// Add (or with negative deltas, remove) objects and usage in a pool.
    pub fn adjust_pool(&mut self, name: &str, objects: i64, kb: i64) {
        if let Some(pool) = self.pools.get_mut(name) {
            pool.objects = pool.objects.saturating_add_signed(objects);
            pool.kb_used = pool.kb_used.saturating_add_signed(kb);
        }
    }

    pub(crate) fn next_action_id(&mut self) -> ActionId {
        self.next_action += 1;
        ActionId::new(self.next_action.to_string())
    }
}
