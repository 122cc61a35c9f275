//! Ceph OSD cluster behaviour for the simulation.
//!
//! Models just enough of ceph-mon, ceph-osd and their OpenStack clients for
//! the bundled scenario: monitor bootstrap and `fsid`, the OSD/monitor
//! relation, client pools, rendered config files, the ceph CLI and the
//! ceph-osd actions (pause/resume, blacklists, disk zapping and adding).

use std::collections::BTreeMap;

use serde_json::{json, Value};
use uuid::Uuid;
use verity_topology::{ConfigOverlay, RelationSpec};

use super::state::{SimDisk, SimPool, SimState, SimUnit};
use super::SimulationBuilder;
use crate::orchestrator::{ActionParams, CommandOutput, WorkloadState};
use crate::release::Release;
use crate::scenario::ceph_osd::{CEPH_CONF, DMCRYPT_KEYS};

const MISSING_MONITOR: &str = "Missing relation: monitor";
const NON_PRISTINE: &str =
    "Non-pristine devices detected, consult `list-disks`, `zap-disk` and `blacklist-*` actions.";
const PAUSED: &str = "Paused. Use 'resume' action to resume normal service.";

/// Root disk, ephemeral disk (formatted by cloud-init), attached storage and
/// the directory-backed OSD.
const ROOT_DISK: &str = "/dev/vda";
const EPHEMERAL_DISK: &str = "/dev/vdb";
const STORAGE_DISK: &str = "/dev/sdb";
const DIRECTORY_OSD: &str = "/srv/ceph";

fn osd_count(unit: &SimUnit) -> u32 {
    unit.disks.values().filter(|d| d.in_use).count() as u32
}

fn osd_ready(count: u32) -> String {
    format!("Unit is ready ({} OSD)", count)
}

/// Remote endpoint of `relation` when `service` takes part through `endpoint`.
fn remote_via<'a>(relation: &'a RelationSpec, service: &str, endpoint: &str) -> Option<&'a str> {
    relation
        .endpoint_of(service)
        .filter(|e| e.name() == endpoint)
        .and_then(|_| relation.remote_of(service))
        .map(|e| e.service())
}

fn param(params: &ActionParams, key: &str) -> Option<String> {
    params.get(key).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn render_ini(sections: &[(&str, Vec<(&str, String)>)]) -> String {
    let mut out = String::new();
    for (name, pairs) in sections {
        out.push_str(&format!("[{}]\n", name));
        for (key, value) in pairs {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        out.push('\n');
    }
    out
}

fn ceph_conf(state: &SimState, auth: &str) -> String {
    let fsid = state
        .leader_settings
        .get("ceph-mon")
        .and_then(|s| s.get("fsid"))
        .cloned()
        .unwrap_or_default();
    let mon_hosts: Vec<String> = state
        .units_of("ceph-mon")
        .iter()
        .filter_map(|u| state.unit(u).map(|unit| unit.address.clone()))
        .collect();

    render_ini(&[
        (
            "global",
            vec![
                ("auth cluster required", auth.to_string()),
                ("auth service required", auth.to_string()),
                ("auth client required", auth.to_string()),
                ("keyring", "/etc/ceph/$cluster.$name.keyring".to_string()),
                ("mon host", mon_hosts.join(" ")),
                ("fsid", fsid),
                ("log to syslog", "false".to_string()),
                ("err to syslog", "false".to_string()),
                ("clog to syslog", "false".to_string()),
                ("mon cluster log to syslog", "false".to_string()),
                ("debug mon", "1/5".to_string()),
                ("debug osd", "1/5".to_string()),
            ],
        ),
        ("client", vec![("log file", "/var/log/ceph.log".to_string())]),
        (
            "mon",
            vec![("keyring", "/var/lib/ceph/mon/$cluster-$id/keyring".to_string())],
        ),
        (
            "mds",
            vec![("keyring", "/var/lib/ceph/mds/$cluster-$id/keyring".to_string())],
        ),
        (
            "osd",
            vec![
                ("keyring", "/var/lib/ceph/osd/$cluster-$id/keyring".to_string()),
                ("osd journal size", "1024".to_string()),
                ("filestore xattr use omap", "true".to_string()),
            ],
        ),
    ])
}

fn glance_api_conf(release: Release) -> String {
    let mut store = vec![
        ("default_store", "rbd".to_string()),
        ("rbd_store_ceph_conf", CEPH_CONF.to_string()),
        ("rbd_store_user", "glance".to_string()),
        ("rbd_store_pool", "glance".to_string()),
        ("rbd_store_chunk_size", "8".to_string()),
    ];
    let mut defaults = vec![("bind_port", "9282".to_string()), ("debug", "False".to_string())];

    if release.glance_store_section() == "DEFAULT" {
        defaults.append(&mut store);
        render_ini(&[("DEFAULT", defaults)])
    } else {
        store.push((
            "stores",
            "glance.store.filesystem.Store,glance.store.http.Store,glance.store.rbd.Store".to_string(),
        ));
        render_ini(&[("DEFAULT", defaults), ("glance_store", store)])
    }
}

fn nova_conf() -> String {
    render_ini(&[
        ("DEFAULT", vec![("compute_driver", "libvirt.LibvirtDriver".to_string())]),
        (
            "libvirt",
            vec![
                ("images_type", "qcow2".to_string()),
                ("rbd_user", "nova-compute".to_string()),
                ("rbd_secret_uuid", Uuid::new_v4().to_string()),
            ],
        ),
    ])
}

fn cinder_conf() -> String {
    render_ini(&[
        ("DEFAULT", vec![("enabled_backends", "cinder-ceph".to_string())]),
        (
            "cinder-ceph",
            vec![
                ("volume_backend_name", "cinder-ceph".to_string()),
                ("volume_driver", "cinder.volume.drivers.rbd.RBDDriver".to_string()),
                ("rbd_pool", "cinder-ceph".to_string()),
                ("rbd_user", "cinder-ceph".to_string()),
            ],
        ),
    ])
}

fn set_jobs(state: &mut SimState, service: &str, jobs: &[&str], running: bool) {
    for unit in state.units_of(service) {
        if let Some(u) = state.unit_mut(&unit) {
            for job in jobs {
                u.jobs.insert(job.to_string(), running);
            }
        }
    }
}

fn deploy(state: &mut SimState, release: Release, service: &str) {
    match service {
        "ceph-mon" => {
            let fsid = Uuid::new_v4().to_string();
            state
                .leader_settings
                .entry(service.to_string())
                .or_default()
                .insert("fsid".to_string(), fsid);
            for unit in state.units_of(service) {
                if let Some(u) = state.unit_mut(&unit) {
                    u.processes.insert("ceph-mon".to_string(), 1);
                }
            }
            set_jobs(state, service, &["ceph-mon", "ceph-mon-all"], true);
            for pool in release.expected_pools() {
                if pool != "cinder-ceph" && pool != "glance" {
                    state.create_pool(pool);
                }
            }
        }
        "ceph-osd" => {
            for unit in state.units_of(service) {
                if let Some(u) = state.unit_mut(&unit) {
                    u.processes.insert("ceph-osd".to_string(), 0);
                    u.disks.insert(ROOT_DISK.to_string(), SimDisk::default());
                    u.disks.insert(
                        EPHEMERAL_DISK.to_string(),
                        SimDisk {
                            dirty: true,
                            in_use: false,
                        },
                    );
                    u.disks.insert(STORAGE_DISK.to_string(), SimDisk::default());
                    u.disks.insert(DIRECTORY_OSD.to_string(), SimDisk::default());
                }
            }
            set_jobs(state, service, &["ceph-osd", "ceph-osd-all"], false);
            state.settle_service(service, WorkloadState::Blocked, MISSING_MONITOR);
        }
        "glance" => set_jobs(state, service, &["glance-api", "glance-registry"], true),
        "cinder" => set_jobs(
            state,
            service,
            &["cinder-scheduler", "cinder-volume", release.cinder_api_service()],
            true,
        ),
        "keystone" => {
            let job = if release.keystone_behind_apache() {
                "apache2"
            } else {
                "keystone"
            };
            set_jobs(state, service, &[job], true);
        }
        _ => {}
    }
}

fn relate(state: &mut SimState, release: Release, relation: &RelationSpec) {
    if remote_via(relation, "ceph-osd", "mon") == Some("ceph-mon") {
        relate_osd_to_mon(state);
    }

    if let Some(client) = remote_via(relation, "ceph-mon", "client") {
        match client {
            "glance" => {
                state.create_pool("glance");
                for unit in state.units_of("glance") {
                    state.write_file(&unit, "/etc/glance/glance-api.conf", glance_api_conf(release));
                }
            }
            "cinder-ceph" => {
                state.create_pool("cinder-ceph");
            }
            "nova-compute" => {
                for unit in state.units_of("nova-compute") {
                    state.write_file(&unit, "/etc/nova/nova.conf", nova_conf());
                }
            }
            _ => {}
        }
    }

    if remote_via(relation, "cinder-ceph", "storage-backend") == Some("cinder") {
        for unit in state.units_of("cinder") {
            state.write_file(&unit, "/etc/cinder/cinder.conf", cinder_conf());
        }
    }
}

fn relate_osd_to_mon(state: &mut SimState) {
    let auth = state
        .service_config("ceph-mon")
        .and_then(|c| c.get("auth-supported"))
        .unwrap_or("cephx")
        .to_string();
    let fsid = state
        .leader_settings
        .get("ceph-mon")
        .and_then(|s| s.get("fsid"))
        .cloned()
        .unwrap_or_default();
    let conf = ceph_conf(state, &auth);

    for unit in state.units_of("ceph-mon") {
        let Some(address) = state.unit(&unit).map(|u| u.address.clone()) else {
            continue;
        };
        let settings: BTreeMap<String, String> = [
            ("osd_bootstrap_key", Uuid::new_v4().simple().to_string()),
            ("private-address", address.clone()),
            ("auth", auth.clone()),
            ("ceph-public-address", address),
            ("fsid", fsid.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        state.set_relation_data(&unit, "osd", "ceph-osd", settings);
    }

    for unit in state.units_of("ceph-osd") {
        let Some(address) = state.unit(&unit).map(|u| u.address.clone()) else {
            continue;
        };
        let settings = [("private-address".to_string(), address)].into_iter().collect();
        state.set_relation_data(&unit, "mon", "ceph-mon", settings);
        state.write_file(&unit, CEPH_CONF, conf.clone());

        let Some(u) = state.unit_mut(&unit) else {
            continue;
        };
        for device in [STORAGE_DISK, DIRECTORY_OSD] {
            if let Some(disk) = u.disks.get_mut(device) {
                disk.in_use = true;
            }
        }
        let count = osd_count(u);
        u.processes.insert("ceph-osd".to_string(), count);
        for job in ["ceph-osd", "ceph-osd-all"] {
            u.jobs.insert(job.to_string(), true);
        }
        state.settle(&unit, WorkloadState::Active, osd_ready(count));
    }
}

fn configure_osd(state: &mut SimState, overlay: &ConfigOverlay) {
    let Some(config) = state.service_config("ceph-osd").cloned() else {
        return;
    };
    let encrypt = config
        .get("osd-encrypt")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let unmount = config.get("ephemeral-unmount").is_some_and(|v| !v.is_empty());
    let devices: Vec<String> = config
        .get("osd-devices")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    for unit in state.units_of("ceph-osd") {
        let Some(u) = state.unit(&unit) else {
            continue;
        };
        let related = u.files.contains_key(CEPH_CONF);
        let dirty = unmount
            && devices
                .iter()
                .any(|d| u.disks.get(d).is_some_and(|disk| disk.dirty && !disk.in_use));
        let has_keys = u.files.contains_key(DMCRYPT_KEYS);
        let count = osd_count(u);

        if encrypt && overlay.get("osd-encrypt").is_some() && !has_keys {
            state.schedule_path(&unit, DMCRYPT_KEYS, true);
        }
        if !related {
            state.settle(&unit, WorkloadState::Blocked, MISSING_MONITOR);
        } else if dirty {
            state.settle(&unit, WorkloadState::Blocked, NON_PRISTINE);
        } else {
            state.settle(&unit, WorkloadState::Active, osd_ready(count));
        }
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        code: 0,
    }
}

fn ceph_cli(state: &mut SimState, release: Release, unit: &str, command: &str) -> Option<CommandOutput> {
    let command = command.strip_prefix("sudo ").unwrap_or(command).trim();
    let args = command.strip_prefix("ceph ")?;
    let u = state.unit(unit)?;
    if u.service != "ceph-mon" && u.service != "ceph-osd" {
        return None;
    }
    if u.service == "ceph-osd" && !u.files.contains_key(CEPH_CONF) {
        return Some(CommandOutput {
            stdout: String::new(),
            stderr: "error connecting to the cluster".to_string(),
            code: 1,
        });
    }

    let mut pools: Vec<(&String, &SimPool)> = state.pools.iter().collect();
    pools.sort_by_key(|(_, p)| p.id);
    let osds: u32 = state
        .units_of("ceph-osd")
        .iter()
        .filter_map(|u| state.unit(u))
        .map(osd_count)
        .sum();
    let mons = state.units_of("ceph-mon").len();

    let output = match args {
        "osd lspools" => {
            if release < Release::XenialPike {
                let listed: String = pools.iter().map(|(name, p)| format!("{} {},", p.id, name)).collect();
                ok(format!("{}\n", listed))
            } else {
                let listed: String = pools.iter().map(|(name, p)| format!("{} {}\n", p.id, name)).collect();
                ok(listed)
            }
        }
        "df --format=json" | "df --format json" => {
            let entries: Vec<Value> = pools
                .iter()
                .map(|(name, p)| {
                    json!({
                        "name": name,
                        "id": p.id,
                        "stats": {
                            "kb_used": p.kb_used,
                            "bytes_used": p.kb_used * 1024,
                            "objects": p.objects,
                        }
                    })
                })
                .collect();
            ok(json!({ "stats": { "total_bytes": 32_212_254_720u64 }, "pools": entries }).to_string())
        }
        "health" => ok("HEALTH_OK\n"),
        "mds stat" => ok("e1: 0/0/1 up\n"),
        "pg stat" => ok(format!("v210: {} pgs: {} active+clean\n", pools.len() * 64, pools.len() * 64)),
        "osd stat" => ok(format!("osdmap e30: {} osds: {} up, {} in\n", osds, osds, osds)),
        "mon stat" => ok(format!("e1: {} mons, quorum 0,1,2\n", mons)),
        _ => CommandOutput {
            stdout: String::new(),
            stderr: format!("no valid command found for '{}'", args),
            code: 22,
        },
    };
    Some(output)
}

fn unit_or_err<'a>(state: &'a mut SimState, unit: &str) -> Result<&'a mut SimUnit, String> {
    state
        .unit_mut(unit)
        .ok_or_else(|| format!("unit {} is gone", unit))
}

fn pause(state: &mut SimState, unit: &str, _params: &ActionParams) -> Result<BTreeMap<String, String>, String> {
    let u = unit_or_err(state, unit)?;
    u.processes.insert("ceph-osd".to_string(), 0);
    for running in u.jobs.values_mut() {
        *running = false;
    }
    state.set_workload(unit, WorkloadState::Maintenance, PAUSED);
    Ok(BTreeMap::new())
}

fn resume(state: &mut SimState, unit: &str, _params: &ActionParams) -> Result<BTreeMap<String, String>, String> {
    let u = unit_or_err(state, unit)?;
    let count = osd_count(u);
    u.processes.insert("ceph-osd".to_string(), count);
    for running in u.jobs.values_mut() {
        *running = true;
    }
    state.set_workload(unit, WorkloadState::Active, osd_ready(count));
    Ok(BTreeMap::new())
}

fn blacklist_add(state: &mut SimState, unit: &str, params: &ActionParams) -> Result<BTreeMap<String, String>, String> {
    let devices = param(params, "osd-devices").ok_or("osd-devices is required")?;
    let u = unit_or_err(state, unit)?;
    for device in devices.split_whitespace() {
        if !device.starts_with('/') {
            return Err(format!("{}: Non-absolute paths are not allowed", device));
        }
        if !u.disks.contains_key(device) {
            return Err(format!("{}: Device does not exist", device));
        }
    }
    for device in devices.split_whitespace() {
        u.blacklist.insert(device.to_string());
    }
    Ok(BTreeMap::new())
}

fn blacklist_remove(
    state: &mut SimState,
    unit: &str,
    params: &ActionParams,
) -> Result<BTreeMap<String, String>, String> {
    let devices = param(params, "osd-devices").ok_or("osd-devices is required")?;
    let u = unit_or_err(state, unit)?;
    for device in devices.split_whitespace() {
        u.blacklist.remove(device);
    }
    Ok(BTreeMap::new())
}

fn list_disks(state: &mut SimState, unit: &str, _params: &ActionParams) -> Result<BTreeMap<String, String>, String> {
    let u = unit_or_err(state, unit)?;
    let quote = |items: Vec<&String>| {
        let quoted: Vec<String> = items.iter().map(|d| format!("'{}'", d)).collect();
        format!("[{}]", quoted.join(", "))
    };
    let disks = quote(u.disks.keys().filter(|d| d.starts_with("/dev/")).collect());
    let blacklist = quote(u.blacklist.iter().collect());
    let non_pristine = quote(
        u.disks
            .iter()
            .filter(|(_, d)| d.dirty && !d.in_use)
            .map(|(name, _)| name)
            .collect(),
    );
    Ok([
        ("disks".to_string(), disks),
        ("blacklist".to_string(), blacklist),
        ("non-pristine".to_string(), non_pristine),
    ]
    .into_iter()
    .collect())
}

fn zap_disk(state: &mut SimState, unit: &str, params: &ActionParams) -> Result<BTreeMap<String, String>, String> {
    let confirmed = param(params, "i-really-mean-it").is_some_and(|v| v == "true");
    if !confirmed {
        return Err("Please confirm by setting i-really-mean-it=true".to_string());
    }
    let devices = param(params, "devices").ok_or("devices is required")?;
    let u = unit_or_err(state, unit)?;
    for device in devices.split_whitespace() {
        match u.disks.get(device) {
            None => return Err(format!("{}: Device does not exist", device)),
            Some(disk) if disk.in_use => return Err(format!("{}: Device is in use", device)),
            Some(_) => {}
        }
    }
    for device in devices.split_whitespace() {
        if let Some(disk) = u.disks.get_mut(device) {
            disk.dirty = false;
        }
    }
    Ok([("message".to_string(), format!("{} disk(s) have been zapped", devices.split_whitespace().count()))]
        .into_iter()
        .collect())
}

fn add_disk(state: &mut SimState, unit: &str, params: &ActionParams) -> Result<BTreeMap<String, String>, String> {
    let devices = param(params, "osd-devices").ok_or("osd-devices is required")?;
    let u = unit_or_err(state, unit)?;
    for device in devices.split_whitespace() {
        match u.disks.get(device) {
            None => return Err(format!("{}: Device does not exist", device)),
            Some(disk) if disk.dirty => return Err(format!("{}: Non-pristine device", device)),
            Some(_) => {}
        }
    }
    for device in devices.split_whitespace() {
        if let Some(disk) = u.disks.get_mut(device) {
            disk.in_use = true;
        }
    }
    let count = osd_count(u);
    u.processes.insert("ceph-osd".to_string(), count);
    state.settle(unit, WorkloadState::Active, osd_ready(count));
    Ok(BTreeMap::new())
}

impl SimulationBuilder {
    /// Install the Ceph OSD cluster behaviour for `release`.
    pub fn ceph_osd(self, release: Release) -> Self {
        self.on_deploy(move |state, service| deploy(state, release, service))
            .on_relate(move |state, relation| relate(state, release, relation))
            .on_configure(|state, service, overlay| {
                if service == "ceph-osd" {
                    configure_osd(state, overlay);
                }
            })
            .command(move |state, unit, command| ceph_cli(state, release, unit, command))
            .action("ceph-osd", "pause", pause)
            .action("ceph-osd", "resume", resume)
            .action("ceph-osd", "blacklist-add-disk", blacklist_add)
            .action("ceph-osd", "blacklist-remove-disk", blacklist_remove)
            .action("ceph-osd", "list-disks", list_disks)
            .action("ceph-osd", "zap-disk", zap_disk)
            .action("ceph-osd", "add-disk", add_disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{ActionState, Orchestrator};
    use crate::sim::{SimTiming, Simulation};
    use verity_expect::ConfigDocument;
    use verity_topology::{Endpoint, ServiceSpec};

    fn timing() -> SimTiming {
        SimTiming {
            settle_polls: 0,
            relation_delay: 0,
            action_polls: 0,
            file_delay: 1,
            resource_polls: 1,
        }
    }

    async fn ceph_world(release: Release) -> Simulation {
        let sim = Simulation::builder().timing(timing()).ceph_osd(release).build();
        let orch = sim.orchestrator();
        orch.deploy(&ServiceSpec::new("ceph-mon").units(3)).await.unwrap();
        orch.deploy(&ServiceSpec::new("ceph-osd").units(3)).await.unwrap();
        orch.configure("ceph-mon", &ConfigOverlay::new().with("auth-supported", "none"))
            .await
            .unwrap();
        orch.relate(&RelationSpec::parse("ceph-osd:mon", "ceph-mon:osd").unwrap())
            .await
            .unwrap();
        sim
    }

    #[tokio::test]
    async fn test_osd_blocked_until_monitor_related() {
        let sim = Simulation::builder().timing(timing()).ceph_osd(Release::default()).build();
        let orch = sim.orchestrator();
        orch.deploy(&ServiceSpec::new("ceph-osd")).await.unwrap();

        let status = orch.status().await.unwrap();
        let unit = status.unit("ceph-osd/0").unwrap();
        assert_eq!(unit.workload, WorkloadState::Blocked);
        assert_eq!(unit.message, MISSING_MONITOR);

        let out = orch.run("ceph-osd/0", "sudo ceph health").await.unwrap();
        assert_eq!(out.code, 1);
    }

    #[tokio::test]
    async fn test_relation_renders_conf_and_settings() {
        let sim = ceph_world(Release::default()).await;
        let orch = sim.orchestrator();

        let status = orch.status().await.unwrap();
        assert_eq!(status.unit("ceph-osd/1").unwrap().message, "Unit is ready (2 OSD)");

        let remote = Endpoint::new("ceph-osd", "mon").unwrap();
        let bag = orch.relation_data("ceph-mon/2", "osd", &remote).await.unwrap().unwrap();
        assert_eq!(bag["auth"], "none");
        let fsid = orch.run("ceph-mon/0", "leader-get fsid").await.unwrap().stdout;
        assert_eq!(bag["fsid"], fsid.trim());

        let conf = orch.read_file("ceph-osd/0", CEPH_CONF).await.unwrap().unwrap();
        let doc = ConfigDocument::parse(&conf).unwrap();
        assert_eq!(doc.get("global", "auth client required"), Some("none"));
        assert_eq!(doc.get("osd", "osd journal size"), Some("1024"));
    }

    #[tokio::test]
    async fn test_lspools_format_depends_on_release() {
        let sim = ceph_world(Release::TrustyKilo).await;
        let out = sim.orchestrator().run("ceph-mon/0", "sudo ceph osd lspools").await.unwrap();
        assert_eq!(out.stdout, "0 rbd,\n");

        let sim = ceph_world(Release::BionicRocky).await;
        sim.mutate(|s| {
            s.create_pool("glance");
        })
        .await;
        let out = sim.orchestrator().run("ceph-osd/0", "ceph osd lspools").await.unwrap();
        assert_eq!(out.stdout, "0 glance\n");
    }

    #[tokio::test]
    async fn test_blacklist_rejects_bad_paths() {
        let sim = ceph_world(Release::default()).await;
        let orch = sim.orchestrator();
        let mut params = ActionParams::new();

        params.insert("osd-devices".to_string(), json!("vda"));
        let id = orch.enqueue_action("ceph-osd/0", "blacklist-add-disk", &params).await.unwrap();
        let outcome = orch.action_outcome(&id).await.unwrap();
        assert_eq!(outcome.state, ActionState::Failed);

        params.insert("osd-devices".to_string(), json!("/non-existent"));
        let id = orch.enqueue_action("ceph-osd/0", "blacklist-add-disk", &params).await.unwrap();
        assert_eq!(orch.action_outcome(&id).await.unwrap().state, ActionState::Failed);

        params.insert("osd-devices".to_string(), json!("/dev/vda"));
        let id = orch.enqueue_action("ceph-osd/0", "blacklist-add-disk", &params).await.unwrap();
        assert!(orch.action_outcome(&id).await.unwrap().completed());
        let listed = sim.mutate(|s| s.unit("ceph-osd/0").unwrap().blacklist.clone()).await;
        assert!(listed.contains("/dev/vda"));
    }

    #[tokio::test]
    async fn test_non_pristine_recovery() {
        let sim = ceph_world(Release::default()).await;
        let orch = sim.orchestrator();
        orch.configure(
            "ceph-osd",
            &ConfigOverlay::new()
                .with("ephemeral-unmount", "/mnt")
                .with("osd-devices", "/dev/vdb"),
        )
        .await
        .unwrap();
        let status = orch.status().await.unwrap();
        assert!(status.unit("ceph-osd/0").unwrap().message.starts_with("Non-pristine"));

        let mut add = ActionParams::new();
        add.insert("osd-devices".to_string(), json!("/dev/vdb"));
        let id = orch.enqueue_action("ceph-osd/0", "add-disk", &add).await.unwrap();
        assert_eq!(orch.action_outcome(&id).await.unwrap().state, ActionState::Failed);

        let mut zap = ActionParams::new();
        zap.insert("devices".to_string(), json!("/dev/vdb"));
        zap.insert("i-really-mean-it".to_string(), json!(true));
        let id = orch.enqueue_action("ceph-osd/0", "zap-disk", &zap).await.unwrap();
        assert!(orch.action_outcome(&id).await.unwrap().completed());

        let id = orch.enqueue_action("ceph-osd/0", "add-disk", &add).await.unwrap();
        assert!(orch.action_outcome(&id).await.unwrap().completed());
        let status = orch.status().await.unwrap();
        assert_eq!(status.unit("ceph-osd/0").unwrap().message, "Unit is ready (3 OSD)");
    }

    #[tokio::test]
    async fn test_encryption_schedules_key_directory() {
        let sim = ceph_world(Release::TrustyLiberty).await;
        let orch = sim.orchestrator();
        orch.configure("ceph-osd", &ConfigOverlay::new().with("osd-encrypt", "True"))
            .await
            .unwrap();

        assert!(orch.stat("ceph-osd/0", DMCRYPT_KEYS).await.unwrap().is_some());
    }
}
