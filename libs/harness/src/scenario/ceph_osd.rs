//! Basic Ceph OSD deployment.
//!
//! Three OSD units and three monitors behind the OpenStack services that
//! consume them. The checks cover ceph processes and services, the
//! monitor/OSD relation, rendered client configs, pools, the ceph CLI and the
//! ceph-osd actions.

use regex::Regex;
use verity_expect::{Expected, ProcessCount};
use verity_topology::{ConfigOverlay, Endpoint, ServiceSpec, StorageSpec, Topology};

use super::Scenario;
use crate::checks::{
    ActionCall, ActionScript, ActionTarget, Check, CommandCheck, ConfigFileCheck, ExpectedValue,
    Expectation, FileAppearanceCheck, PoolConsistencyCheck, PoolResource, PoolSampleCheck,
    PrincipalIsolationCheck, ProcessCheck, RelationCheck, ServiceCheck,
};
use crate::config::HarnessConfig;
use crate::driver::SteadyState;
use crate::error::{HarnessError, Result};
use crate::gates::{CINDER_POOL_USAGE, ENCRYPTION_CHECK};
use crate::orchestrator::WorkloadState;
use crate::release::{InitSystem, Release};

pub const NAME: &str = "ceph-osd-basic";

pub const CEPH_CONF: &str = "/etc/ceph/ceph.conf";
pub const DMCRYPT_KEYS: &str = "/etc/ceph/dmcrypt-keys";

const MONS: [&str; 3] = ["ceph-mon/0", "ceph-mon/1", "ceph-mon/2"];
const OSD: &str = "ceph-osd/0";

/// The bundled topology.
pub fn topology() -> Result<Topology> {
    let topology = Topology::builder()
        .service(
            ServiceSpec::new("ceph-osd")
                .units(3)
                .storage("osd-devices", StorageSpec::new("cinder", "10G"))
                // Includes a non-existent device: osd-devices is a whitelist.
                .config(ConfigOverlay::new().with("osd-devices", "/srv/ceph /dev/test-non-existent")),
        )
        .service(
            ServiceSpec::new("ceph-mon").units(3).config(
                ConfigOverlay::new()
                    .with("monitor-count", "3")
                    .with("auth-supported", "none"),
            ),
        )
        .service(ServiceSpec::new("percona-cluster").config(ConfigOverlay::new().with("max-connections", "1000")))
        .service(
            ServiceSpec::new("keystone").config(
                ConfigOverlay::new()
                    .with("admin-password", "openstack")
                    .with("admin-token", "ubuntutesting"),
            ),
        )
        .service(ServiceSpec::new("rabbitmq-server"))
        .service(ServiceSpec::new("nova-compute"))
        .service(ServiceSpec::new("glance"))
        .service(
            ServiceSpec::new("cinder").config(
                ConfigOverlay::new()
                    .with("block-device", "None")
                    .with("glance-api-version", "2"),
            ),
        )
        .service(ServiceSpec::new("cinder-ceph"))
        .relate("nova-compute:amqp", "rabbitmq-server:amqp")
        .relate("nova-compute:image-service", "glance:image-service")
        .relate("nova-compute:ceph", "ceph-mon:client")
        .relate("keystone:shared-db", "percona-cluster:shared-db")
        .relate("glance:shared-db", "percona-cluster:shared-db")
        .relate("glance:identity-service", "keystone:identity-service")
        .relate("glance:amqp", "rabbitmq-server:amqp")
        .relate("glance:ceph", "ceph-mon:client")
        .relate("cinder:shared-db", "percona-cluster:shared-db")
        .relate("cinder:identity-service", "keystone:identity-service")
        .relate("cinder:amqp", "rabbitmq-server:amqp")
        .relate("cinder:image-service", "glance:image-service")
        .relate("cinder-ceph:storage-backend", "cinder:storage-backend")
        .relate("cinder-ceph:ceph", "ceph-mon:client")
        .relate("ceph-osd:mon", "ceph-mon:osd")
        .build()?;
    Ok(topology)
}

fn endpoint(spec: &str) -> Result<Endpoint> {
    spec.parse::<Endpoint>().map_err(HarnessError::from)
}

fn processes() -> ProcessCheck {
    MONS.iter()
        .fold(ProcessCheck::new("ceph processes"), |check, mon| {
            check.expect(*mon, "ceph-mon", ProcessCount::Exact(1))
        })
        .expect(OSD, "ceph-osd", ProcessCount::Between { min: 2, max: 3 })
}

fn services(release: Release) -> ServiceCheck {
    let mut check = ServiceCheck::new("services")
        .expect("glance/0", ["glance-registry", "glance-api"])
        .expect(
            "cinder/0",
            ["cinder-scheduler", "cinder-volume", release.cinder_api_service()],
        );
    if release.init_system() == InitSystem::Upstart {
        for mon in MONS {
            check = check.expect(mon, ["ceph-mon-all", "ceph-mon"]);
        }
        check = check.expect(OSD, ["ceph-osd-all", "ceph-osd"]);
    }
    if release.keystone_behind_apache() {
        check = check.expect("keystone/0", ["apache2"]);
    }
    check
}

fn relations(config: &HarnessConfig) -> Result<Vec<Box<dyn Check>>> {
    let policy = config.waits.relation();
    let mut checks: Vec<Box<dyn Check>> = vec![Box::new(
        RelationCheck::new("ceph-osd to ceph-mon relation", "mon", endpoint("ceph-mon:osd")?, policy)
            .unit(OSD)
            .expect("private-address", Expected::ValidIp),
    )];

    for mon in MONS {
        checks.push(Box::new(
            RelationCheck::new(format!("{} to ceph-osd relation", mon), "osd", endpoint("ceph-osd:mon")?, policy)
                .unit(mon)
                .expect("osd_bootstrap_key", Expected::NotNull)
                .expect("private-address", Expected::ValidIp)
                .expect("auth", "none")
                .expect("ceph-public-address", Expected::ValidIp)
                .expect("fsid", ExpectedValue::leader_get(mon, "fsid")),
        ));
    }

    let agreement = MONS.iter().fold(
        RelationCheck::new("ceph fsid agreement", "osd", endpoint("ceph-osd:mon")?, policy),
        |check, mon| check.unit(*mon),
    );
    checks.push(Box::new(agreement.agree_on("fsid")));
    Ok(checks)
}

fn config_files(release: Release) -> Vec<Box<dyn Check>> {
    let ceph_conf = ConfigFileCheck::new("ceph config", OSD, CEPH_CONF)
        .expect("global", "auth cluster required", "none")
        .expect("global", "auth service required", "none")
        .expect("global", "auth client required", "none")
        .expect("global", "fsid", ExpectedValue::leader_get(MONS[0], "fsid"))
        .expect("global", "log to syslog", "false")
        .expect("global", "err to syslog", "false")
        .expect("global", "clog to syslog", "false")
        .expect("mon", "keyring", "/var/lib/ceph/mon/$cluster-$id/keyring")
        .expect("mds", "keyring", "/var/lib/ceph/mds/$cluster-$id/keyring")
        .expect("osd", "keyring", "/var/lib/ceph/osd/$cluster-$id/keyring")
        .expect("osd", "osd journal size", "1024")
        .expect("osd", "filestore xattr use omap", "true");

    let cinder = ConfigFileCheck::new("cinder rbd config", "cinder/0", "/etc/cinder/cinder.conf").expect(
        "cinder-ceph",
        "volume_driver",
        "cinder.volume.drivers.rbd.RBDDriver",
    );

    let section = release.glance_store_section();
    let mut glance = ConfigFileCheck::new("glance rbd config", "glance/0", "/etc/glance/glance-api.conf")
        .expect(section, "default_store", "rbd")
        .expect(section, "rbd_store_ceph_conf", CEPH_CONF)
        .expect(section, "rbd_store_user", "glance")
        .expect(section, "rbd_store_pool", "glance")
        .expect(section, "rbd_store_chunk_size", "8");
    if release >= Release::TrustyKilo {
        glance = glance.expect(
            section,
            "stores",
            "glance.store.filesystem.Store,glance.store.http.Store,glance.store.rbd.Store",
        );
    }

    let nova = ConfigFileCheck::new("nova rbd config", "nova-compute/0", "/etc/nova/nova.conf")
        .expect("libvirt", "rbd_user", "nova-compute")
        .expect("libvirt", "rbd_secret_uuid", Expected::NotNull);

    vec![Box::new(ceph_conf), Box::new(cinder), Box::new(glance), Box::new(nova)]
}

fn storage(config: &HarnessConfig) -> Vec<Box<dyn Check>> {
    let ceph_units = [OSD, MONS[0], MONS[1], MONS[2]];
    let policy = config.waits.resource();

    vec![
        Box::new(PoolConsistencyCheck::new(
            "ceph pools",
            ceph_units,
            &config.release.expected_pools(),
        )),
        Box::new(
            PoolSampleCheck::new(
                "cinder volume pool samples",
                PoolResource::Volume(config.volume.clone()),
                "cinder-ceph",
                MONS[0],
                policy,
            )
            .usage_gate(CINDER_POOL_USAGE),
        ),
        Box::new(PoolSampleCheck::new(
            "glance image pool samples",
            PoolResource::Image(config.image.clone()),
            "glance",
            MONS[0],
            policy,
        )),
        Box::new(CommandCheck::new(
            "ceph commands exit zero",
            ceph_units,
            [
                "sudo ceph health",
                "sudo ceph mds stat",
                "sudo ceph pg stat",
                "sudo ceph osd stat",
                "sudo ceph mon stat",
            ],
        )),
    ]
}

fn osd_unit() -> ActionTarget {
    ActionTarget::Unit(OSD.to_string())
}

fn all_osds() -> ActionTarget {
    ActionTarget::AllUnits("ceph-osd".to_string())
}

fn blacklist_add(device: &str, expect: Expectation) -> ActionCall {
    ActionCall::new(osd_unit(), "blacklist-add-disk")
        .param("osd-devices", device)
        .expect(expect)
}

fn actions(config: &HarnessConfig) -> Result<Vec<Box<dyn Check>>> {
    let policy = config.waits.action();
    let non_pristine = Regex::new("Non-pristine.*")
        .map_err(|e| HarnessError::Config(format!("invalid status pattern: {}", e)))?;

    let encryption = FileAppearanceCheck::new(ENCRYPTION_CHECK, OSD, DMCRYPT_KEYS, config.waits.file()).overlays(
        ConfigOverlay::new()
            .with("osd-encrypt", "True")
            .with("osd-devices", "/dev/vdb /srv/ceph /srv/ceph_encrypted"),
        ConfigOverlay::new()
            .with("osd-encrypt", "False")
            .with("osd-devices", "/dev/vdb /srv/ceph"),
    );

    let recovery = ActionScript::new("non-pristine disk recovery", policy)
        .configure(
            "ceph-osd",
            ConfigOverlay::new()
                .with("ephemeral-unmount", "/mnt")
                .with("osd-devices", "/dev/vdb"),
        )
        .await_status(
            SteadyState::default()
                .allow([WorkloadState::Blocked])
                .message(non_pristine)
                .include_only(["ceph-osd"]),
        )
        .invoke(
            ActionCall::new(all_osds(), "zap-disk")
                .param("devices", "/dev/vdb")
                .param("i-really-mean-it", true),
        )
        .invoke(ActionCall::new(all_osds(), "add-disk").param("osd-devices", "/dev/vdb"))
        .await_status(SteadyState::default().include_only(["ceph-osd"]));

    let pause_resume = ActionScript::new("pause and resume", policy)
        .assert_status(OSD, WorkloadState::Active)
        .invoke(ActionCall::new(osd_unit(), "pause"))
        .assert_status(OSD, WorkloadState::Maintenance)
        .invoke(ActionCall::new(osd_unit(), "resume"))
        .assert_status(OSD, WorkloadState::Active);

    let blacklist = ActionScript::new("blacklist actions", policy)
        .assert_status(OSD, WorkloadState::Active)
        .invoke(blacklist_add("vda", Expectation::Rejected))
        .assert_status(OSD, WorkloadState::Active)
        .invoke(blacklist_add("/non-existent", Expectation::Rejected))
        .assert_status(OSD, WorkloadState::Active)
        .invoke(blacklist_add("/dev/vda", Expectation::Completes))
        .assert_status(OSD, WorkloadState::Active)
        .invoke(ActionCall::new(osd_unit(), "blacklist-remove-disk").param("osd-devices", "/dev/vda"))
        .assert_status(OSD, WorkloadState::Active);

    let list_disks = ActionScript::new("list-disks action", policy)
        .assert_status(OSD, WorkloadState::Active)
        .invoke(ActionCall::new(osd_unit(), "list-disks"))
        .assert_status(OSD, WorkloadState::Active);

    Ok(vec![
        Box::new(encryption),
        Box::new(recovery),
        Box::new(pause_resume),
        Box::new(blacklist),
        Box::new(list_disks),
    ])
}

/// Checks in run order.
pub fn checks(config: &HarnessConfig) -> Result<Vec<Box<dyn Check>>> {
    let mut checks: Vec<Box<dyn Check>> = vec![
        Box::new(processes()),
        Box::new(services(config.release)),
        Box::new(PrincipalIsolationCheck::new("principal isolation")),
    ];
    checks.extend(relations(config)?);
    checks.extend(config_files(config.release));
    checks.extend(storage(config));
    checks.extend(actions(config)?);
    Ok(checks)
}

/// The scenario with the configured topology file, or the bundled topology.
pub fn scenario(config: &HarnessConfig) -> Result<Scenario> {
    let topology = match &config.deploy.topology {
        Some(path) => Topology::from_path(path)?,
        None => topology()?,
    };
    Ok(Scenario::new(NAME, topology, checks(config)?))
}
