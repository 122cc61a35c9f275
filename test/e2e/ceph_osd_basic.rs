//! End-to-end runs of the Ceph OSD scenario against the simulation.
//!
//! Each test converges the full topology, authenticates, runs every check and
//! inspects the report:
//!
//! 1. A healthy cluster passes on systemd and upstart releases
//! 2. Every OSD unit renders the monitors' fsid
//! 3. A broken rendered config fails the run and names the check
//!
//! ## Running
//!
//! ```bash
//! cargo test -p verity-e2e --test ceph_osd_basic
//! ```

use verity_expect::ConfigDocument;
use verity_harness::config::Backend;
use verity_harness::report::Outcome;
use verity_harness::scenario::ceph_osd::{self, CEPH_CONF};
use verity_harness::sim::Simulation;
use verity_harness::{run_scenario, Backends, HarnessConfig, HarnessError, Release};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn config(release: Release) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.orchestrator.backend = Backend::Simulated;
    config.release = release;
    config
}

fn simulation(config: &HarnessConfig) -> Simulation {
    Simulation::builder()
        .ceph_osd(config.release)
        .admin(config.credentials.clone())
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_healthy_cluster_passes() {
    init_tracing();
    let config = config(Release::XenialQueens);
    let scenario = ceph_osd::scenario(&config).unwrap();
    let checks = scenario.checks().count();

    let report = run_scenario(scenario, &Backends::from_config(&config), &config)
        .await
        .unwrap();

    assert_eq!(report.results.len(), checks);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.skipped(), 1);
    let skipped = report
        .results
        .iter()
        .find(|r| matches!(r.outcome, Outcome::Skipped(_)))
        .unwrap();
    assert_eq!(skipped.name, "ceph-osd disk encryption");
}

#[tokio::test(start_paused = true)]
async fn test_upstart_release_runs_encryption_check() {
    init_tracing();
    let config = config(Release::TrustyLiberty);
    let scenario = ceph_osd::scenario(&config).unwrap();

    let report = run_scenario(scenario, &Backends::from_config(&config), &config)
        .await
        .unwrap();

    assert_eq!(report.failed(), 0);
    assert_eq!(report.skipped(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_osd_units_share_monitor_fsid() {
    init_tracing();
    let config = config(Release::XenialQueens);
    let sim = simulation(&config);
    let scenario = ceph_osd::scenario(&config).unwrap();
    run_scenario(scenario, &Backends::simulated(&sim), &config)
        .await
        .unwrap();

    let (fsid, confs) = sim
        .mutate(|state| {
            let fsid = state.leader_settings["ceph-mon"]["fsid"].clone();
            let confs: Vec<String> = state
                .units_of("ceph-osd")
                .iter()
                .filter_map(|unit| state.unit(unit)?.files.get(CEPH_CONF)?.content.clone())
                .collect();
            (fsid, confs)
        })
        .await;

    assert_eq!(confs.len(), 3);
    for conf in confs {
        let doc = ConfigDocument::parse(&conf).unwrap();
        assert_eq!(doc.get("global", "fsid"), Some(fsid.as_str()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_broken_config_names_failing_check() {
    init_tracing();
    let mut config = config(Release::XenialQueens);
    config.run.keep_going = true;

    let sim = Simulation::builder()
        .ceph_osd(config.release)
        .on_relate(|state, relation| {
            if relation.involves("ceph-osd") && relation.involves("ceph-mon") {
                let Some(conf) = state
                    .unit("ceph-osd/0")
                    .and_then(|u| u.files.get(CEPH_CONF))
                    .and_then(|f| f.content.clone())
                else {
                    return;
                };
                let broken = conf.replace("auth cluster required = none", "auth cluster required = cephx");
                state.write_file("ceph-osd/0", CEPH_CONF, broken);
            }
        })
        .admin(config.credentials.clone())
        .build();

    let scenario = ceph_osd::scenario(&config).unwrap();
    let err = run_scenario(scenario, &Backends::simulated(&sim), &config)
        .await
        .unwrap_err();

    let HarnessError::ChecksFailed(failure) = err else {
        panic!("expected ChecksFailed, got {err}");
    };
    assert_eq!(failure.failures.len(), 1);
    assert_eq!(failure.failures[0].check, "ceph config");
    assert!(
        failure.failures[0].message.contains("auth cluster required"),
        "{}",
        failure.failures[0].message
    );
    assert_eq!(failure.run.failed(), 1);
    assert_eq!(failure.run.results.len(), 21);
}
