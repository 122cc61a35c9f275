//! Process and service liveness.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;
use verity_expect::{count_pids, ProcessCount};

use super::{all_of, Check, CheckContext, CheckFailure};
use crate::release::InitSystem;
use crate::report::CheckFamily;

/// Expected process counts per unit, counted with `pidof -x`.
#[derive(Debug, Clone)]
pub struct ProcessCheck {
    name: String,
    expected: BTreeMap<String, BTreeMap<String, ProcessCount>>,
}

impl ProcessCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: BTreeMap::new(),
        }
    }

    /// Expect `count` processes named `process` on `unit`.
    pub fn expect(mut self, unit: impl Into<String>, process: impl Into<String>, count: ProcessCount) -> Self {
        self.expected
            .entry(unit.into())
            .or_default()
            .insert(process.into(), count);
        self
    }
}

#[async_trait]
impl Check for ProcessCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Process
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let mut mismatches = Vec::new();
        for (unit_name, processes) in &self.expected {
            let unit = ctx.cluster.unit(unit_name)?;
            for (process, expected) in processes {
                // pidof exits non-zero when nothing matches; that is a count of zero.
                let output = unit.run(&format!("pidof -x {}", process)).await?;
                let count = count_pids(&output.stdout);
                debug!(unit = %unit, process, count, expected = %expected, "Counted processes");
                if !expected.accepts(count) {
                    mismatches.push(format!(
                        "{} {} PID count {} != expected {}",
                        unit, process, count, expected
                    ));
                }
            }
        }
        all_of(mismatches)
    }
}

/// Services that must be running, asked of the init system.
#[derive(Debug, Clone)]
pub struct ServiceCheck {
    name: String,
    expected: BTreeMap<String, Vec<String>>,
}

impl ServiceCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: BTreeMap::new(),
        }
    }

    pub fn expect<I, S>(mut self, unit: impl Into<String>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected
            .entry(unit.into())
            .or_default()
            .extend(services.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Check for ServiceCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Process
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let init = ctx.release().init_system();
        let mut stopped = Vec::new();

        for (unit_name, services) in &self.expected {
            let unit = ctx.cluster.unit(unit_name)?;
            for service in services {
                let running = match init {
                    InitSystem::Systemd => unit
                        .run(&format!("systemctl is-active --quiet {}", service))
                        .await?
                        .success(),
                    InitSystem::Upstart => unit
                        .run(&format!("status {}", service))
                        .await?
                        .stdout
                        .contains("start/running"),
                };
                if !running {
                    stopped.push(format!("{} {} is not running", unit, service));
                }
            }
        }
        all_of(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::ceph_world;
    use crate::release::Release;

    #[tokio::test(start_paused = true)]
    async fn test_process_counts() {
        let world = ceph_world(Release::XenialQueens).await;
        let check = ProcessCheck::new("ceph processes")
            .expect("ceph-mon/0", "ceph-mon", ProcessCount::Exact(1))
            .expect("ceph-osd/0", "ceph-osd", ProcessCount::Between { min: 2, max: 3 });
        check.run(&world.ctx()).await.unwrap();

        let wrong = ProcessCheck::new("ceph processes")
            .expect("ceph-mon/1", "ceph-mon", ProcessCount::Exact(2))
            .expect("ceph-mon/2", "ceph-osd", ProcessCount::Absent);
        let err = wrong.run(&world.ctx()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ceph-mon/1 ceph-mon PID count 1 != expected 2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_follow_init_system() {
        let world = ceph_world(Release::TrustyLiberty).await;
        let check = ServiceCheck::new("services")
            .expect("ceph-mon/0", ["ceph-mon-all"])
            .expect("ceph-osd/0", ["ceph-osd-all"])
            .expect("keystone/0", ["apache2"]);
        check.run(&world.ctx()).await.unwrap();

        let world = ceph_world(Release::BionicQueens).await;
        let check = ServiceCheck::new("services").expect("glance/0", ["glance-api", "glance-scrubber"]);
        let err = check.run(&world.ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "glance/0 glance-scrubber is not running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_unit_is_infrastructure() {
        let world = ceph_world(Release::XenialQueens).await;
        let check = ProcessCheck::new("x").expect("ceph-mon/7", "ceph-mon", ProcessCount::Running);
        let err = check.run(&world.ctx()).await.unwrap_err();
        assert!(matches!(err, CheckFailure::Infrastructure(_)));
    }
}
