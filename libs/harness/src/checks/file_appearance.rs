//! Files that appear after a configuration change.

use async_trait::async_trait;
use tracing::{info, warn};
use verity_poll::{poll, PollError, PollPolicy, Probe};
use verity_topology::ConfigOverlay;

use super::{Check, CheckContext, CheckFailure};
use crate::cluster::UnitHandle;
use crate::orchestrator::{FileStat, OrchestratorError};
use crate::report::CheckFamily;

/// Applies `alternate` to a service, waits for `path` to show up on a unit
/// and checks it was written after the change.
///
/// The `default` overlay is applied afterwards whatever the outcome.
#[derive(Debug, Clone)]
pub struct FileAppearanceCheck {
    name: String,
    unit: String,
    service: String,
    alternate: ConfigOverlay,
    default: ConfigOverlay,
    path: String,
    policy: PollPolicy,
}

impl FileAppearanceCheck {
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        path: impl Into<String>,
        policy: PollPolicy,
    ) -> Self {
        let unit = unit.into();
        let service = unit.split('/').next().unwrap_or_default().to_string();
        Self {
            name: name.into(),
            unit,
            service,
            alternate: ConfigOverlay::new(),
            default: ConfigOverlay::new(),
            path: path.into(),
            policy,
        }
    }

    /// Overlay under test and the overlay restored afterwards.
    pub fn overlays(mut self, alternate: ConfigOverlay, default: ConfigOverlay) -> Self {
        self.alternate = alternate;
        self.default = default;
        self
    }

    async fn wait_for_file(&self, unit: &UnitHandle) -> Result<FileStat, CheckFailure> {
        let path = self.path.as_str();
        let what = format!("{} on {}", path, unit);
        let result = poll(&what, self.policy, move |_| async move {
            Ok::<_, OrchestratorError>(match unit.stat(path).await? {
                Some(stat) => Probe::Ready(stat),
                None => Probe::pending(format!("{} does not exist yet", path)),
            })
        })
        .await;

        match result {
            Ok(stat) => Ok(stat),
            Err(PollError::Aborted { source, .. }) => Err(source.into()),
            Err(PollError::Exhausted { attempts, elapsed, .. }) => Err(CheckFailure::assertion(format!(
                "{} did not appear on {} after {} attempts ({:?})",
                path, unit, attempts, elapsed
            ))),
        }
    }

    async fn change_and_observe(&self, ctx: &CheckContext<'_>, unit: &UnitHandle) -> Result<(), CheckFailure> {
        let clock = unit.clock().await?;
        info!(service = %self.service, unit = %unit, path = %self.path, "Applying config change");
        ctx.driver.reconfigure(&self.service, &self.alternate).await?;

        let stat = self.wait_for_file(unit).await?;
        if stat.mtime < clock {
            return Err(CheckFailure::assertion(format!(
                "{} on {} was modified at {}, before the change at {}",
                self.path, unit, stat.mtime, clock
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Check for FileAppearanceCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::FileAppearance
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let unit = ctx.cluster.unit(&self.unit)?;
        let observed = self.change_and_observe(ctx, unit).await;

        info!(service = %self.service, "Restoring default config");
        let restored = ctx.driver.reconfigure(&self.service, &self.default).await;
        match (observed, restored) {
            (Err(failure), Err(err)) => {
                warn!(service = %self.service, error = %err, "Could not restore default config");
                Err(failure)
            }
            (Err(failure), Ok(())) => Err(failure),
            (Ok(()), restored) => Ok(restored?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::{ceph_world, policy};
    use crate::release::Release;
    use crate::scenario::ceph_osd::DMCRYPT_KEYS;

    fn encryption(path: &str) -> FileAppearanceCheck {
        FileAppearanceCheck::new("ceph-osd disk encryption", "ceph-osd/0", path, policy()).overlays(
            ConfigOverlay::new()
                .with("osd-encrypt", "True")
                .with("osd-devices", "/dev/vdb /srv/ceph /srv/ceph_encrypted"),
            ConfigOverlay::new()
                .with("osd-encrypt", "False")
                .with("osd-devices", "/dev/vdb /srv/ceph"),
        )
    }

    async fn osd_config(world: &crate::checks::testing::World, key: &str) -> Option<String> {
        world
            .sim
            .mutate(|state| state.service_config("ceph-osd").and_then(|c| c.get(key)).map(str::to_string))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_directory_appears_and_config_is_restored() {
        let world = ceph_world(Release::XenialQueens).await;
        encryption(DMCRYPT_KEYS).run(&world.ctx()).await.unwrap();
        assert_eq!(osd_config(&world, "osd-encrypt").await.as_deref(), Some("False"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_still_restores() {
        let world = ceph_world(Release::XenialQueens).await;
        let err = encryption("/etc/ceph/never-written").run(&world.ctx()).await.unwrap_err();
        assert!(
            matches!(err, CheckFailure::Assertion(ref m) if m.starts_with("/etc/ceph/never-written did not appear on ceph-osd/0")),
            "{err}"
        );
        assert_eq!(
            osd_config(&world, "osd-devices").await.as_deref(),
            Some("/dev/vdb /srv/ceph")
        );
    }
}
