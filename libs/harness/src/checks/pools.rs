//! Storage pool consistency and usage samples.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use verity_expect::{identical_mappings, missing_from, SamplePattern, SampleSeries};
use verity_poll::{poll, PollPolicy, Probe};

use super::{all_of, Check, CheckContext, CheckFailure};
use crate::cluster::UnitHandle;
use crate::config::{ImageSettings, VolumeSettings};
use crate::orchestrator::OrchestratorError;
use crate::report::CheckFamily;

const LSPOOLS: &str = "sudo ceph osd lspools";
const DF: &str = "sudo ceph df --format=json";

/// Parse `ceph osd lspools` output into `name -> id`.
///
/// Older releases print `0 rbd,1 glance,` on one line, newer ones print one
/// `id name` pair per line.
fn parse_lspools(output: &str) -> Result<BTreeMap<String, u32>, OrchestratorError> {
    let mut pools = BTreeMap::new();
    for entry in output.split([',', '\n']).map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry
            .split_once(char::is_whitespace)
            .and_then(|(id, name)| id.parse::<u32>().ok().map(|id| (name.trim().to_string(), id)));
        let Some((name, id)) = parsed else {
            return Err(OrchestratorError::Parse {
                command: LSPOOLS.to_string(),
                reason: format!("unexpected entry '{}'", entry),
            });
        };
        pools.insert(name, id);
    }
    Ok(pools)
}

/// Every listed unit sees the expected pools, with the same ids everywhere.
#[derive(Debug, Clone)]
pub struct PoolConsistencyCheck {
    name: String,
    units: Vec<String>,
    expected: Vec<String>,
}

impl PoolConsistencyCheck {
    pub fn new<I, S>(name: impl Into<String>, units: I, expected: &[&str]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            units: units.into_iter().map(Into::into).collect(),
            expected: expected.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Check for PoolConsistencyCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Resource
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let mut listings = Vec::with_capacity(self.units.len());
        let mut missing = Vec::new();

        for unit_name in &self.units {
            let unit = ctx.cluster.unit(unit_name)?;
            let pools = parse_lspools(&unit.run_ok(LSPOOLS).await?)?;
            debug!(unit = %unit, pools = ?pools, "Listed pools");
            for pool in missing_from(&pools, &self.expected) {
                missing.push(format!("{} does not have pool: {}", unit, pool));
            }
            listings.push((unit.name().to_string(), pools));
        }
        all_of(missing)?;

        identical_mappings(&listings).map_err(|diff| {
            CheckFailure::assertion(format!(
                "{}; pool lists are not identical on all ceph units",
                diff
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct DfReport {
    pools: Vec<DfPool>,
}

#[derive(Debug, Deserialize)]
struct DfPool {
    name: String,
    stats: DfStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct DfStats {
    objects: u64,
    kb_used: u64,
}

/// Cloud resource whose lifecycle is sampled.
#[derive(Debug, Clone)]
pub enum PoolResource {
    Volume(VolumeSettings),
    Image(ImageSettings),
}

impl PoolResource {
    fn kind(&self) -> &'static str {
        match self {
            Self::Volume(_) => "volume",
            Self::Image(_) => "image",
        }
    }
}

/// Samples a pool before creating a resource, after creating it and after
/// deleting it.
///
/// Object counts must round-trip; usage must not drop on create unless the
/// usage gate applies to the release.
#[derive(Debug, Clone)]
pub struct PoolSampleCheck {
    name: String,
    resource: PoolResource,
    pool: String,
    sample_unit: String,
    usage_gate: Option<String>,
    policy: PollPolicy,
}

impl PoolSampleCheck {
    pub fn new(
        name: impl Into<String>,
        resource: PoolResource,
        pool: impl Into<String>,
        sample_unit: impl Into<String>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            resource,
            pool: pool.into(),
            sample_unit: sample_unit.into(),
            usage_gate: None,
            policy,
        }
    }

    /// Gate name consulted before asserting on usage.
    pub fn usage_gate(mut self, gate: impl Into<String>) -> Self {
        self.usage_gate = Some(gate.into());
        self
    }

    async fn sample(&self, unit: &UnitHandle) -> Result<DfStats, CheckFailure> {
        let raw = unit.run_ok(DF).await?;
        let report: DfReport = serde_json::from_str(&raw).map_err(|e| OrchestratorError::Parse {
            command: DF.to_string(),
            reason: e.to_string(),
        })?;
        report
            .pools
            .into_iter()
            .find(|p| p.name == self.pool)
            .map(|p| p.stats)
            .ok_or_else(|| CheckFailure::assertion(format!("pool {} does not exist", self.pool)))
    }

    /// Sample until the object count moves away from `from`, or take the last
    /// sample once the policy is spent.
    async fn sample_change(&self, unit: &UnitHandle, from: DfStats, after: &str) -> Result<DfStats, CheckFailure> {
        let what = format!("{} pool to change after {}", self.pool, after);
        let result = poll(&what, self.policy, move |_| async move {
            let stats = self.sample(unit).await?;
            if stats.objects != from.objects {
                Ok(Probe::Ready(stats))
            } else {
                Ok::<_, CheckFailure>(Probe::pending(format!("{} objects", stats.objects)))
            }
        })
        .await;

        match result {
            Ok(stats) => Ok(stats),
            Err(err) => match err.into_abort() {
                Err(source) => Err(source),
                Ok(exhausted) => {
                    debug!(pool = %self.pool, error = %exhausted, "Pool did not change");
                    self.sample(unit).await
                }
            },
        }
    }

    async fn cycle(&self, ctx: &CheckContext<'_>, unit: &UnitHandle, before: DfStats) -> Result<[DfStats; 2], CheckFailure> {
        match &self.resource {
            PoolResource::Volume(volume) => {
                let volumes = ctx.admin.volumes();
                let created = volumes.create(&volume.name, volume.size_gb).await?;
                let after_create = self.sample_change(unit, before, "volume create").await;
                let deleted = volumes.delete(&created.id).await;
                let after_create = after_create?;
                deleted?;
                let after_delete = self.sample_change(unit, after_create, "volume delete").await?;
                Ok([after_create, after_delete])
            }
            PoolResource::Image(image) => {
                let images = ctx.admin.images();
                let payload = image.payload().await?;
                let created = images
                    .create(&image.name, &image.disk_format, &image.container_format, payload)
                    .await?;
                let after_create = self.sample_change(unit, before, "image create").await;
                let deleted = images.delete(&created.id).await;
                let after_create = after_create?;
                deleted?;
                let after_delete = self.sample_change(unit, after_create, "image delete").await?;
                Ok([after_create, after_delete])
            }
        }
    }
}

#[async_trait]
impl Check for PoolSampleCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Resource
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let unit = ctx.cluster.unit(&self.sample_unit)?;
        let before = self.sample(unit).await?;
        let [after_create, after_delete] = self.cycle(ctx, unit, before).await?;
        info!(
            pool = %self.pool,
            resource = self.resource.kind(),
            objects = ?[before.objects, after_create.objects, after_delete.objects],
            kb_used = ?[before.kb_used, after_create.kb_used, after_delete.kb_used],
            "Sampled pool"
        );

        let mut violations = Vec::new();
        let objects = SampleSeries::new(
            format!("{} objects", self.pool),
            before.objects,
            after_create.objects,
            after_delete.objects,
        );
        if let Err(message) = objects.validate(SamplePattern::RoundTrip) {
            violations.push(message);
        }

        let gated = self
            .usage_gate
            .as_deref()
            .and_then(|gate| ctx.gates.skip_reason(gate, ctx.release()));
        match gated {
            Some(reason) => debug!(pool = %self.pool, reason, "Skipping usage assertion"),
            None => {
                let usage = SampleSeries::new(
                    format!("{} kb_used", self.pool),
                    before.kb_used,
                    after_create.kb_used,
                    after_delete.kb_used,
                );
                if let Err(message) = usage.validate(SamplePattern::NonDecreasingOnCreate) {
                    violations.push(message);
                }
            }
        }
        all_of(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::{ceph_world, ceph_world_from, policy};
    use crate::gates::CINDER_POOL_USAGE;
    use crate::orchestrator::CommandOutput;
    use crate::release::Release;
    use crate::sim::Simulation;

    #[test]
    fn test_parse_lspools_formats() {
        let old = parse_lspools("0 rbd,1 cinder-ceph,2 glance,\n").unwrap();
        let new = parse_lspools("0 rbd\n1 cinder-ceph\n2 glance\n").unwrap();
        assert_eq!(old, new);
        assert_eq!(old["glance"], 2);
        assert!(parse_lspools("").unwrap().is_empty());
        assert!(parse_lspools("rbd,glance").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pools_consistent_across_units() {
        let world = ceph_world(Release::XenialQueens).await;
        let check = PoolConsistencyCheck::new(
            "pools",
            ["ceph-mon/0", "ceph-mon/1", "ceph-osd/0"],
            &Release::XenialQueens.expected_pools(),
        );
        check.run(&world.ctx()).await.unwrap();

        let check = PoolConsistencyCheck::new("pools", ["ceph-mon/0"], &["glance", "rbd"]);
        let err = check.run(&world.ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "ceph-mon/0 does not have pool: rbd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_and_image_round_trip() {
        let world = ceph_world(Release::XenialQueens).await;
        let volume = PoolSampleCheck::new(
            "cinder pool",
            PoolResource::Volume(VolumeSettings::default()),
            "cinder-ceph",
            "ceph-mon/0",
            policy(),
        )
        .usage_gate(CINDER_POOL_USAGE);
        volume.run(&world.ctx()).await.unwrap();

        let image = PoolSampleCheck::new(
            "glance pool",
            PoolResource::Image(ImageSettings::default()),
            "glance",
            "ceph-mon/0",
            policy(),
        );
        image.run(&world.ctx()).await.unwrap();

        let left = world.sim.mutate(|state| state.pools["glance"].objects).await;
        assert_eq!(left, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untouched_pool_violates_round_trip() {
        let world = ceph_world(Release::XenialQueens).await;
        let check = PoolSampleCheck::new(
            "wrong pool",
            PoolResource::Volume(VolumeSettings::default()),
            "glance",
            "ceph-mon/0",
            policy(),
        );
        let err = check.run(&world.ctx()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "glance objects samples 0 -> 0 -> 0 violate round-trip pattern"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_deleted_when_sampling_fails() {
        let failing_df = Simulation::builder().command(|state, _unit, command| {
            (command == DF && !state.volumes.is_empty()).then(|| CommandOutput {
                stdout: String::new(),
                stderr: "error connecting to the cluster".to_string(),
                code: 1,
            })
        });
        let world = ceph_world_from(failing_df, Release::XenialQueens).await;
        let check = PoolSampleCheck::new(
            "cinder pool",
            PoolResource::Volume(VolumeSettings::default()),
            "cinder-ceph",
            "ceph-mon/0",
            policy(),
        );
        let err = check.run(&world.ctx()).await.unwrap_err();
        assert!(err.to_string().contains("ceph df"), "{}", err);

        let left = world.sim.mutate(|state| state.volumes.len()).await;
        assert_eq!(left, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pool_is_assertion() {
        let world = ceph_world(Release::XenialQueens).await;
        let check = PoolSampleCheck::new(
            "no pool",
            PoolResource::Volume(VolumeSettings::default()),
            "rbd",
            "ceph-mon/0",
            policy(),
        );
        let err = check.run(&world.ctx()).await.unwrap_err();
        assert!(matches!(err, CheckFailure::Assertion(ref m) if m == "pool rbd does not exist"));
    }
}
