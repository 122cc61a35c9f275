//! Checks command - list what a run would verify.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use verity_harness::scenario::ceph_osd;

use crate::output::print_output;

use super::CommandContext;

/// List the checks in run order and whether the configured release skips them.
#[derive(Debug, Args)]
pub struct ChecksCommand {}

#[derive(Debug, Serialize, Tabled)]
struct CheckRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "CHECK")]
    name: String,
    #[tabled(rename = "FAMILY")]
    family: String,
    #[tabled(rename = "GATE")]
    gate: String,
}

impl ChecksCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let scenario = ceph_osd::scenario(&ctx.config)?;
        let release = ctx.config.release;

        let rows: Vec<CheckRow> = scenario
            .checks()
            .enumerate()
            .map(|(index, check)| CheckRow {
                position: index + 1,
                name: check.name().to_string(),
                family: check.family().to_string(),
                gate: ctx
                    .config
                    .gates
                    .skip_reason(check.name(), release)
                    .map(|reason| format!("skipped on {}: {}", release, reason))
                    .unwrap_or_default(),
            })
            .collect();
        print_output(&rows, ctx.format);
        Ok(())
    }
}
