//! Run command - deploy the scenario and verify it.

use anyhow::Result;
use clap::Args;
use tracing::info;
use verity_harness::scenario::ceph_osd;
use verity_harness::{run_scenario, Backends, HarnessError};

use crate::output::print_report;

use super::CommandContext;

/// Deploy, converge, run every check and print the report.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Run every check even after one fails.
    #[arg(long)]
    keep_going: bool,

    /// Remove the deployed services when the run ends.
    #[arg(long)]
    teardown: bool,
}

impl RunCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let mut config = ctx.config;
        config.run.keep_going |= self.keep_going;
        config.run.teardown |= self.teardown;

        let scenario = ceph_osd::scenario(&config)?;
        info!(
            scenario = %scenario.name(),
            release = %config.release,
            backend = ?config.orchestrator.backend,
            digest = %scenario.topology().digest(),
            "Configuration loaded"
        );

        let backends = Backends::from_config(&config);
        match run_scenario(scenario, &backends, &config).await {
            Ok(report) => {
                print_report(&report, ctx.format);
                Ok(())
            }
            Err(HarnessError::ChecksFailed(failure)) => {
                print_report(&failure.run, ctx.format);
                Err(HarnessError::ChecksFailed(failure).into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
