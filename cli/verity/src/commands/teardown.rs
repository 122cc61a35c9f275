//! Teardown command - remove a deployed scenario.

use anyhow::Result;
use clap::Args;
use verity_harness::scenario::{ceph_osd, teardown};
use verity_harness::Backends;

use crate::output::{print_info, print_success};

use super::CommandContext;

/// Remove every service of the scenario's topology.
#[derive(Debug, Args)]
pub struct TeardownCommand {}

impl TeardownCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let scenario = ceph_osd::scenario(&ctx.config)?;
        let backends = Backends::from_config(&ctx.config);

        print_info(&format!(
            "Removing {} services of {}",
            scenario.topology().services().count(),
            scenario.name()
        ));
        teardown(&scenario, &backends, &ctx.config).await?;
        print_success("Teardown complete");
        Ok(())
    }
}
