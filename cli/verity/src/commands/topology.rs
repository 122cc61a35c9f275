//! Topology command - show what a run would deploy.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use verity_harness::scenario::ceph_osd;
use verity_topology::ServiceSpec;

use crate::output::{print_output, print_single, OutputFormat};

use super::CommandContext;

/// Show the services and relations of the scenario's topology.
#[derive(Debug, Args)]
pub struct TopologyCommand {
    /// Print only the content digest.
    #[arg(long)]
    digest: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct ServiceRow {
    #[tabled(rename = "SERVICE")]
    name: String,
    #[tabled(rename = "CHARM")]
    charm: String,
    #[tabled(rename = "UNITS")]
    units: u32,
    #[tabled(rename = "STORAGE")]
    storage: String,
    #[tabled(rename = "CONFIG")]
    config: String,
}

impl From<&ServiceSpec> for ServiceRow {
    fn from(spec: &ServiceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            charm: spec.charm.clone(),
            units: spec.units,
            storage: spec
                .storage
                .iter()
                .map(|(name, storage)| format!("{}={}", name, storage))
                .collect::<Vec<_>>()
                .join(" "),
            config: spec.config.assignments().join(" "),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct RelationRow {
    #[tabled(rename = "FROM")]
    from: String,
    #[tabled(rename = "TO")]
    to: String,
}

impl TopologyCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let scenario = ceph_osd::scenario(&ctx.config)?;
        let topology = scenario.topology();

        if self.digest {
            println!("{}", topology.digest());
            return Ok(());
        }

        match ctx.format {
            OutputFormat::Json => print_single(topology),
            OutputFormat::Table => {
                let services: Vec<ServiceRow> = topology.services().map(ServiceRow::from).collect();
                print_output(&services, ctx.format);

                let relations: Vec<RelationRow> = topology
                    .relations()
                    .map(|relation| {
                        let (from, to) = relation.endpoints();
                        RelationRow {
                            from: from.to_string(),
                            to: to.to_string(),
                        }
                    })
                    .collect();
                print_output(&relations, ctx.format);
                println!("{} units, digest {}", topology.unit_count(), topology.digest());
            }
        }
        Ok(())
    }
}
