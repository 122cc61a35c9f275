//! CLI commands.

mod checks;
mod run;
mod teardown;
mod topology;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use verity_harness::config::Backend;
use verity_harness::HarnessConfig;

use crate::config::config_path;
use crate::output::OutputFormat;

/// verity - deploy a topology and verify it end to end.
#[derive(Debug, Parser)]
#[command(name = "verity")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Harness configuration file (TOML).
    #[arg(long, short, global = true, env = "VERITY_CONFIG")]
    config: Option<PathBuf>,

    /// Run against the in-process simulation instead of a real model.
    #[arg(long, global = true)]
    simulate: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy the scenario, run every check and print the report.
    Run(run::RunCommand),

    /// Show the topology a run would deploy.
    Topology(topology::TopologyCommand),

    /// List the checks in run order with their gates.
    Checks(checks::ChecksCommand),

    /// Remove every service of the scenario's topology.
    Teardown(teardown::TeardownCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Install the tracing subscriber; `RUST_LOG` wins over the default level.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
        let registry = tracing_subscriber::registry().with(filter);
        if self.log_json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format: OutputFormat = self.format.parse()?;

        let path = config_path(self.config)?;
        let mut config = HarnessConfig::load(path.as_deref())?;
        if self.simulate {
            config.orchestrator.backend = Backend::Simulated;
        }

        let ctx = CommandContext { config, format };

        match self.command {
            Commands::Run(cmd) => cmd.run(ctx).await,
            Commands::Topology(cmd) => cmd.run(ctx),
            Commands::Checks(cmd) => cmd.run(ctx),
            Commands::Teardown(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("verity {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: HarnessConfig,
    pub format: OutputFormat,
}
