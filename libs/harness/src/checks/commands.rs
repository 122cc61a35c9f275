//! Command exit codes.

use async_trait::async_trait;
use tracing::debug;

use super::{all_of, Check, CheckContext, CheckFailure};
use crate::report::CheckFamily;

/// Every command must exit 0 on every unit.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    units: Vec<String>,
    commands: Vec<String>,
}

impl CommandCheck {
    pub fn new<U, C>(name: impl Into<String>, units: U, commands: C) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            name: name.into(),
            units: units.into_iter().map(Into::into).collect(),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Command
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let mut failed = Vec::new();
        for unit_name in &self.units {
            let unit = ctx.cluster.unit(unit_name)?;
            for command in &self.commands {
                let output = unit.run(command).await?;
                debug!(unit = %unit, command = %command, code = output.code, "Command finished");
                if !output.success() {
                    failed.push(format!(
                        "`{}` on {} exited {}: {}",
                        command,
                        unit,
                        output.code,
                        output.stderr.trim()
                    ));
                }
            }
        }
        all_of(failed)
    }
}
