//! Configuration file contents.

use async_trait::async_trait;
use verity_expect::{subset_match, ConfigDocument};

use super::{resolve_sections, Check, CheckContext, CheckFailure, ExpectedValue, SectionValueExpectations};
use crate::report::CheckFamily;

/// Expected `section -> key -> value` triples in a file on one unit.
///
/// A missing file, section or key fails at once; files are written during
/// convergence, so there is nothing to wait for.
#[derive(Debug, Clone)]
pub struct ConfigFileCheck {
    name: String,
    unit: String,
    path: String,
    expected: SectionValueExpectations,
}

impl ConfigFileCheck {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            path: path.into(),
            expected: SectionValueExpectations::new(),
        }
    }

    pub fn expect(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<ExpectedValue>,
    ) -> Self {
        self.expected
            .entry(section.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Check for ConfigFileCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::ConfigFile
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let unit = ctx.cluster.unit(&self.unit)?;
        let Some(content) = unit.read_file(&self.path).await? else {
            return Err(CheckFailure::assertion(format!("{} does not exist on {}", self.path, unit)));
        };
        let doc = ConfigDocument::parse(&content)
            .map_err(|e| CheckFailure::assertion(format!("{} on {} is not valid: {}", self.path, unit, e)))?;

        let expected = resolve_sections(ctx.cluster, &self.expected).await?;
        let mismatches = subset_match(&doc, &expected);
        if mismatches.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
        Err(CheckFailure::assertion(format!(
            "{} on {}: {}",
            self.path,
            unit,
            listed.join("; ")
        )))
    }
}
