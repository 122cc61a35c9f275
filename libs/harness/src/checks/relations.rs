//! Relation data between services.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;
use verity_expect::{identical_mappings, match_bag};
use verity_poll::{poll, PollError, PollPolicy, Probe};
use verity_topology::Endpoint;

use super::{resolve_bag, Check, CheckContext, CheckFailure, ExpectedValue, ValueExpectations};
use crate::report::CheckFamily;

/// Settings units publish on `endpoint` toward `remote`.
///
/// A missing bag or key is treated as not propagated yet and polled for; once
/// the poll runs out it fails with what was last seen. A wrong value fails
/// immediately. With [`RelationCheck::agree_on`], the listed keys must also
/// carry the same value on every unit.
#[derive(Debug, Clone)]
pub struct RelationCheck {
    name: String,
    units: Vec<String>,
    endpoint: String,
    remote: Endpoint,
    expected: ValueExpectations,
    agree_on: Vec<String>,
    policy: PollPolicy,
}

impl RelationCheck {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, remote: Endpoint, policy: PollPolicy) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            endpoint: endpoint.into(),
            remote,
            expected: ValueExpectations::new(),
            agree_on: Vec::new(),
            policy,
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.units.push(unit.into());
        self
    }

    pub fn expect(mut self, key: impl Into<String>, value: impl Into<ExpectedValue>) -> Self {
        self.expected.insert(key.into(), value.into());
        self
    }

    /// Require `key` to be identical across the checked units.
    pub fn agree_on(mut self, key: impl Into<String>) -> Self {
        self.agree_on.push(key.into());
        self
    }
}

#[async_trait]
impl Check for RelationCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Relation
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        let expected = resolve_bag(ctx.cluster, &self.expected).await?;
        let mut agreed: Vec<(String, BTreeMap<String, String>)> = Vec::new();

        for unit_name in &self.units {
            let unit = ctx.cluster.unit(unit_name)?;
            let what = format!("{} {} relation data", unit, self.endpoint);
            let (expected, endpoint, remote) = (&expected, &self.endpoint, &self.remote);

            let result = poll(&what, self.policy, move |_| async move {
                let Some(bag) = unit.relation_data(endpoint, remote).await? else {
                    return Ok(Probe::pending(format!("no relation {} -> {}", endpoint, remote)));
                };
                let mismatches = match_bag(&bag, expected);
                if mismatches.is_empty() {
                    return Ok(Probe::Ready(bag));
                }
                let listed: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
                if mismatches.iter().all(|m| m.is_absence()) {
                    return Ok(Probe::Pending(listed.join("; ")));
                }
                Err(CheckFailure::assertion(listed.join("; ")))
            })
            .await;

            let bag = match result {
                Ok(bag) => bag,
                Err(PollError::Aborted { source, .. }) => {
                    return Err(match source {
                        CheckFailure::Assertion(message) => {
                            CheckFailure::assertion(format!("{}: {}", unit, message))
                        }
                        other => other,
                    });
                }
                Err(PollError::Exhausted { last, attempts, .. }) => {
                    debug!(unit = %unit, attempts, "Relation data never appeared");
                    return Err(CheckFailure::assertion(format!(
                        "{} relation {} -> {}: {}",
                        unit, self.endpoint, self.remote, last
                    )));
                }
            };

            let picked = self
                .agree_on
                .iter()
                .filter_map(|key| bag.get(key).map(|v| (key.clone(), v.clone())))
                .collect();
            agreed.push((unit.name().to_string(), picked));
        }

        if !self.agree_on.is_empty() {
            identical_mappings(&agreed).map_err(CheckFailure::Assertion)?;
        }
        Ok(())
    }
}
