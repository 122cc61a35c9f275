//! Scripted actions and the state transitions they cause.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use verity_poll::PollPolicy;
use verity_topology::ConfigOverlay;

use super::{Check, CheckContext, CheckFailure};
use crate::action::PendingAction;
use crate::cluster::UnitHandle;
use crate::driver::SteadyState;
use crate::error::HarnessError;
use crate::orchestrator::{ActionOutcome, ActionParams, WorkloadState};
use crate::report::CheckFamily;

/// Units an action is invoked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    Unit(String),
    /// Every unit of a service, enqueued together and awaited in order.
    AllUnits(String),
}

/// How an invocation is expected to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Completes,
    Rejected,
}

/// One action invocation inside a script.
#[derive(Debug, Clone)]
pub struct ActionCall {
    target: ActionTarget,
    action: String,
    params: ActionParams,
    expect: Expectation,
}

impl ActionCall {
    /// An invocation expected to complete.
    pub fn new(target: ActionTarget, action: impl Into<String>) -> Self {
        Self {
            target,
            action: action.into(),
            params: ActionParams::new(),
            expect: Expectation::Completes,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn expect(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }

    fn judge(&self, unit: &UnitHandle, outcome: &ActionOutcome) -> Option<String> {
        if !outcome.state.is_terminal() {
            return Some(format!("{} on {} is still {}", self.action, unit, outcome.state));
        }
        match (self.expect, outcome.completed()) {
            (Expectation::Completes, false) => Some(format!(
                "{} on {} did not complete: {} ({})",
                self.action,
                unit,
                outcome.state,
                outcome.message.as_deref().unwrap_or("no message")
            )),
            (Expectation::Rejected, true) => Some(format!(
                "{} on {} completed but should have been rejected",
                self.action, unit
            )),
            _ => None,
        }
    }
}

/// One step of an [`ActionScript`].
#[derive(Debug, Clone)]
pub enum ActionStep {
    /// Apply a configuration change.
    Configure { service: String, overlay: ConfigOverlay },

    /// Wait for the covered units to reach a steady state.
    AwaitStatus(SteadyState),

    Invoke(ActionCall),

    /// The unit's workload state right now.
    AssertStatus { unit: String, workload: WorkloadState },
}

/// Ordered steps exercising actions and status transitions.
#[derive(Debug, Clone)]
pub struct ActionScript {
    name: String,
    steps: Vec<ActionStep>,
    policy: PollPolicy,
}

impl ActionScript {
    /// `policy` bounds how long each action is awaited.
    pub fn new(name: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            policy,
        }
    }

    pub fn configure(mut self, service: impl Into<String>, overlay: ConfigOverlay) -> Self {
        self.steps.push(ActionStep::Configure {
            service: service.into(),
            overlay,
        });
        self
    }

    pub fn await_status(mut self, steady: SteadyState) -> Self {
        self.steps.push(ActionStep::AwaitStatus(steady));
        self
    }

    pub fn invoke(mut self, call: ActionCall) -> Self {
        self.steps.push(ActionStep::Invoke(call));
        self
    }

    pub fn assert_status(mut self, unit: impl Into<String>, workload: WorkloadState) -> Self {
        self.steps.push(ActionStep::AssertStatus {
            unit: unit.into(),
            workload,
        });
        self
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    async fn invoke_call(&self, ctx: &CheckContext<'_>, call: &ActionCall) -> Result<(), CheckFailure> {
        let units: Vec<&UnitHandle> = match &call.target {
            ActionTarget::Unit(name) => vec![ctx.cluster.unit(name)?],
            ActionTarget::AllUnits(service) => ctx.cluster.units_of(service).iter().collect(),
        };
        if units.is_empty() {
            return Err(CheckFailure::assertion(format!("no units to run {} on", call.action)));
        }

        let mut pending: Vec<(&UnitHandle, PendingAction)> = Vec::with_capacity(units.len());
        for unit in units {
            let action = unit.action(&call.action).params(call.params.clone()).enqueue().await?;
            pending.push((unit, action));
        }

        for (unit, action) in pending {
            let outcome = action.wait(self.policy).await?;
            debug!(unit = %unit, action = %call.action, state = %outcome.state, "Action outcome");
            if let Some(message) = call.judge(unit, &outcome) {
                return Err(CheckFailure::Assertion(message));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Check for ActionScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> CheckFamily {
        CheckFamily::Action
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<(), CheckFailure> {
        for (index, step) in self.steps.iter().enumerate() {
            debug!(check = %self.name, step = index, "Running step");
            match step {
                ActionStep::Configure { service, overlay } => {
                    ctx.driver.reconfigure(service, overlay).await?;
                }
                ActionStep::AwaitStatus(steady) => {
                    match ctx.driver.wait_for(ctx.cluster.topology(), steady).await {
                        Ok(_) => {}
                        Err(err @ HarnessError::ConvergenceTimeout { .. }) => {
                            return Err(CheckFailure::assertion(format!(
                                "status did not settle at step {}: {}",
                                index + 1,
                                err
                            )));
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                ActionStep::Invoke(call) => self.invoke_call(ctx, call).await?,
                ActionStep::AssertStatus { unit, workload } => {
                    let unit = ctx.cluster.unit(unit)?;
                    let status = unit.status().await?;
                    if status.workload != *workload {
                        return Err(CheckFailure::assertion(format!(
                            "{} workload is {} ({}), expected {}",
                            unit, status.workload, status.message, workload
                        )));
                    }
                }
            }
        }
        info!(check = %self.name, steps = self.steps.len(), "Script finished");
        Ok(())
    }
}
