//! Check results and the run report.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{AssertionFailure, HarnessError};
use crate::release::Release;

/// Family a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFamily {
    Process,
    ConfigFile,
    Relation,
    Resource,
    Command,
    Action,
    FileAppearance,
    Principal,
}

impl CheckFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::ConfigFile => "config_file",
            Self::Relation => "relation",
            Self::Resource => "resource",
            Self::Command => "command",
            Self::Action => "action",
            Self::FileAppearance => "file_appearance",
            Self::Principal => "principal",
        }
    }
}

impl fmt::Display for CheckFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a check ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub family: CheckFamily,
    pub outcome: Outcome,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

impl CheckResult {
    pub fn passed(name: impl Into<String>, family: CheckFamily, duration: Duration) -> Self {
        Self {
            name: name.into(),
            family,
            outcome: Outcome::Passed,
            duration,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        family: CheckFamily,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            outcome: Outcome::Failed(message.into()),
            duration,
        }
    }

    pub fn skipped(name: impl Into<String>, family: CheckFamily, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family,
            outcome: Outcome::Skipped(reason.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub release: Release,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<CheckResult>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// Terminal error payload when any check failed.
///
/// Carries the full report so callers can still render every result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub failures: Vec<AssertionFailure>,
    pub run: RunReport,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} check(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}", failure)?;
        }
        Ok(())
    }
}

/// Collects check results for one run.
#[derive(Debug)]
pub struct Reporter {
    run_id: Uuid,
    scenario: String,
    release: Release,
    started_at: DateTime<Utc>,
    results: Vec<CheckResult>,
}

impl Reporter {
    pub fn new(scenario: impl Into<String>, release: Release) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario: scenario.into(),
            release,
            started_at: Utc::now(),
            results: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record(&mut self, result: CheckResult) {
        match &result.outcome {
            Outcome::Passed => {
                info!(check = %result.name, family = %result.family, duration = ?result.duration, "Check passed")
            }
            Outcome::Failed(message) => {
                error!(check = %result.name, family = %result.family, message = %message, "Check failed")
            }
            Outcome::Skipped(reason) => {
                info!(check = %result.name, reason = %reason, "Check skipped")
            }
        }
        self.results.push(result);
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// Close the run: the report on success, [`HarnessError::ChecksFailed`] otherwise.
    pub fn finish(self) -> Result<RunReport, HarnessError> {
        let run = RunReport {
            run_id: self.run_id,
            scenario: self.scenario,
            release: self.release,
            started_at: self.started_at,
            finished_at: Utc::now(),
            results: self.results,
        };

        let failures: Vec<AssertionFailure> = run
            .results
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Failed(message) => Some(AssertionFailure::new(&r.name, message)),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            info!(
                run_id = %run.run_id,
                scenario = %run.scenario,
                passed = run.passed(),
                skipped = run.skipped(),
                "All checks passed"
            );
            Ok(run)
        } else {
            error!(run_id = %run.run_id, failed = failures.len(), "Run failed");
            Err(HarnessError::ChecksFailed(FailureReport { failures, run }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_without_failures() {
        let mut reporter = Reporter::new("ceph-osd basic", Release::XenialQueens);
        reporter.record(CheckResult::passed("ceph processes", CheckFamily::Process, Duration::from_millis(12)));
        reporter.record(CheckResult::skipped(
            "ceph-osd disk encryption",
            CheckFamily::FileAppearance,
            "gated",
        ));

        let report = reporter.finish().unwrap();
        assert_eq!(report.passed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
    }

    #[test]
    fn test_failures_are_listed_together() {
        let mut reporter = Reporter::new("ceph-osd basic", Release::XenialQueens);
        reporter.record(CheckResult::failed(
            "ceph.conf",
            CheckFamily::ConfigFile,
            "section [global] auth cluster required:cephx != expected auth cluster required:none",
            Duration::ZERO,
        ));
        reporter.record(CheckResult::passed("ceph commands", CheckFamily::Command, Duration::ZERO));
        reporter.record(CheckResult::failed(
            "pool consistency",
            CheckFamily::Resource,
            "ceph-mon/1 does not have pool: glance",
            Duration::ZERO,
        ));

        let err = reporter.finish().unwrap_err();
        let HarnessError::ChecksFailed(report) = err else {
            panic!("expected ChecksFailed");
        };
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.run.results.len(), 3);
        let text = report.to_string();
        assert!(text.contains("ceph.conf: section [global]"));
        assert!(text.contains("pool consistency: ceph-mon/1 does not have pool: glance"));
    }

    #[test]
    fn test_result_serialization() {
        let result = CheckResult::failed("x", CheckFamily::Relation, "missing", Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["family"], "relation");
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["detail"], "missing");
    }
}
