//! Before / after-create / after-delete sample validation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape a sample series must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplePattern {
    /// Creation raises the value, deletion brings it back to at most the original.
    RoundTrip,

    /// Creation does not lower the value; deletion is not constrained.
    NonDecreasingOnCreate,
}

impl fmt::Display for SamplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundTrip => write!(f, "round-trip"),
            Self::NonDecreasingOnCreate => write!(f, "non-decreasing on create"),
        }
    }
}

/// Three observations of one metric around a create/delete cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSeries {
    /// What is being sampled (e.g. `cinder-ceph objects`).
    pub label: String,
    pub before: u64,
    pub after_create: u64,
    pub after_delete: u64,
}

impl SampleSeries {
    pub fn new(label: impl Into<String>, before: u64, after_create: u64, after_delete: u64) -> Self {
        Self {
            label: label.into(),
            before,
            after_create,
            after_delete,
        }
    }

    /// Build from exactly three samples in collection order.
    pub fn from_samples(label: impl Into<String>, samples: &[u64]) -> Result<Self, String> {
        let label = label.into();
        match samples {
            [before, after_create, after_delete] => {
                Ok(Self::new(label, *before, *after_create, *after_delete))
            }
            other => Err(format!(
                "{}: expected 3 samples, got {}",
                label,
                other.len()
            )),
        }
    }

    /// Check the series against `pattern`, describing the violation on failure.
    pub fn validate(&self, pattern: SamplePattern) -> Result<(), String> {
        let ok = match pattern {
            SamplePattern::RoundTrip => {
                self.before < self.after_create && self.after_delete <= self.before
            }
            SamplePattern::NonDecreasingOnCreate => self.after_create >= self.before,
        };

        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} samples {} -> {} -> {} violate {} pattern",
                self.label, self.before, self.after_create, self.after_delete, pattern
            ))
        }
    }
}
