//! Release-gated skips.
//!
//! A gate names a check (or a single assertion inside one) and the release
//! range in which it does not apply. Gates are data: they come from
//! configuration and default to the table below.

use serde::{Deserialize, Serialize};

use crate::release::Release;

/// Gate name of the disk-encryption check.
pub const ENCRYPTION_CHECK: &str = "ceph-osd disk encryption";

/// Gate name of the usage assertion in the cinder pool sample check.
pub const CINDER_POOL_USAGE: &str = "cinder pool disk usage";

/// A release range in which a check is skipped.
///
/// The range is `[skip_from, skip_until)`; an absent bound is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    /// Check or assertion name.
    pub check: String,

    /// First release the skip applies to.
    #[serde(default)]
    pub skip_from: Option<Release>,

    /// First release the skip no longer applies to.
    #[serde(default)]
    pub skip_until: Option<Release>,

    /// Recorded as the skip reason.
    pub reason: String,
}

impl Gate {
    pub fn applies(&self, release: Release) -> bool {
        self.skip_from.is_none_or(|from| release >= from)
            && self.skip_until.is_none_or(|until| release < until)
    }
}

/// Ordered collection of gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateTable {
    gates: Vec<Gate>,
}

impl GateTable {
    pub fn new(gates: Vec<Gate>) -> Self {
        Self { gates }
    }

    /// No gates at all.
    pub fn empty() -> Self {
        Self { gates: Vec::new() }
    }

    /// Reason `check` is skipped on `release`, if it is.
    pub fn skip_reason(&self, check: &str, release: Release) -> Option<&str> {
        self.gates
            .iter()
            .find(|gate| gate.check == check && gate.applies(release))
            .map(|gate| gate.reason.as_str())
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }
}

impl Default for GateTable {
    fn default() -> Self {
        Self {
            gates: vec![
                Gate {
                    check: ENCRYPTION_CHECK.to_string(),
                    skip_from: Some(Release::TrustyMitaka),
                    skip_until: None,
                    reason: "osd-encrypt via config change is not exercised from mitaka on"
                        .to_string(),
                },
                Gate {
                    check: CINDER_POOL_USAGE.to_string(),
                    skip_from: Some(Release::XenialMitaka),
                    skip_until: None,
                    reason: "pool usage ordering is not stable on newer ceph".to_string(),
                },
            ],
        }
    }
}
