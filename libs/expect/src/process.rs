//! Process count expectations.

use std::fmt;

use serde::Deserialize;

/// Acceptable number of processes with a given name on one unit.
///
/// Deserializes from an integer (`exact`), a two-element array (`between`) or
/// a boolean (`true` = running, `false` = absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCount {
    Exact(u32),
    Between { min: u32, max: u32 },
    /// At least one.
    Running,
    /// None at all.
    Absent,
}

impl ProcessCount {
    pub fn accepts(&self, count: u32) -> bool {
        match *self {
            Self::Exact(n) => count == n,
            Self::Between { min, max } => (min..=max).contains(&count),
            Self::Running => count > 0,
            Self::Absent => count == 0,
        }
    }
}

impl fmt::Display for ProcessCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{}", n),
            Self::Between { min, max } => write!(f, "{}..={}", min, max),
            Self::Running => write!(f, "running"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

impl<'de> Deserialize<'de> for ProcessCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Exact(u32),
            Between([u32; 2]),
            Flag(bool),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Exact(n) => Ok(Self::Exact(n)),
            Raw::Between([min, max]) if min <= max => Ok(Self::Between { min, max }),
            Raw::Between([min, max]) => Err(serde::de::Error::custom(format!(
                "process count range {}..={} is empty",
                min, max
            ))),
            Raw::Flag(true) => Ok(Self::Running),
            Raw::Flag(false) => Ok(Self::Absent),
        }
    }
}

/// Count the PIDs printed by `pidof`.
///
/// `pidof` prints nothing (and exits 1) when no process matches.
pub fn count_pids(output: &str) -> u32 {
    output
        .split_whitespace()
        .filter(|token| token.parse::<u32>().is_ok())
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts() {
        assert!(ProcessCount::Exact(1).accepts(1));
        assert!(!ProcessCount::Exact(1).accepts(2));
        assert!(ProcessCount::Between { min: 2, max: 3 }.accepts(3));
        assert!(!ProcessCount::Between { min: 2, max: 3 }.accepts(1));
        assert!(ProcessCount::Running.accepts(4));
        assert!(!ProcessCount::Running.accepts(0));
        assert!(ProcessCount::Absent.accepts(0));
    }

    #[test]
    fn test_deserialize_forms() {
        let parsed: Vec<ProcessCount> = serde_json::from_str("[1, [2, 3], true, false]").unwrap();
        assert_eq!(
            parsed,
            vec![
                ProcessCount::Exact(1),
                ProcessCount::Between { min: 2, max: 3 },
                ProcessCount::Running,
                ProcessCount::Absent,
            ]
        );
        assert!(serde_json::from_str::<ProcessCount>("[3, 2]").is_err());
    }

    #[test]
    fn test_count_pids() {
        assert_eq!(count_pids("1234 1235 1240\n"), 3);
        assert_eq!(count_pids(""), 0);
        assert_eq!(count_pids("\n"), 0);
    }
}
