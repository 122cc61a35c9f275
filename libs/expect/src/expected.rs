//! Expected values: literals or semantic predicates.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Token form of [`Expected::ValidIp`].
pub const VALID_IP_TOKEN: &str = "<valid-ip>";

/// Token form of [`Expected::NotNull`].
pub const NOT_NULL_TOKEN: &str = "<not-null>";

/// Something an observed value is compared against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expected {
    /// Exact string equality.
    Literal(String),

    /// Any IPv4 or IPv6 address.
    ValidIp,

    /// Any present value, empty strings included.
    NotNull,
}

impl Expected {
    /// Exact-match expectation.
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Returns true if `actual` satisfies the expectation.
    pub fn accepts(&self, actual: &str) -> bool {
        match self {
            Self::Literal(expected) => expected == actual,
            Self::ValidIp => actual.trim().parse::<IpAddr>().is_ok(),
            Self::NotNull => true,
        }
    }

    /// Parse the token form used in files (`<valid-ip>`, `<not-null>`, else a literal).
    pub fn from_token(token: &str) -> Self {
        match token {
            VALID_IP_TOKEN => Self::ValidIp,
            NOT_NULL_TOKEN => Self::NotNull,
            other => Self::Literal(other.to_string()),
        }
    }
}

impl From<&str> for Expected {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Expected {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{}", value),
            Self::ValidIp => write!(f, "{}", VALID_IP_TOKEN),
            Self::NotNull => write!(f, "{}", NOT_NULL_TOKEN),
        }
    }
}

impl Serialize for Expected {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Expected {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_token(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ip() {
        assert!(Expected::ValidIp.accepts("10.5.0.23"));
        assert!(Expected::ValidIp.accepts("fe80::1"));
        assert!(!Expected::ValidIp.accepts("10.5.0"));
        assert!(!Expected::ValidIp.accepts("juju-machine-1"));
        assert!(!Expected::ValidIp.accepts(""));
    }

    #[test]
    fn test_literal_and_not_null() {
        assert!(Expected::literal("none").accepts("none"));
        assert!(!Expected::literal("none").accepts("cephx"));
        assert!(Expected::NotNull.accepts(""));
        assert!(Expected::NotNull.accepts("AQBxyz=="));
    }

    #[test]
    fn test_token_deserialize() {
        let parsed: Vec<Expected> =
            serde_json::from_str(r#"["<valid-ip>", "<not-null>", "none"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Expected::ValidIp, Expected::NotNull, Expected::literal("none")]
        );
        assert_eq!(Expected::ValidIp.to_string(), "<valid-ip>");
    }
}
