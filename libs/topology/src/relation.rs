//! Relation endpoints and unordered relation pairs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// One side of a relation: `service:endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    service: String,
    name: String,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Result<Self, TopologyError> {
        let service = service.into();
        let name = name.into();
        let token = format!("{}:{}", service, name);

        if service.is_empty() {
            return Err(TopologyError::InvalidEndpoint {
                token,
                reason: "service part is empty",
            });
        }
        if name.is_empty() {
            return Err(TopologyError::InvalidEndpoint {
                token,
                reason: "endpoint part is empty",
            });
        }
        if name.contains(':') {
            return Err(TopologyError::InvalidEndpoint {
                token,
                reason: "more than one ':' separator",
            });
        }

        Ok(Self { service, name })
    }

    /// Service that owns this endpoint.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Endpoint name within the service.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.name)
    }
}

impl FromStr for Endpoint {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((service, name)) = s.split_once(':') else {
            return Err(TopologyError::InvalidEndpoint {
                token: s.to_string(),
                reason: "missing ':' separator",
            });
        };
        Self::new(service.trim(), name.trim())
    }
}

impl Serialize for Endpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An unordered pair of endpoints that must be related.
///
/// The pair is normalized on construction so `(a, b)` and `(b, a)` compare
/// equal and hash the same.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationSpec {
    first: Endpoint,
    second: Endpoint,
}

impl RelationSpec {
    /// Create a relation between two endpoints of different services.
    pub fn new(a: Endpoint, b: Endpoint) -> Result<Self, TopologyError> {
        if a.service == b.service {
            return Err(TopologyError::SelfRelation(a.service));
        }
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { first, second })
    }

    /// Parse both tokens and build the relation.
    pub fn parse(a: &str, b: &str) -> Result<Self, TopologyError> {
        Self::new(a.parse()?, b.parse()?)
    }

    /// Both endpoints in normalized order.
    pub fn endpoints(&self) -> (&Endpoint, &Endpoint) {
        (&self.first, &self.second)
    }

    /// Returns true if either side belongs to `service`.
    pub fn involves(&self, service: &str) -> bool {
        self.first.service == service || self.second.service == service
    }

    /// The endpoint owned by `service`, if any.
    pub fn endpoint_of(&self, service: &str) -> Option<&Endpoint> {
        [&self.first, &self.second]
            .into_iter()
            .find(|e| e.service == service)
    }

    /// The endpoint on the far side from `service`, if `service` takes part.
    pub fn remote_of(&self, service: &str) -> Option<&Endpoint> {
        if self.first.service == service {
            Some(&self.second)
        } else if self.second.service == service {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for RelationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.first, self.second)
    }
}
