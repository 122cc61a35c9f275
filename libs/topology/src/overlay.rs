//! Per-service configuration overlays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key/value configuration applied on top of a service's defaults.
///
/// Keys are kept in sorted order so overlays serialize deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigOverlay {
    inner: BTreeMap<String, String>,
}

impl ConfigOverlay {
    /// Create an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.insert(key.into(), value.into());
        self
    }

    /// Set a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.inner.insert(key.into(), value.into())
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over key/value pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Layer this overlay on top of `defaults`; overlay values win.
    pub fn merged_over(&self, defaults: &ConfigOverlay) -> ConfigOverlay {
        let mut merged = defaults.clone();
        for (key, value) in &self.inner {
            merged.inner.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Render as `key=value` assignments, the form orchestrator CLIs accept.
    pub fn assignments(&self) -> Vec<String> {
        self.inner
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ConfigOverlay
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_over_prefers_overlay() {
        let defaults = ConfigOverlay::new()
            .with("osd-encrypt", "False")
            .with("osd-devices", "/dev/vdb /srv/ceph");
        let overlay = ConfigOverlay::new().with("osd-encrypt", "True");

        let merged = overlay.merged_over(&defaults);
        assert_eq!(merged.get("osd-encrypt"), Some("True"));
        assert_eq!(merged.get("osd-devices"), Some("/dev/vdb /srv/ceph"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_assignments_sorted() {
        let overlay: ConfigOverlay = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(overlay.assignments(), vec!["a=1", "b=2"]);
    }
}
