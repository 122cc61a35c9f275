//! Subset and identity comparisons.
//!
//! Comparisons never stop at the first difference; every mismatch is returned
//! so a failing check can report all of them at once.

use std::collections::BTreeMap;
use std::fmt;

use crate::expected::Expected;
use crate::ini::ConfigDocument;

/// Expected `section -> key -> value` triples for a configuration file.
pub type SectionExpectations = BTreeMap<String, BTreeMap<String, Expected>>;

/// One difference between expected and observed data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// A whole section is absent.
    MissingSection { section: String },

    /// A key is absent. `section` is `None` for flat key/value bags.
    MissingKey {
        section: Option<String>,
        key: String,
    },

    /// A key is present but its value does not satisfy the expectation.
    Value {
        section: Option<String>,
        key: String,
        expected: Expected,
        actual: String,
    },
}

impl Mismatch {
    /// Returns true if the mismatch is caused by absent data rather than a wrong value.
    pub fn is_absence(&self) -> bool {
        matches!(self, Self::MissingSection { .. } | Self::MissingKey { .. })
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSection { section } => {
                write!(f, "section [{}] does not exist", section)
            }
            Self::MissingKey {
                section: Some(section),
                key,
            } => write!(f, "section [{}] is missing option {}", section, key),
            Self::MissingKey { section: None, key } => {
                write!(f, "key '{}' does not exist", key)
            }
            Self::Value {
                section: Some(section),
                key,
                expected,
                actual,
            } => write!(
                f,
                "section [{}] {}:{} != expected {}:{}",
                section, key, actual, key, expected
            ),
            Self::Value {
                section: None,
                key,
                expected,
                actual,
            } => write!(f, "{}:{} != expected {}:{}", key, actual, key, expected),
        }
    }
}

/// Check that every expected `section/key` exists in `doc` with an acceptable value.
///
/// Extra sections and keys in the document are ignored.
pub fn subset_match(doc: &ConfigDocument, expected: &SectionExpectations) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    for (section, keys) in expected {
        if !doc.has_section(section) {
            mismatches.push(Mismatch::MissingSection {
                section: section.clone(),
            });
            continue;
        }
        for (key, expectation) in keys {
            match doc.get(section, key) {
                None => mismatches.push(Mismatch::MissingKey {
                    section: Some(section.clone()),
                    key: key.clone(),
                }),
                Some(actual) if !expectation.accepts(actual) => {
                    mismatches.push(Mismatch::Value {
                        section: Some(section.clone()),
                        key: key.clone(),
                        expected: expectation.clone(),
                        actual: actual.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    mismatches
}

/// Flat variant of [`subset_match`] for relation data bags.
pub fn match_bag(
    bag: &BTreeMap<String, String>,
    expected: &BTreeMap<String, Expected>,
) -> Vec<Mismatch> {
    expected
        .iter()
        .filter_map(|(key, expectation)| match bag.get(key) {
            None => Some(Mismatch::MissingKey {
                section: None,
                key: key.clone(),
            }),
            Some(actual) if !expectation.accepts(actual) => Some(Mismatch::Value {
                section: None,
                key: key.clone(),
                expected: expectation.clone(),
                actual: actual.clone(),
            }),
            Some(_) => None,
        })
        .collect()
}

/// Names in `expected` that are not keys of `observed`.
pub fn missing_from<V>(observed: &BTreeMap<String, V>, expected: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|name| !observed.contains_key(name.as_str()))
        .cloned()
        .collect()
}

/// Require every labelled mapping to equal the first one.
///
/// The error names the first label whose mapping differs and the keys that
/// differ.
pub fn identical_mappings<K, V>(mappings: &[(String, BTreeMap<K, V>)]) -> Result<(), String>
where
    K: Ord + fmt::Display,
    V: PartialEq + fmt::Display,
{
    let Some((reference_label, reference)) = mappings.first() else {
        return Ok(());
    };

    for (label, mapping) in &mappings[1..] {
        if mapping == reference {
            continue;
        }

        let mut diffs = Vec::new();
        for (key, value) in reference {
            match mapping.get(key) {
                None => diffs.push(format!("{} missing", key)),
                Some(other) if other != value => {
                    diffs.push(format!("{}: {} != {}", key, other, value))
                }
                Some(_) => {}
            }
        }
        for key in mapping.keys() {
            if !reference.contains_key(key) {
                diffs.push(format!("{} unexpected", key));
            }
        }

        return Err(format!(
            "{} differs from {} ({})",
            label,
            reference_label,
            diffs.join(", ")
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expectations(section: &str, pairs: &[(&str, &str)]) -> SectionExpectations {
        let mut keys = BTreeMap::new();
        for (k, v) in pairs {
            keys.insert(k.to_string(), Expected::from_token(v));
        }
        let mut out = BTreeMap::new();
        out.insert(section.to_string(), keys);
        out
    }

    #[test]
    fn test_subset_match_ignores_extra_keys() {
        let doc = ConfigDocument::parse("[global]\na = 1\nb = 2\n").unwrap();

        assert!(subset_match(&doc, &expectations("global", &[("a", "1")])).is_empty());

        let mismatches = subset_match(&doc, &expectations("global", &[("c", "3")]));
        assert_eq!(mismatches.len(), 1);
        assert_eq!(
            mismatches[0],
            Mismatch::MissingKey {
                section: Some("global".to_string()),
                key: "c".to_string()
            }
        );
        assert!(mismatches[0].to_string().contains("option c"));
    }

    #[test]
    fn test_subset_match_reports_every_difference() {
        let doc = ConfigDocument::parse("[osd]\nosd journal size = 2048\n").unwrap();
        let mut expected = expectations("osd", &[("osd journal size", "1024"), ("keyring", "<not-null>")]);
        expected.extend(expectations("mds", &[("keyring", "<not-null>")]));

        let mismatches = subset_match(&doc, &expected);
        let rendered: Vec<String> = mismatches.iter().map(|m| m.to_string()).collect();

        assert_eq!(
            rendered,
            vec![
                "section [mds] does not exist".to_string(),
                "section [osd] is missing option keyring".to_string(),
                "section [osd] osd journal size:2048 != expected osd journal size:1024".to_string(),
            ]
        );
        assert!(mismatches[0].is_absence());
        assert!(!mismatches[2].is_absence());
    }

    #[test]
    fn test_match_bag() {
        let bag: BTreeMap<String, String> = [
            ("auth".to_string(), "none".to_string()),
            ("private-address".to_string(), "10.5.0.7".to_string()),
        ]
        .into_iter()
        .collect();

        let mut expected = BTreeMap::new();
        expected.insert("auth".to_string(), Expected::literal("none"));
        expected.insert("private-address".to_string(), Expected::ValidIp);
        assert!(match_bag(&bag, &expected).is_empty());

        expected.insert("fsid".to_string(), Expected::NotNull);
        expected.insert("auth".to_string(), Expected::literal("cephx"));
        let rendered: Vec<String> = match_bag(&bag, &expected)
            .iter()
            .map(|m| m.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "auth:none != expected auth:cephx".to_string(),
                "key 'fsid' does not exist".to_string(),
            ]
        );
    }

    #[test]
    fn test_identical_mappings_names_differing_label() {
        let pools = |entries: &[(&str, u32)]| -> BTreeMap<String, u32> {
            entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
        };
        let same = vec![
            ("ceph-osd/0".to_string(), pools(&[("glance", 1), ("cinder-ceph", 2)])),
            ("ceph-mon/0".to_string(), pools(&[("glance", 1), ("cinder-ceph", 2)])),
        ];
        assert!(identical_mappings(&same).is_ok());

        let differ = vec![
            ("ceph-osd/0".to_string(), pools(&[("glance", 1), ("cinder-ceph", 2)])),
            ("ceph-mon/0".to_string(), pools(&[("glance", 1), ("cinder-ceph", 2)])),
            ("ceph-mon/1".to_string(), pools(&[("glance", 1), ("cinder-ceph", 3)])),
        ];
        let err = identical_mappings(&differ).unwrap_err();
        assert!(err.starts_with("ceph-mon/1 differs from ceph-osd/0"));
        assert!(err.contains("cinder-ceph: 3 != 2"));

        assert!(identical_mappings::<String, u32>(&[]).is_ok());
    }

    #[test]
    fn test_missing_from() {
        let observed: BTreeMap<String, u32> =
            [("glance".to_string(), 1), ("rbd".to_string(), 0)].into_iter().collect();
        let expected = vec!["glance".to_string(), "cinder-ceph".to_string()];
        assert_eq!(missing_from(&observed, &expected), vec!["cinder-ceph"]);
    }
}
