//! INI-style configuration documents.
//!
//! Follows the conventions service configuration files rely on:
//! - `key = value` and `key: value` are both accepted, split at the first delimiter
//! - keys are case-folded, values are kept verbatim (trimmed)
//! - `#` and `;` start comment lines
//! - indented lines continue the previous value
//! - keys of `[DEFAULT]` are visible from every section

use std::collections::BTreeMap;

use crate::error::IniError;

/// Name of the section whose keys every other section inherits.
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Parsed `section -> key -> value` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    defaults: BTreeMap<String, String>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigDocument {
    /// Parse document text.
    pub fn parse(content: &str) -> Result<Self, IniError> {
        let mut doc = Self::default();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (index, raw) in content.lines().enumerate() {
            let line_num = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Continuation of the previous value.
            if raw.starts_with(|c: char| c == ' ' || c == '\t') {
                if let (Some(section), Some(key)) = (&current, &last_key) {
                    if let Some(value) = doc.table_mut(section).get_mut(key) {
                        value.push('\n');
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let Some(name) = rest.strip_suffix(']') else {
                    return Err(IniError::Syntax {
                        line: line_num,
                        reason: "unterminated section header".to_string(),
                    });
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(IniError::Syntax {
                        line: line_num,
                        reason: "empty section name".to_string(),
                    });
                }
                if name != DEFAULT_SECTION {
                    doc.sections.entry(name.to_string()).or_default();
                }
                current = Some(name.to_string());
                last_key = None;
                continue;
            }

            let Some(section) = &current else {
                return Err(IniError::MissingSectionHeader { line: line_num });
            };

            let Some(split) = trimmed.find(['=', ':']) else {
                return Err(IniError::Syntax {
                    line: line_num,
                    reason: format!("expected 'key = value', got '{}'", trimmed),
                });
            };
            let key = trimmed[..split].trim().to_lowercase();
            let value = trimmed[split + 1..].trim().to_string();
            if key.is_empty() {
                return Err(IniError::Syntax {
                    line: line_num,
                    reason: "empty key".to_string(),
                });
            }

            doc.table_mut(section).insert(key.clone(), value);
            last_key = Some(key);
        }

        Ok(doc)
    }

    fn table_mut(&mut self, section: &str) -> &mut BTreeMap<String, String> {
        if section == DEFAULT_SECTION {
            &mut self.defaults
        } else {
            self.sections.entry(section.to_string()).or_default()
        }
    }

    /// Returns true if the section exists. `DEFAULT` always exists.
    pub fn has_section(&self, section: &str) -> bool {
        section == DEFAULT_SECTION || self.sections.contains_key(section)
    }

    /// Value of `key` in `section`, falling back to `[DEFAULT]`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        if section != DEFAULT_SECTION {
            if let Some(value) = self.sections.get(section).and_then(|t| t.get(&key)) {
                return Some(value);
            }
        }
        self.defaults.get(&key).map(|s| s.as_str())
    }

    /// Names of non-default sections in sorted order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEPH_CONF: &str = r#"
[global]
auth cluster required = none
fsid = 6547bd3e-1397-11e2-82e5-53567c8d32dc
log to syslog = false

; comment
[osd]
keyring = /var/lib/ceph/osd/$cluster-$id/keyring
osd journal size: 1024
"#;

    #[test]
    fn test_parse_sections_and_delimiters() {
        let doc = ConfigDocument::parse(CEPH_CONF).unwrap();

        assert!(doc.has_section("global"));
        assert!(doc.has_section("osd"));
        assert!(!doc.has_section("mds"));
        assert_eq!(doc.get("global", "auth cluster required"), Some("none"));
        assert_eq!(doc.get("osd", "osd journal size"), Some("1024"));
        assert_eq!(
            doc.get("osd", "keyring"),
            Some("/var/lib/ceph/osd/$cluster-$id/keyring")
        );
        assert_eq!(doc.sections().collect::<Vec<_>>(), vec!["global", "osd"]);
    }

    #[test]
    fn test_default_section_is_inherited() {
        let doc = ConfigDocument::parse("[DEFAULT]\ndebug = True\n[libvirt]\nrbd_user = nova-compute\n").unwrap();

        assert!(doc.has_section("DEFAULT"));
        assert_eq!(doc.get("libvirt", "debug"), Some("True"));
        assert_eq!(doc.get("DEFAULT", "debug"), Some("True"));
        assert_eq!(doc.get("libvirt", "rbd_user"), Some("nova-compute"));
    }

    #[test]
    fn test_keys_are_case_folded() {
        let doc = ConfigDocument::parse("[glance_store]\nDefault_Store = rbd\n").unwrap();
        assert_eq!(doc.get("glance_store", "default_store"), Some("rbd"));
        assert_eq!(doc.get("glance_store", "DEFAULT_STORE"), Some("rbd"));
    }

    #[test]
    fn test_continuation_lines() {
        let doc = ConfigDocument::parse("[glance_store]\nstores = a,\n  b,\n  c\n").unwrap();
        assert_eq!(doc.get("glance_store", "stores"), Some("a,\nb,\nc"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            ConfigDocument::parse("fsid = x\n").unwrap_err(),
            IniError::MissingSectionHeader { line: 1 }
        );
        assert!(matches!(
            ConfigDocument::parse("[global\n").unwrap_err(),
            IniError::Syntax { line: 1, .. }
        ));
        assert!(matches!(
            ConfigDocument::parse("[global]\njust words\n").unwrap_err(),
            IniError::Syntax { line: 2, .. }
        ));
    }
}
