//! Minimal INI reader.
//!
//! `[section]` headers (names kept verbatim), `key = value` or `key: value`
//! entries, whole-line `#` / `;` comments. Keys are matched case-insensitively
//! and sections keep file order. A key may appear once per section.
//!
//! `[DEFAULT]` is not a section of its own: its entries are the fallback for
//! every other section.

use ovmon_mgmt::management::MonitorError;

const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    entries: Vec<(String, String)>,
    defaults: Vec<(String, String)>,
}

impl IniSection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
            defaults: Vec::new(),
        }
    }

    /// Value for `key`, falling back to `[DEFAULT]`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .chain(self.defaults.iter())
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`get`](Self::get), but an empty value counts as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

pub fn parse_ini(content: &str) -> Result<IniDocument, MonitorError> {
    let mut doc = IniDocument::default();

    for (n, line) in content.lines().enumerate() {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') || raw.starts_with(';') {
            continue;
        }

        if let Some(header) = raw.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| {
                MonitorError::invalid_config(format!("Malformed section header on line {}", n + 1))
                    .with_detail(raw)
            })?;
            if doc.section(name).is_some() {
                return Err(MonitorError::invalid_config(format!(
                    "Duplicate section '{}' in config",
                    name
                )));
            }
            doc.sections.push(IniSection::new(name));
            continue;
        }

        let split_at = raw.find(['=', ':']).ok_or_else(|| {
            MonitorError::invalid_config(format!("Expected 'key = value' on line {}", n + 1))
                .with_detail(raw)
        })?;
        let key = raw[..split_at].trim().to_lowercase();
        let value = raw[split_at + 1..].trim().to_string();

        let section = doc.sections.last_mut().ok_or_else(|| {
            MonitorError::invalid_config(format!(
                "Entry before any section header on line {}",
                n + 1
            ))
        })?;
        if section.entries.iter().any(|(k, _)| *k == key) {
            return Err(MonitorError::invalid_config(format!(
                "Duplicate option '{}' in section '{}'",
                key, section.name
            )));
        }
        section.entries.push((key, value));
    }

    if let Some(pos) = doc.sections.iter().position(|s| s.name == DEFAULT_SECTION) {
        let defaults = doc.sections.remove(pos).entries;
        for section in &mut doc.sections {
            section.defaults = defaults.clone();
        }
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovmon_mgmt::management::MonitorErrorKind;

    #[test]
    fn sections_keep_order_and_case() {
        let doc = parse_ini("[Monitor]\nname = x\n\n[b]\n[A VPN]\n").unwrap();
        let names: Vec<_> = doc.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Monitor", "b", "A VPN"]);
        assert!(doc.section("monitor").is_none());
    }

    #[test]
    fn keys_case_insensitive_and_both_delimiters() {
        let doc = parse_ini("[s]\nHost = localhost\nport: 5555\nsocket =\n").unwrap();
        let s = doc.section("s").unwrap();
        assert_eq!(s.get("host"), Some("localhost"));
        assert_eq!(s.get("PORT"), Some("5555"));
        assert_eq!(s.get("socket"), Some(""));
        assert_eq!(s.get_non_empty("socket"), None);
        assert_eq!(s.get("missing"), None);
    }

    #[test]
    fn value_keeps_later_delimiters() {
        let doc = parse_ini("[s]\ndatetime_format = %Y/%d/%m %S:%H:%M\n").unwrap();
        assert_eq!(
            doc.section("s").unwrap().get("datetime_format"),
            Some("%Y/%d/%m %S:%H:%M")
        );
    }

    #[test]
    fn comments_skipped() {
        let doc = parse_ini("# top\n[s]\n; note\nkey = v # not a comment\n").unwrap();
        assert_eq!(doc.section("s").unwrap().get("key"), Some("v # not a comment"));
    }

    #[test]
    fn rejects_malformed_input() {
        for text in [
            "key = v\n",
            "[s\n",
            "[s]\njunk\n",
            "[s]\n[s]\n",
            "[s]\nhost = a\nHOST = b\n",
        ] {
            let err = parse_ini(text).unwrap_err();
            assert_eq!(err.kind, MonitorErrorKind::InvalidConfig, "{}", text);
        }
    }

    #[test]
    fn default_section_is_a_fallback() {
        let doc = parse_ini("[DEFAULT]\nallow_disconnect = false\nport = 5555\n[Monitor]\n[a]\nport = 7505\n[b]\n").unwrap();
        let names: Vec<_> = doc.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Monitor", "a", "b"]);
        assert!(doc.section("DEFAULT").is_none());
        assert_eq!(doc.section("a").unwrap().get("port"), Some("7505"));
        assert_eq!(doc.section("b").unwrap().get("port"), Some("5555"));
        assert_eq!(doc.section("Monitor").unwrap().get("allow_disconnect"), Some("false"));
    }
}
