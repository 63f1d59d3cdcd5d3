//! UGC reference table
//!
//! Maps geographic codes to human-readable names. Loaded once from a
//! bundled JSON file at startup and immutable afterwards; a missing or
//! unreadable file is a fatal configuration error.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;

/// County vs. forecast zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UgcKind {
    #[serde(rename = "C")]
    County,
    #[serde(rename = "Z")]
    Zone,
}

/// One reference record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UgcEntry {
    pub code: String,
    pub name: String,
    pub state: String,
    pub kind: UgcKind,
}

/// The loaded code → name table.
pub struct UgcTable {
    entries: HashMap<String, UgcEntry>,
}

impl UgcTable {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ReferenceData(format!("cannot read {}: {e}", path.display()))
        })?;
        let records: Vec<UgcEntry> = serde_json::from_str(&raw).map_err(|e| {
            Error::ReferenceData(format!("cannot parse {}: {e}", path.display()))
        })?;

        let mut entries = HashMap::with_capacity(records.len());
        for entry in records {
            entries.insert(entry.code.clone(), entry);
        }
        info!(count = entries.len(), path = %path.display(), "loaded UGC reference table");
        Ok(UgcTable { entries })
    }

    /// Empty table for tests and API-description fallbacks.
    pub fn empty() -> Self {
        UgcTable {
            entries: HashMap::new(),
        }
    }

    pub fn from_entries(records: Vec<UgcEntry>) -> Self {
        let mut entries = HashMap::with_capacity(records.len());
        for entry in records {
            entries.insert(entry.code.clone(), entry);
        }
        UgcTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Human name for a code, with the legacy short-code fallback some
    /// upstream data uses (`MD509` standing for `MDZ509`).
    pub fn lookup(&self, code: &str) -> Option<&str> {
        if let Some(entry) = self.entries.get(code) {
            return Some(&entry.name);
        }
        if code.len() == 6 {
            let short = format!("{}{}", &code[..2], &code[3..]);
            if let Some(entry) = self.entries.get(&short) {
                return Some(&entry.name);
            }
        }
        None
    }

    /// Render a code list as a `"; "`-joined string of names, deduplicated
    /// preserving order. Unknown codes render as themselves rather than
    /// disappearing.
    pub fn display_locations(&self, codes: &[String]) -> String {
        let mut names: Vec<&str> = Vec::new();
        for code in codes {
            let name = self.lookup(code).unwrap_or(code.as_str());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.join("; ")
    }

    /// Truncated rendering for display surfaces: at most `max_names` full
    /// names plus an overflow count.
    pub fn display_locations_truncated(&self, codes: &[String], max_names: usize) -> String {
        let mut names: Vec<&str> = Vec::new();
        for code in codes {
            let name = self.lookup(code).unwrap_or(code.as_str());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        if names.len() <= max_names {
            names.join("; ")
        } else {
            let shown = names[..max_names].join("; ");
            format!("{shown}; +{} more", names.len() - max_names)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> UgcTable {
        UgcTable::from_entries(vec![
            UgcEntry {
                code: "OHC085".into(),
                name: "Lake County, OH".into(),
                state: "OH".into(),
                kind: UgcKind::County,
            },
            UgcEntry {
                code: "OHC093".into(),
                name: "Lorain County, OH".into(),
                state: "OH".into(),
                kind: UgcKind::County,
            },
            UgcEntry {
                code: "MD509".into(),
                name: "Anne Arundel, MD".into(),
                state: "MD".into(),
                kind: UgcKind::Zone,
            },
        ])
    }

    #[test]
    fn lookup_direct_and_legacy() {
        let t = table();
        assert_eq!(t.lookup("OHC085"), Some("Lake County, OH"));
        assert_eq!(t.lookup("MDZ509"), Some("Anne Arundel, MD"));
        assert_eq!(t.lookup("XXC000"), None);
    }

    #[test]
    fn display_joins_with_semicolons() {
        let t = table();
        let codes = vec!["OHC085".to_string(), "OHC093".to_string()];
        assert_eq!(
            t.display_locations(&codes),
            "Lake County, OH; Lorain County, OH"
        );
    }

    #[test]
    fn display_deduplicates_preserving_order() {
        let t = table();
        let codes = vec![
            "OHC093".to_string(),
            "OHC085".to_string(),
            "OHC093".to_string(),
        ];
        assert_eq!(
            t.display_locations(&codes),
            "Lorain County, OH; Lake County, OH"
        );
    }

    #[test]
    fn unknown_codes_render_as_themselves() {
        let t = table();
        let codes = vec!["PAC003".to_string()];
        assert_eq!(t.display_locations(&codes), "PAC003");
    }

    #[test]
    fn truncation_adds_overflow_count() {
        let t = table();
        let codes = vec![
            "OHC085".to_string(),
            "OHC093".to_string(),
            "PAC003".to_string(),
        ];
        assert_eq!(
            t.display_locations_truncated(&codes, 2),
            "Lake County, OH; Lorain County, OH; +1 more"
        );
        assert_eq!(
            t.display_locations_truncated(&codes, 5),
            "Lake County, OH; Lorain County, OH; PAC003"
        );
    }
}
