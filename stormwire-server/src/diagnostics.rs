//! Diagnostics ring
//!
//! A bounded ring of recently received products, parsed or not. Parse
//! failures keep their raw body here so a bad product can be inspected
//! after the fact over `GET /api/recent`.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stormwire_common::alert::AlertSource;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 50;

/// How much raw text a failed product keeps.
const RAW_SNIPPET_LIMIT: usize = 4096;

/// One remembered product.
#[derive(Debug, Clone, Serialize)]
pub struct RecentProduct {
    pub received_at: DateTime<Utc>,
    pub source: AlertSource,
    /// Product ids produced, empty when parsing failed
    pub product_ids: Vec<String>,
    pub event_name: Option<String>,
    /// The parse failure, when there was one
    pub error: Option<String>,
    /// Raw body, retained only for failures
    pub raw: Option<String>,
}

/// Bounded ring of recent products, newest first.
pub struct DiagnosticsRing {
    entries: Mutex<VecDeque<RecentProduct>>,
    capacity: usize,
}

impl DiagnosticsRing {
    pub fn new(capacity: usize) -> Self {
        DiagnosticsRing {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record_success(&self, source: AlertSource, product_ids: Vec<String>, event_name: &str) {
        self.push(RecentProduct {
            received_at: Utc::now(),
            source,
            product_ids,
            event_name: Some(event_name.to_string()),
            error: None,
            raw: None,
        });
    }

    pub fn record_failure(&self, source: AlertSource, raw: &str, error: &str) {
        let snippet: String = raw.chars().take(RAW_SNIPPET_LIMIT).collect();
        self.push(RecentProduct {
            received_at: Utc::now(),
            source,
            product_ids: Vec::new(),
            event_name: None,
            error: Some(error.to_string()),
            raw: Some(snippet),
        });
    }

    fn push(&self, entry: RecentProduct) {
        let mut entries = self.entries.lock().expect("diagnostics lock poisoned");
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    /// Newest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<RecentProduct> {
        let entries = self.entries.lock().expect("diagnostics lock poisoned");
        entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("diagnostics lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
