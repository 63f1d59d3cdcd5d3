//! Alert sources
//!
//! Two asymmetric feeds drive the pipeline: the push source (Weather Wire
//! over XMPP) delivers products the moment they are issued, and the pull
//! source (NWS REST API) periodically reports the authoritative active set.
//! Each runs in its own task with its own failure and backoff profile.

pub mod nws_api;
pub mod nwws;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health state a source exposes without blocking its transport loop.
#[derive(Default)]
pub struct SourceHealth {
    connected: AtomicBool,
    products_received: AtomicU64,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

/// Snapshot of a source's health for `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealthSnapshot {
    pub connected: bool,
    pub products_received: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SourceHealth {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_product(&self) {
        self.products_received.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock().expect("health lock poisoned") = Some(Utc::now());
    }

    pub fn products_received(&self) -> u64 {
        self.products_received.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SourceHealthSnapshot {
        SourceHealthSnapshot {
            connected: self.is_connected(),
            products_received: self.products_received(),
            last_activity: *self.last_activity.lock().expect("health lock poisoned"),
        }
    }
}
