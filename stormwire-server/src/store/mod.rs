//! Alert store
//!
//! The single authoritative in-memory set of active alerts. All mutation is
//! serialized through one writer lock; events fire synchronously inside the
//! critical section, so two concurrent upserts have a total order and their
//! events observe it. Readers either take the lock briefly or work from an
//! owned snapshot.

pub mod persist;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, info, warn};

use stormwire_common::alert::{Alert, AlertStatus, EventKey, VtecAction};
use stormwire_common::events::{AlertEvent, EventBus, RemovalReason};

/// Default per-process event channel capacity.
const EVENT_BUS_CAPACITY: usize = 1024;

/// What an upsert did with the incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Inserted as a new active alert
    Added,
    /// Replaced the fields of an existing event
    Updated,
    /// Terminated a prior event (CAN/EXP/UPG); the record itself was not stored
    Superseded,
    /// Duplicate or cancellation of an unknown event; nothing changed
    Ignored,
}

/// What a removal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Absent,
}

/// Counters exposed over `/api/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_alerts: usize,
    pub warnings: usize,
    pub watches: usize,
    pub by_phenomenon: std::collections::BTreeMap<String, usize>,
    pub by_source: std::collections::BTreeMap<String, usize>,
}

struct StoreInner {
    alerts: HashMap<String, Alert>,
    /// `(office, phenomenon, significance, etn)` → active product_id
    index: HashMap<EventKey, String>,
    /// Min-heap on expiration; entries are lazily invalidated on pop
    expirations: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
}

impl StoreInner {
    fn insert(&mut self, alert: Alert) {
        if let Some(key) = alert.event_key() {
            self.index.insert(key, alert.product_id.clone());
        }
        if let Some(exp) = alert.expiration_time {
            self.expirations
                .push(Reverse((exp, alert.product_id.clone())));
        }
        self.alerts.insert(alert.product_id.clone(), alert);
    }

    fn remove(&mut self, product_id: &str) -> Option<Alert> {
        let alert = self.alerts.remove(product_id)?;
        if let Some(key) = alert.event_key() {
            // Only drop the index entry if it still points at this record.
            if self.index.get(&key).map(String::as_str) == Some(product_id) {
                self.index.remove(&key);
            }
        }
        Some(alert)
    }

    /// Earliest expiration among live alerts, pruning stale heap entries.
    fn next_expiration(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse((exp, id))) = self.expirations.peek().cloned() {
            match self.alerts.get(&id) {
                Some(alert) if alert.expiration_time == Some(exp) => return Some(exp),
                _ => {
                    self.expirations.pop();
                }
            }
        }
        None
    }
}

/// The shared alert store.
pub struct AlertStore {
    inner: Mutex<StoreInner>,
    bus: EventBus,
    grace: Duration,
    /// Woken whenever the earliest expiration may have moved forward.
    eviction_wakeup: Notify,
}

impl AlertStore {
    pub fn new(grace_seconds: i64) -> Self {
        AlertStore {
            inner: Mutex::new(StoreInner {
                alerts: HashMap::new(),
                index: HashMap::new(),
                expirations: BinaryHeap::new(),
            }),
            bus: EventBus::new(EVENT_BUS_CAPACITY),
            grace: Duration::seconds(grace_seconds),
            eviction_wakeup: Notify::new(),
        }
    }

    /// Subscribe to change events only. For the bulk-then-stream guarantee
    /// use [`AlertStore::snapshot_and_subscribe`].
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.bus.subscribe()
    }

    /// Atomically take a point-in-time snapshot and an event subscription:
    /// every event is either reflected in the snapshot or delivered to the
    /// receiver, never both, never neither.
    pub fn snapshot_and_subscribe(&self) -> (Vec<Alert>, broadcast::Receiver<AlertEvent>) {
        let inner = self.inner.lock().expect("store lock poisoned");
        let rx = self.bus.subscribe();
        let mut alerts: Vec<Alert> = inner.alerts.values().cloned().collect();
        sort_for_display(&mut alerts);
        (alerts, rx)
    }

    /// Apply an incoming parsed record. The VTEC action drives the outcome.
    pub fn upsert(&self, incoming: Alert) -> UpsertOutcome {
        let mut inner = self.inner.lock().expect("store lock poisoned");

        if incoming.affected_areas.is_empty() {
            debug_assert!(false, "parser produced an alert without affected areas");
            warn!(product_id = %incoming.product_id, "dropping alert without affected areas");
            return UpsertOutcome::Ignored;
        }

        let action = incoming.vtec.as_ref().map(|v| v.action);
        let outcome = match action {
            Some(VtecAction::Can) | Some(VtecAction::Upg) => {
                self.terminate_locked(&mut inner, &incoming, RemovalReason::Cancelled)
            }
            Some(VtecAction::Exp) => {
                self.terminate_locked(&mut inner, &incoming, RemovalReason::Expired)
            }
            Some(VtecAction::New) => {
                if inner.alerts.contains_key(&incoming.product_id) {
                    UpsertOutcome::Ignored
                } else {
                    self.add_locked(&mut inner, incoming)
                }
            }
            Some(a) if a.is_update() => self.update_locked(&mut inner, incoming),
            Some(VtecAction::Rou) => UpsertOutcome::Ignored,
            Some(_) | None => self.upsert_without_vtec_locked(&mut inner, incoming),
        };

        if matches!(outcome, UpsertOutcome::Added | UpsertOutcome::Updated) {
            self.eviction_wakeup.notify_one();
        }
        outcome
    }

    fn add_locked(&self, inner: &mut StoreInner, incoming: Alert) -> UpsertOutcome {
        info!(
            product_id = %incoming.product_id,
            event = %incoming.event_name,
            source = %incoming.source,
            "alert added"
        );
        self.bus.emit_lossy(AlertEvent::added(incoming.clone()));
        inner.insert(incoming);
        UpsertOutcome::Added
    }

    fn update_locked(&self, inner: &mut StoreInner, incoming: Alert) -> UpsertOutcome {
        let Some(key) = incoming.event_key() else {
            return self.upsert_without_vtec_locked(inner, incoming);
        };

        let Some(existing_id) = inner.index.get(&key).cloned() else {
            // A follow-up for an event this process never saw; treat as NEW.
            return self.add_locked(inner, incoming);
        };

        let Some(mut existing) = inner.remove(&existing_id) else {
            return self.add_locked(inner, incoming);
        };

        // Replace fields but keep the original issuance stamp and the
        // accounting trail.
        let update_count = existing.update_count;
        let parsed_at = existing.parsed_at;
        let issued_time = existing.issued_time;
        existing = incoming;
        existing.issued_time = issued_time.or(existing.issued_time);
        existing.update_count = update_count;
        existing.parsed_at = parsed_at;
        existing.mark_updated();

        info!(
            product_id = %existing.product_id,
            prior = %existing_id,
            updates = existing.update_count,
            "alert updated"
        );
        self.bus.emit_lossy(AlertEvent::updated(existing.clone()));
        inner.insert(existing);
        UpsertOutcome::Updated
    }

    fn terminate_locked(
        &self,
        inner: &mut StoreInner,
        incoming: &Alert,
        reason: RemovalReason,
    ) -> UpsertOutcome {
        let Some(key) = incoming.event_key() else {
            return UpsertOutcome::Ignored;
        };
        let Some(existing_id) = inner.index.get(&key).cloned() else {
            debug!(product_id = %incoming.product_id, "termination for unknown event");
            return UpsertOutcome::Ignored;
        };
        match inner.remove(&existing_id) {
            Some(removed) => {
                info!(product_id = %existing_id, ?reason, "alert terminated");
                self.bus.emit_lossy(AlertEvent::removed(
                    removed.product_id,
                    removed.event_name,
                    reason,
                ));
                UpsertOutcome::Superseded
            }
            None => UpsertOutcome::Ignored,
        }
    }

    /// No VTEC: deduplicate on product_id alone.
    fn upsert_without_vtec_locked(&self, inner: &mut StoreInner, incoming: Alert) -> UpsertOutcome {
        match inner.alerts.get(&incoming.product_id) {
            None => self.add_locked(inner, incoming),
            Some(existing) if existing.last_updated == incoming.last_updated => {
                UpsertOutcome::Ignored
            }
            Some(existing) => {
                let update_count = existing.update_count;
                let parsed_at = existing.parsed_at;
                let issued_time = existing.issued_time;
                let id = incoming.product_id.clone();
                let mut merged = incoming;
                merged.issued_time = issued_time.or(merged.issued_time);
                merged.update_count = update_count;
                merged.parsed_at = parsed_at;
                merged.mark_updated();
                inner.remove(&id);
                self.bus.emit_lossy(AlertEvent::updated(merged.clone()));
                inner.insert(merged);
                UpsertOutcome::Updated
            }
        }
    }

    /// Remove by id, e.g. the eviction loop or a manual API delete.
    pub fn remove(&self, product_id: &str, reason: RemovalReason) -> RemoveOutcome {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        match inner.remove(product_id) {
            Some(mut removed) => {
                removed.status = match reason {
                    RemovalReason::Expired => AlertStatus::Expired,
                    _ => AlertStatus::Cancelled,
                };
                info!(product_id, ?reason, "alert removed");
                self.bus.emit_lossy(AlertEvent::removed(
                    removed.product_id,
                    removed.event_name,
                    reason,
                ));
                RemoveOutcome::Removed
            }
            None => RemoveOutcome::Absent,
        }
    }

    pub fn get(&self, product_id: &str) -> Option<Alert> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.alerts.get(product_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the active set, priority-ordered.
    pub fn snapshot(&self) -> Vec<Alert> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut alerts: Vec<Alert> = inner.alerts.values().cloned().collect();
        drop(inner);
        sort_for_display(&mut alerts);
        alerts
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut stats = StoreStats {
            total_alerts: inner.alerts.len(),
            ..StoreStats::default()
        };
        for alert in inner.alerts.values() {
            if alert.is_warning() {
                stats.warnings += 1;
            }
            if alert.is_watch() {
                stats.watches += 1;
            }
            *stats
                .by_phenomenon
                .entry(alert.phenomenon.clone())
                .or_default() += 1;
            *stats
                .by_source
                .entry(alert.source.to_string())
                .or_default() += 1;
        }
        stats
    }

    /// Rehydrate persisted alerts without emitting events. Entries whose
    /// expiration has passed are dropped by the persistence loader before
    /// this is called.
    pub fn restore(&self, alerts: Vec<Alert>) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        for alert in alerts {
            inner.insert(alert);
        }
        self.eviction_wakeup.notify_one();
    }

    /// Reconcile a full pull-source result against the active set.
    ///
    /// Arrivals (unknown product ids) are upserted; departures (pull-sourced
    /// alerts no longer reported) are removed only once their expiration has
    /// passed. The pull feed is the authoritative backstop, so after one
    /// cycle its view prevails.
    pub fn reconcile_pull(&self, pulled: Vec<Alert>, now: DateTime<Utc>) -> (usize, usize) {
        let pulled_ids: std::collections::HashSet<String> =
            pulled.iter().map(|a| a.product_id.clone()).collect();
        let pulled_keys: std::collections::HashSet<EventKey> =
            pulled.iter().filter_map(|a| a.event_key()).collect();

        let mut added_or_updated = 0;
        for alert in pulled {
            match self.upsert(alert) {
                UpsertOutcome::Added | UpsertOutcome::Updated => added_or_updated += 1,
                _ => {}
            }
        }

        // Departures: alerts the authoritative feed no longer reports and
        // whose expiration has passed. Unexpired alerts the feed missed are
        // left alone; the eviction loop owns their natural end of life.
        let stale: Vec<String> = {
            let inner = self.inner.lock().expect("store lock poisoned");
            inner
                .alerts
                .values()
                .filter(|a| !pulled_ids.contains(&a.product_id))
                .filter(|a| a.event_key().map_or(true, |k| !pulled_keys.contains(&k)))
                .filter(|a| a.is_expired_at(now))
                .map(|a| a.product_id.clone())
                .collect()
        };
        let mut removed = 0;
        for id in stale {
            if self.remove(&id, RemovalReason::Expired) == RemoveOutcome::Removed {
                removed += 1;
            }
        }
        (added_or_updated, removed)
    }

    /// Evict everything due at `now`; returns the ids removed.
    ///
    /// Never removes an alert whose expiration is still in the future,
    /// whatever its content claims.
    pub fn evict_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<String> = {
            let inner = self.inner.lock().expect("store lock poisoned");
            inner
                .alerts
                .values()
                .filter(|a| {
                    a.expiration_time
                        .map_or(false, |exp| exp + self.grace <= now)
                })
                .map(|a| a.product_id.clone())
                .collect()
        };
        let mut removed = Vec::new();
        for id in due {
            if self.remove(&id, RemovalReason::Expired) == RemoveOutcome::Removed {
                removed.push(id);
            }
        }
        removed
    }

    /// The eviction loop. Sleeps until the earliest `expiration + grace`,
    /// wakes early when an upsert moves that deadline, exits on shutdown.
    pub async fn run_eviction(&self, mut shutdown: watch::Receiver<bool>) {
        info!(grace_seconds = self.grace.num_seconds(), "eviction loop started");
        loop {
            let next_deadline = {
                let mut inner = self.inner.lock().expect("store lock poisoned");
                inner.next_expiration().map(|exp| exp + self.grace)
            };

            let sleep_for = match next_deadline {
                Some(deadline) => {
                    let until = deadline - Utc::now();
                    until
                        .to_std()
                        .unwrap_or(std::time::Duration::from_millis(0))
                }
                // Nothing queued; wait for an upsert to wake us.
                None => std::time::Duration::from_secs(3600),
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let removed = self.evict_due(Utc::now());
                    if !removed.is_empty() {
                        info!(count = removed.len(), "evicted expired alerts");
                    }
                }
                _ = self.eviction_wakeup.notified() => {
                    // Deadline may have moved; recompute.
                }
                _ = shutdown.changed() => {
                    info!("eviction loop stopping");
                    return;
                }
            }
        }
    }
}

fn sort_for_display(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.issued_time.cmp(&a.issued_time))
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
}
