//! Event types for the alert pipeline
//!
//! The store emits an `AlertEvent` for every mutation it applies, in
//! mutation order, through an `EventBus` backed by `tokio::broadcast`.
//! Subscribers that need the bulk-then-stream partition guarantee must
//! obtain their receiver while holding the store's writer lock; the bus
//! itself only guarantees per-receiver ordering of whatever was sent after
//! subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::alert::Alert;

/// Why an alert left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Expired,
    Cancelled,
    Manual,
}

/// A change to the active alert set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// A new alert entered the active set
    AlertAdded {
        alert: Box<Alert>,
        timestamp: DateTime<Utc>,
    },

    /// An existing alert's fields were replaced by a follow-up product
    AlertUpdated {
        alert: Box<Alert>,
        timestamp: DateTime<Utc>,
    },

    /// An alert left the active set
    AlertRemoved {
        product_id: String,
        event_name: String,
        reason: RemovalReason,
        timestamp: DateTime<Utc>,
    },
}

impl AlertEvent {
    pub fn added(alert: Alert) -> Self {
        AlertEvent::AlertAdded {
            alert: Box::new(alert),
            timestamp: Utc::now(),
        }
    }

    pub fn updated(alert: Alert) -> Self {
        AlertEvent::AlertUpdated {
            alert: Box::new(alert),
            timestamp: Utc::now(),
        }
    }

    pub fn removed(product_id: String, event_name: String, reason: RemovalReason) -> Self {
        AlertEvent::AlertRemoved {
            product_id,
            event_name,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Short name for logging and assertions.
    pub fn event_type(&self) -> &'static str {
        match self {
            AlertEvent::AlertAdded { .. } => "AlertAdded",
            AlertEvent::AlertUpdated { .. } => "AlertUpdated",
            AlertEvent::AlertRemoved { .. } => "AlertRemoved",
        }
    }

    /// The product the event concerns.
    pub fn product_id(&self) -> &str {
        match self {
            AlertEvent::AlertAdded { alert, .. } | AlertEvent::AlertUpdated { alert, .. } => {
                &alert.product_id
            }
            AlertEvent::AlertRemoved { product_id, .. } => product_id,
        }
    }
}

/// Central event distribution bus.
///
/// Backed by `tokio::broadcast`: non-blocking publish, multiple concurrent
/// subscribers, automatic cleanup when receivers drop, and lag detection for
/// subscribers that fall behind the channel capacity.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AlertEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Dropping the receiver cancels the
    /// subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the subscriber count, or an error when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: AlertEvent) -> Result<usize, broadcast::error::SendError<AlertEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case.
    pub fn emit_lossy(&self, event: AlertEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSource;

    fn sample_event() -> AlertEvent {
        AlertEvent::added(Alert::new("KCLE-SV.W-201815-0042".into(), AlertSource::Push))
    }

    #[test]
    fn emit_without_subscribers_errors() {
        let bus = EventBus::new(16);
        assert!(bus.emit(sample_event()).is_err());
    }

    #[test]
    fn emit_lossy_never_panics() {
        let bus = EventBus::new(2);
        for _ in 0..10 {
            bus.emit_lossy(sample_event());
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(sample_event()).unwrap();
        bus.emit(AlertEvent::removed(
            "KCLE-SV.W-201815-0042".into(),
            "Severe Thunderstorm Warning".into(),
            RemovalReason::Cancelled,
        ))
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().event_type(), "AlertAdded");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "AlertRemoved");
        assert_eq!(second.product_id(), "KCLE-SV.W-201815-0042");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_events() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(sample_event()).unwrap();
        assert_eq!(rx1.recv().await.unwrap().event_type(), "AlertAdded");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "AlertAdded");
    }

    #[test]
    fn event_serializes_with_snake_case_tag() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["type"], "alert_added");
        let removed = AlertEvent::removed("x".into(), "y".into(), RemovalReason::Expired);
        let json = serde_json::to_value(removed).unwrap();
        assert_eq!(json["type"], "alert_removed");
        assert_eq!(json["reason"], "expired");
    }
}
