//! Broadcast frame taxonomy
//!
//! Every outbound frame is `{type, data, timestamp}`. Inbound control is
//! limited to `ping`, `subscribe` and `chaser_position_update`; anything
//! else is answered with `error:unsupported`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use stormwire_common::alert::Alert;
use stormwire_common::events::AlertEvent;

/// Outbound frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    ConnectionAck,
    Bulk,
    New,
    Update,
    Remove,
    SystemStatus,
    Pong,
    Error,
}

/// A single outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    fn new(kind: FrameKind, data: Value) -> Self {
        Frame {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn connection_ack(subscriber_id: u64) -> Self {
        Frame::new(
            FrameKind::ConnectionAck,
            json!({ "subscriber_id": subscriber_id }),
        )
    }

    pub fn bulk(alerts: &[Alert]) -> Self {
        Frame::new(
            FrameKind::Bulk,
            json!({ "count": alerts.len(), "alerts": alerts }),
        )
    }

    pub fn pong() -> Self {
        Frame::new(FrameKind::Pong, Value::Null)
    }

    pub fn error(message: &str) -> Self {
        Frame::new(FrameKind::Error, json!({ "error": message }))
    }

    pub fn unsupported(kind: &str) -> Self {
        Frame::new(
            FrameKind::Error,
            json!({ "error": "unsupported", "request_type": kind }),
        )
    }

    pub fn system_status(status: &str, detail: Value) -> Self {
        Frame::new(
            FrameKind::SystemStatus,
            json!({ "status": status, "detail": detail }),
        )
    }

    pub fn shutting_down() -> Self {
        Frame::system_status("shutting_down", Value::Null)
    }

    /// Map a store event onto the wire taxonomy.
    pub fn from_event(event: &AlertEvent) -> Self {
        match event {
            AlertEvent::AlertAdded { alert, .. } => {
                Frame::new(FrameKind::New, json!({ "alert": alert }))
            }
            AlertEvent::AlertUpdated { alert, .. } => {
                Frame::new(FrameKind::Update, json!({ "alert": alert }))
            }
            AlertEvent::AlertRemoved {
                product_id,
                event_name,
                reason,
                ..
            } => Frame::new(
                FrameKind::Remove,
                json!({
                    "product_id": product_id,
                    "event_name": event_name,
                    "reason": reason,
                }),
            ),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Decoded inbound control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    Subscribe(SubscriptionFilter),
    /// Side-channel payload, passed through and otherwise ignored here
    ChaserPositionUpdate(Value),
    Unsupported(String),
    Malformed,
}

impl Inbound {
    pub fn parse(raw: &str) -> Inbound {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return Inbound::Malformed;
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Inbound::Malformed;
        };
        match kind {
            "ping" => Inbound::Ping,
            "subscribe" => {
                let data = value.get("data").cloned().unwrap_or(Value::Null);
                Inbound::Subscribe(SubscriptionFilter::from_request(&data))
            }
            "chaser_position_update" => {
                Inbound::ChaserPositionUpdate(value.get("data").cloned().unwrap_or(Value::Null))
            }
            other => Inbound::Unsupported(other.to_string()),
        }
    }
}

/// Server-side frame filter a subscriber may request.
///
/// Empty sets mean "no filtering". Remove frames carry no geography, so the
/// hub tracks which product ids each subscriber has seen and forwards
/// removals for those.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub states: BTreeSet<String>,
    pub phenomena: BTreeSet<String>,
}

impl SubscriptionFilter {
    pub fn from_request(data: &Value) -> Self {
        let collect = |key: &str| -> BTreeSet<String> {
            data.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| s.to_ascii_uppercase())
                        .collect()
                })
                .unwrap_or_default()
        };
        SubscriptionFilter {
            states: collect("states"),
            phenomena: collect("phenomena"),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.states.is_empty() && self.phenomena.is_empty()
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        if !self.phenomena.is_empty() && !self.phenomena.contains(&alert.phenomenon) {
            return false;
        }
        if !self.states.is_empty() {
            let alert_states = alert.states();
            if self.states.intersection(&alert_states).next().is_none() {
                return false;
            }
        }
        true
    }
}

/// Reasons a subscriber connection closes, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    SlowConsumer,
    HeartbeatTimeout,
    ServerShutdown,
    TransportError,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::SlowConsumer => "slow_consumer",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::ServerShutdown => "server_shutdown",
            DisconnectReason::TransportError => "transport_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormwire_common::alert::AlertSource;
    use stormwire_common::events::RemovalReason;

    fn alert(phenomenon: &str, area: &str) -> Alert {
        let mut a = Alert::new(format!("{phenomenon}-{area}"), AlertSource::Push);
        a.phenomenon = phenomenon.to_string();
        a.affected_areas = vec![area.to_string()];
        a
    }

    #[test]
    fn frames_carry_type_data_timestamp() {
        let frame = Frame::connection_ack(7);
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "connection_ack");
        assert_eq!(value["data"]["subscriber_id"], 7);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn event_mapping() {
        let added = AlertEvent::added(alert("SV", "OHC085"));
        assert_eq!(Frame::from_event(&added).kind, FrameKind::New);

        let removed = AlertEvent::removed("id".into(), "name".into(), RemovalReason::Expired);
        let frame = Frame::from_event(&removed);
        assert_eq!(frame.kind, FrameKind::Remove);
        assert_eq!(frame.data["reason"], "expired");
    }

    #[test]
    fn inbound_ping() {
        assert_eq!(Inbound::parse(r#"{"type":"ping"}"#), Inbound::Ping);
    }

    #[test]
    fn inbound_subscribe_with_filter() {
        let parsed =
            Inbound::parse(r#"{"type":"subscribe","data":{"states":["oh"],"phenomena":["TO"]}}"#);
        match parsed {
            Inbound::Subscribe(filter) => {
                assert!(filter.states.contains("OH"));
                assert!(filter.phenomena.contains("TO"));
            }
            other => panic!("expected subscribe, got {other:?}"),
        }
    }

    #[test]
    fn inbound_unknown_type_is_unsupported() {
        assert_eq!(
            Inbound::parse(r#"{"type":"get_coffee"}"#),
            Inbound::Unsupported("get_coffee".into())
        );
        assert_eq!(Inbound::parse("not json"), Inbound::Malformed);
    }

    #[test]
    fn filter_matches_by_state_and_phenomenon() {
        let filter = SubscriptionFilter::from_request(
            &serde_json::json!({ "states": ["OH"], "phenomena": ["TO"] }),
        );
        assert!(filter.matches(&alert("TO", "OHC085")));
        assert!(!filter.matches(&alert("SV", "OHC085")));
        assert!(!filter.matches(&alert("TO", "PAC003")));

        let passthrough = SubscriptionFilter::default();
        assert!(passthrough.is_passthrough());
        assert!(passthrough.matches(&alert("SV", "PAC003")));
    }
}
