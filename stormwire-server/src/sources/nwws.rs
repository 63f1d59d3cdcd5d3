//! Push source: NWWS-OI Weather Wire client
//!
//! A long-lived XMPP client that joins the Weather Wire multi-user chat
//! room and treats every room message body as a raw text product. Delivery
//! here is the fastest path, ahead of the REST feed, so the transport loop
//! reconnects aggressively: exponential backoff from 2 s to a 60 s ceiling
//! with full jitter. Authentication failures are fatal and surface to the
//! supervisor instead of retrying forever.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use xmpp::parsers::BareJid;
use xmpp::{ClientBuilder, ClientFeature, ClientType, Event as XmppEvent};

use stormwire_common::alert::AlertSource;

use super::SourceHealth;
use crate::diagnostics::DiagnosticsRing;
use crate::error::Error;
use crate::parser::ProductParser;
use crate::store::AlertStore;

const BACKOFF_INITIAL: Duration = Duration::from_secs(2);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Grace for the orderly presence-unavailable on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Weather Wire connection settings.
#[derive(Debug, Clone)]
pub struct NwwsConfig {
    pub host: String,
    /// Non-standard ports are resolved through DNS SRV by the XMPP stack;
    /// kept for operator visibility.
    pub port: u16,
    pub username: String,
    pub password: String,
    pub room: String,
    pub nickname: String,
}

/// How a session ended, seen from the reconnect loop.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// The push source. Owns the reconnect loop; one XMPP session at a time.
pub struct PushSource {
    config: NwwsConfig,
    parser: Arc<ProductParser>,
    store: Arc<AlertStore>,
    diagnostics: Arc<DiagnosticsRing>,
    health: Arc<SourceHealth>,
}

impl PushSource {
    pub fn new(
        config: NwwsConfig,
        parser: Arc<ProductParser>,
        store: Arc<AlertStore>,
        diagnostics: Arc<DiagnosticsRing>,
        health: Arc<SourceHealth>,
    ) -> Self {
        PushSource {
            config,
            parser,
            store,
            diagnostics,
            health,
        }
    }

    /// Run until shutdown. Returns an error only for fatal conditions
    /// (bad credentials, unusable configuration).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.run_session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::Disconnected) => {
                    self.health.set_connected(false);
                    let delay = full_jitter(backoff);
                    warn!(delay_ms = delay.as_millis() as u64, "weather wire disconnected, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return Ok(()),
                    }
                    backoff = (backoff * 2).min(BACKOFF_CEILING);
                }
                Err(e) => {
                    self.health.set_connected(false);
                    return Err(e);
                }
            }
        }
    }

    /// Drive one XMPP session from connect to disconnect.
    async fn run_session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, Error> {
        let jid_text = format!("{}@{}", self.config.username, self.config.host);
        let jid = BareJid::from_str(&jid_text)
            .map_err(|e| Error::Config(format!("invalid weather wire jid {jid_text:?}: {e}")))?;
        let room = BareJid::from_str(&self.config.room)
            .map_err(|e| Error::Config(format!("invalid weather wire room {:?}: {e}", self.config.room)))?;

        info!(server = %self.config.host, port = self.config.port, room = %self.config.room, "connecting to weather wire");

        let mut agent = ClientBuilder::new(jid, &self.config.password)
            .set_client(ClientType::Bot, "stormwire")
            .set_default_nick(&self.config.nickname)
            .enable_feature(ClientFeature::JoinRooms)
            .build();

        let mut online = false;

        loop {
            let events = if online {
                tokio::select! {
                    events = agent.wait_for_events() => events,
                    _ = shutdown.changed() => {
                        info!("weather wire: orderly disconnect");
                        let _ = tokio::time::timeout(DISCONNECT_GRACE, agent.disconnect()).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            } else {
                // Initial connect is bounded; a server that never answers
                // goes back through the backoff path.
                match tokio::time::timeout(CONNECT_TIMEOUT, agent.wait_for_events()).await {
                    Ok(events) => events,
                    Err(_) => {
                        warn!("weather wire connect timed out");
                        return Ok(SessionEnd::Disconnected);
                    }
                }
            };

            let Some(events) = events else {
                return Ok(SessionEnd::Disconnected);
            };

            for event in events {
                match event {
                    XmppEvent::Online => {
                        online = true;
                        info!("weather wire session established");
                        agent
                            .join_room(
                                room.clone(),
                                Some(self.config.nickname.clone()),
                                None,
                                "en",
                                "online",
                            )
                            .await;
                    }
                    XmppEvent::RoomJoined(joined) => {
                        info!(room = %joined, "joined weather wire room");
                        self.health.set_connected(true);
                    }
                    XmppEvent::RoomMessage(_id, _room, nick, body) => {
                        let nick_text = nick.to_string();
                        if nick_text == self.config.nickname {
                            continue;
                        }
                        self.handle_product(&body.0);
                    }
                    XmppEvent::Disconnected(err) => {
                        let text = err.to_string();
                        if looks_like_auth_failure(&text) {
                            return Err(Error::PushSource(format!(
                                "weather wire authentication failed: {text}"
                            )));
                        }
                        warn!(error = %text, "weather wire transport dropped");
                        return Ok(SessionEnd::Disconnected);
                    }
                    other => {
                        debug!(?other, "unhandled weather wire event");
                    }
                }
            }
        }
    }

    /// Parse one raw room message and apply the result to the store.
    /// Exactly one hand-off per room delivery; duplicates are the store's
    /// problem.
    fn handle_product(&self, raw: &str) {
        self.health.record_product();
        let received_at = Utc::now();

        match self.parser.parse_product(raw, AlertSource::Push, received_at) {
            Ok(alerts) => {
                let ids: Vec<String> = alerts.iter().map(|a| a.product_id.clone()).collect();
                let event_name = alerts
                    .first()
                    .map(|a| a.event_name.clone())
                    .unwrap_or_default();
                self.diagnostics
                    .record_success(AlertSource::Push, ids, &event_name);
                for alert in alerts {
                    self.store.upsert(alert);
                }
            }
            Err(e) if e.is_filtered() => {
                debug!(error = %e, "product filtered");
            }
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "product failed to parse");
                self.diagnostics
                    .record_failure(AlertSource::Push, raw, &e.to_string());
            }
        }
    }
}

/// Full jitter: a uniformly random delay up to the current ceiling, so a
/// fleet of reconnecting clients never thunders in step.
fn full_jitter(cap: Duration) -> Duration {
    let cap_ms = cap.as_millis().max(1) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=cap_ms))
}

fn looks_like_auth_failure(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("auth") || lower.contains("credential") || lower.contains("not-authorized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_cap() {
        for _ in 0..100 {
            let delay = full_jitter(Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(60));
        }
    }

    #[test]
    fn auth_failures_are_recognized() {
        assert!(looks_like_auth_failure("SASL authentication failed"));
        assert!(looks_like_auth_failure("stream error: not-authorized"));
        assert!(looks_like_auth_failure("invalid credentials"));
        assert!(!looks_like_auth_failure("connection reset by peer"));
    }
}
