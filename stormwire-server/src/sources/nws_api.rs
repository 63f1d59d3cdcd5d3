//! Pull source: NWS REST API poller
//!
//! Periodically fetches `/alerts/active` and reconciles the result against
//! the store. The pull feed is the authoritative backstop: anything it
//! reports that the push feed missed gets inserted, and pull-sourced alerts
//! it stops reporting are removed once expired.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use stormwire_common::alert::Alert;

use super::SourceHealth;
use crate::diagnostics::DiagnosticsRing;
use crate::error::Error;
use crate::parser::ProductParser;
use crate::store::AlertStore;

const GEO_JSON: &str = "application/geo+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
/// Absolute floor between HTTP requests, whatever the configured cadence.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Thin client for the NWS API.
pub struct NwsApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl NwsApiClient {
    /// The upstream service requires an identifying User-Agent.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| Error::Config(format!("invalid user agent: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(GEO_JSON));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(NwsApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current active-alert feature collection, retrying
    /// transient failures with exponential backoff.
    pub async fn active_alerts(&self) -> Result<Vec<Value>, Error> {
        let url = format!("{}/alerts/active", self.base_url);
        let mut backoff = RETRY_BACKOFF_INITIAL;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.http.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: Value = response.json().await?;
                        let features = body
                            .get("features")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        debug!(count = features.len(), "active alerts fetched");
                        return Ok(features);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        warn!(%status, attempt, "transient API status");
                        last_error =
                            Some(Error::PullSource(format!("transient status {status}")));
                    } else {
                        // Any other 4xx will not improve on retry.
                        return Err(Error::PullSource(format!(
                            "unexpected status {status} for {url}"
                        )));
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    warn!(error = %e, attempt, "transient API error");
                    last_error = Some(Error::HttpClient(e));
                }
                Err(e) => return Err(Error::HttpClient(e)),
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::PullSource("retries exhausted".to_string())))
    }
}

/// The polling loop around the client.
pub struct PullSource {
    client: NwsApiClient,
    parser: Arc<ProductParser>,
    store: Arc<AlertStore>,
    diagnostics: Arc<DiagnosticsRing>,
    health: Arc<SourceHealth>,
    poll_interval: Duration,
}

impl PullSource {
    pub fn new(
        client: NwsApiClient,
        parser: Arc<ProductParser>,
        store: Arc<AlertStore>,
        diagnostics: Arc<DiagnosticsRing>,
        health: Arc<SourceHealth>,
        poll_interval: Duration,
    ) -> Self {
        PullSource {
            client,
            parser,
            store,
            diagnostics,
            health,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Poll until shutdown. The first poll happens immediately so a restart
    /// repopulates the store without waiting a full cycle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_seconds = self.poll_interval.as_secs(), "pull source started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    info!("pull source stopping");
                    return;
                }
            }
        }
    }

    /// One fetch-parse-reconcile cycle.
    pub async fn poll_once(&self) {
        let features = match self.client.active_alerts().await {
            Ok(features) => {
                self.health.set_connected(true);
                features
            }
            Err(e) => {
                self.health.set_connected(false);
                warn!(error = %e, "pull poll failed");
                return;
            }
        };

        let received_at = Utc::now();
        let mut parsed: Vec<Alert> = Vec::with_capacity(features.len());
        for feature in &features {
            match self.parser.parse_api_feature(feature, received_at) {
                Ok(alert) => {
                    self.health.record_product();
                    self.diagnostics.record_success(
                        stormwire_common::alert::AlertSource::Pull,
                        vec![alert.product_id.clone()],
                        &alert.event_name,
                    );
                    parsed.push(alert);
                }
                Err(e) if e.is_filtered() => {
                    debug!(error = %e, "API feature filtered");
                }
                Err(e) => {
                    warn!(error = %e, "API feature failed to parse");
                    self.diagnostics.record_failure(
                        stormwire_common::alert::AlertSource::Pull,
                        &feature.to_string(),
                        &e.to_string(),
                    );
                }
            }
        }

        let (changed, removed) = self.store.reconcile_pull(parsed, received_at);
        if changed > 0 || removed > 0 {
            info!(changed, removed, "pull reconciliation applied");
        }
    }
}
