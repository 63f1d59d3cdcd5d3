//! Broadcast hub
//!
//! Fans the store's event stream out to WebSocket subscribers. Each
//! subscriber gets its own bounded frame queue; a distributor task feeds
//! the queue from the store's broadcast channel and a writer task drains it
//! into the socket. A subscriber whose queue fills is disconnected as a
//! slow consumer so it can never stall the pipeline or other subscribers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use stormwire_common::events::AlertEvent;

use super::frames::{DisconnectReason, Frame, Inbound, SubscriptionFilter};
use crate::store::AlertStore;

/// Bound on each subscriber's outbound queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Inactivity before the server sends its own ping.
const INACTIVITY_PING: Duration = Duration::from_secs(45);
/// Further silence after the server ping before the connection closes.
const PING_TIMEOUT: Duration = Duration::from_secs(30);
/// Drain deadline for the shutdown notice.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Messages travelling from the reader/distributor tasks to the writer.
#[derive(Debug)]
enum Outgoing {
    Frame(Frame),
    /// WebSocket protocol pong answering a client protocol ping
    Pong(Vec<u8>),
}

/// The hub. One instance per process, shared across connections.
pub struct BroadcastHub {
    store: Arc<AlertStore>,
    next_subscriber_id: AtomicU64,
    subscriber_count: AtomicUsize,
    shutdown: watch::Receiver<bool>,
}

impl BroadcastHub {
    pub fn new(store: Arc<AlertStore>, shutdown: watch::Receiver<bool>) -> Self {
        BroadcastHub {
            store,
            next_subscriber_id: AtomicU64::new(1),
            subscriber_count: AtomicUsize::new(0),
            shutdown,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Drive one subscriber connection to completion.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
        info!(subscriber_id, total = self.subscriber_count(), "subscriber connected");

        let reason = self.run_subscriber(subscriber_id, socket).await;

        self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
        match reason {
            DisconnectReason::SlowConsumer => {
                info!(subscriber_id, reason = reason.as_str(), "subscriber disconnected")
            }
            DisconnectReason::TransportError => {
                warn!(subscriber_id, reason = reason.as_str(), "subscriber disconnected")
            }
            _ => debug!(subscriber_id, reason = reason.as_str(), "subscriber disconnected"),
        }
    }

    async fn run_subscriber(&self, subscriber_id: u64, socket: WebSocket) -> DisconnectReason {
        // Snapshot and subscription are taken atomically under the store's
        // writer lock: every event is either in the bulk or in the stream.
        let (snapshot, events) = self.store.snapshot_and_subscribe();

        let (out_tx, out_rx) = mpsc::channel::<Outgoing>(SUBSCRIBER_QUEUE_CAPACITY);
        let (close_tx, close_rx) = watch::channel::<Option<DisconnectReason>>(None);

        let filter = Arc::new(Mutex::new(SubscriptionFilter::default()));
        let last_activity = Arc::new(AtomicI64::new(Utc::now().timestamp()));
        let ping_outstanding = Arc::new(AtomicBool::new(false));

        let seen: HashSet<String> = snapshot.iter().map(|a| a.product_id.clone()).collect();

        let (sink, stream) = socket.split();

        let distributor = tokio::spawn(distribute_events(
            events,
            out_tx.clone(),
            Arc::clone(&filter),
            seen,
            close_tx.clone(),
        ));

        let reader = tokio::spawn(read_inbound(
            stream,
            out_tx,
            Arc::clone(&filter),
            Arc::clone(&last_activity),
            Arc::clone(&ping_outstanding),
            close_tx,
        ));

        let reason = write_outbound(
            subscriber_id,
            sink,
            snapshot,
            out_rx,
            close_rx,
            self.shutdown.clone(),
            last_activity,
            ping_outstanding,
        )
        .await;

        distributor.abort();
        reader.abort();
        reason
    }
}

/// Decide whether an event reaches this subscriber and as what frame.
///
/// `seen` tracks the product ids this subscriber currently knows about, so
/// filtered subscribers still receive removals for alerts they were shown
/// and never receive removals for alerts they were not.
pub(crate) fn route_event(
    event: &AlertEvent,
    filter: &SubscriptionFilter,
    seen: &mut HashSet<String>,
) -> Option<Frame> {
    match event {
        AlertEvent::AlertAdded { alert, .. } => {
            if filter.matches(alert) {
                seen.insert(alert.product_id.clone());
                Some(Frame::from_event(event))
            } else {
                None
            }
        }
        AlertEvent::AlertUpdated { alert, .. } => {
            if filter.matches(alert) {
                seen.insert(alert.product_id.clone());
                Some(Frame::from_event(event))
            } else if seen.remove(&alert.product_id) {
                // The update moved the alert outside the filter; retract it.
                Some(Frame::from_event(&AlertEvent::removed(
                    alert.product_id.clone(),
                    alert.event_name.clone(),
                    stormwire_common::events::RemovalReason::Manual,
                )))
            } else {
                None
            }
        }
        AlertEvent::AlertRemoved { product_id, .. } => {
            if seen.remove(product_id) {
                Some(Frame::from_event(event))
            } else {
                None
            }
        }
    }
}

/// Forward store events into the subscriber queue. Never blocks: a full
/// queue marks the subscriber slow and ends the task.
async fn distribute_events(
    mut events: broadcast::Receiver<AlertEvent>,
    out_tx: mpsc::Sender<Outgoing>,
    filter: Arc<Mutex<SubscriptionFilter>>,
    mut seen: HashSet<String>,
    close_tx: watch::Sender<Option<DisconnectReason>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let frame = {
                    let filter = filter.lock().expect("filter lock poisoned");
                    route_event(&event, &filter, &mut seen)
                };
                if let Some(frame) = frame {
                    match out_tx.try_send(Outgoing::Frame(frame)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            let _ = close_tx.send(Some(DisconnectReason::SlowConsumer));
                            return;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
            }
            // Falling behind the broadcast channel itself is the same
            // failure as a full queue, only further upstream.
            Err(broadcast::error::RecvError::Lagged(_)) => {
                let _ = close_tx.send(Some(DisconnectReason::SlowConsumer));
                return;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Handle inbound control frames.
async fn read_inbound(
    mut stream: futures::stream::SplitStream<WebSocket>,
    out_tx: mpsc::Sender<Outgoing>,
    filter: Arc<Mutex<SubscriptionFilter>>,
    last_activity: Arc<AtomicI64>,
    ping_outstanding: Arc<AtomicBool>,
    close_tx: watch::Sender<Option<DisconnectReason>>,
) {
    while let Some(message) = stream.next().await {
        last_activity.store(Utc::now().timestamp(), Ordering::Relaxed);
        match message {
            Ok(Message::Text(text)) => {
                let response = match Inbound::parse(&text) {
                    Inbound::Ping => Some(Outgoing::Frame(Frame::pong())),
                    Inbound::Subscribe(requested) => {
                        debug!(?requested, "subscriber filter applied");
                        *filter.lock().expect("filter lock poisoned") = requested;
                        None
                    }
                    Inbound::ChaserPositionUpdate(payload) => {
                        // Side channel; acknowledged by silence.
                        debug!(?payload, "chaser position update passed through");
                        None
                    }
                    Inbound::Unsupported(kind) => {
                        Some(Outgoing::Frame(Frame::unsupported(&kind)))
                    }
                    Inbound::Malformed => Some(Outgoing::Frame(Frame::error("malformed frame"))),
                };
                if let Some(out) = response {
                    if out_tx.send(out).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                if out_tx.send(Outgoing::Pong(payload)).await.is_err() {
                    return;
                }
            }
            Ok(Message::Pong(_)) => {
                ping_outstanding.store(false, Ordering::Relaxed);
            }
            Ok(Message::Close(_)) => {
                let _ = close_tx.send(Some(DisconnectReason::ClientClosed));
                return;
            }
            Ok(Message::Binary(_)) => {
                if out_tx
                    .send(Outgoing::Frame(Frame::error("binary frames unsupported")))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(_) => {
                let _ = close_tx.send(Some(DisconnectReason::TransportError));
                return;
            }
        }
    }
    let _ = close_tx.send(Some(DisconnectReason::ClientClosed));
}

/// Own the socket sink: ack, bulk, then queued frames, heartbeat and
/// shutdown handling.
#[allow(clippy::too_many_arguments)]
async fn write_outbound(
    subscriber_id: u64,
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    snapshot: Vec<stormwire_common::alert::Alert>,
    mut out_rx: mpsc::Receiver<Outgoing>,
    mut close_rx: watch::Receiver<Option<DisconnectReason>>,
    mut shutdown: watch::Receiver<bool>,
    last_activity: Arc<AtomicI64>,
    ping_outstanding: Arc<AtomicBool>,
) -> DisconnectReason {
    let ack = Frame::connection_ack(subscriber_id);
    if send_frame(&mut sink, &ack).await.is_err() {
        return DisconnectReason::TransportError;
    }
    let bulk = Frame::bulk(&snapshot);
    if send_frame(&mut sink, &bulk).await.is_err() {
        return DisconnectReason::TransportError;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(5));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Frame(frame)) => {
                        if send_frame(&mut sink, &frame).await.is_err() {
                            return DisconnectReason::TransportError;
                        }
                    }
                    Some(Outgoing::Pong(payload)) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return DisconnectReason::TransportError;
                        }
                    }
                    None => return DisconnectReason::TransportError,
                }
            }
            _ = close_rx.changed() => {
                let reason = close_rx.borrow().unwrap_or(DisconnectReason::ClientClosed);
                let _ = sink.send(Message::Close(None)).await;
                return reason;
            }
            _ = shutdown.changed() => {
                let notice = Frame::shutting_down();
                let _ = tokio::time::timeout(SHUTDOWN_DRAIN, send_frame(&mut sink, &notice)).await;
                let _ = sink.send(Message::Close(None)).await;
                return DisconnectReason::ServerShutdown;
            }
            _ = heartbeat.tick() => {
                let idle = Utc::now().timestamp() - last_activity.load(Ordering::Relaxed);
                let idle = Duration::from_secs(idle.max(0) as u64);
                if idle >= INACTIVITY_PING + PING_TIMEOUT
                    && ping_outstanding.load(Ordering::Relaxed)
                {
                    let _ = sink.send(Message::Close(None)).await;
                    return DisconnectReason::HeartbeatTimeout;
                }
                if idle >= INACTIVITY_PING && !ping_outstanding.load(Ordering::Relaxed) {
                    ping_outstanding.store(true, Ordering::Relaxed);
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        return DisconnectReason::TransportError;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<(), axum::Error> {
    sink.send(Message::Text(frame.to_json())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use stormwire_common::alert::{Alert, AlertSource};
    use stormwire_common::events::RemovalReason;

    fn alert(id: &str, phenomenon: &str, area: &str) -> Alert {
        let mut a = Alert::new(id.to_string(), AlertSource::Push);
        a.phenomenon = phenomenon.to_string();
        a.affected_areas = vec![area.to_string()];
        a.event_name = format!("{phenomenon} event");
        a
    }

    #[test]
    fn route_passthrough_tracks_seen_ids() {
        let filter = SubscriptionFilter::default();
        let mut seen = HashSet::new();

        let added = AlertEvent::added(alert("a1", "SV", "OHC085"));
        assert!(route_event(&added, &filter, &mut seen).is_some());
        assert!(seen.contains("a1"));

        let removed = AlertEvent::removed("a1".into(), "SV event".into(), RemovalReason::Expired);
        assert!(route_event(&removed, &filter, &mut seen).is_some());
        assert!(!seen.contains("a1"));

        // A second removal for the same id has nothing to retract.
        assert!(route_event(&removed, &filter, &mut seen).is_none());
    }

    #[test]
    fn route_filters_adds_and_their_removals() {
        let filter = SubscriptionFilter::from_request(&serde_json::json!({"states": ["TX"]}));
        let mut seen = HashSet::new();

        let added = AlertEvent::added(alert("a1", "SV", "OHC085"));
        assert!(route_event(&added, &filter, &mut seen).is_none());

        let removed = AlertEvent::removed("a1".into(), "SV event".into(), RemovalReason::Expired);
        assert!(route_event(&removed, &filter, &mut seen).is_none());
    }

    #[test]
    fn route_removals_for_bulk_delivered_alerts() {
        // Ids from the bulk snapshot seed the seen set, so their removals
        // flow even though no add frame was ever sent.
        let filter = SubscriptionFilter::default();
        let mut seen: HashSet<String> = ["bulk1".to_string()].into_iter().collect();

        let removed =
            AlertEvent::removed("bulk1".into(), "SV event".into(), RemovalReason::Cancelled);
        assert!(route_event(&removed, &filter, &mut seen).is_some());
    }

    #[tokio::test]
    async fn distributor_marks_slow_consumer_on_full_queue() {
        let bus = stormwire_common::events::EventBus::new(1024);
        let events = bus.subscribe();
        // A tiny queue that nobody drains.
        let (out_tx, _out_rx_kept_full) = mpsc::channel::<Outgoing>(2);
        let (close_tx, mut close_rx) = watch::channel(None);

        let handle = tokio::spawn(distribute_events(
            events,
            out_tx,
            Arc::new(Mutex::new(SubscriptionFilter::default())),
            HashSet::new(),
            close_tx,
        ));

        for i in 0..10 {
            bus.emit_lossy(AlertEvent::added(alert(&format!("a{i}"), "SV", "OHC085")));
        }

        tokio::time::timeout(Duration::from_secs(1), close_rx.changed())
            .await
            .expect("distributor should signal within the timeout")
            .expect("close channel alive");
        assert_eq!(*close_rx.borrow(), Some(DisconnectReason::SlowConsumer));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn distributor_keeps_up_with_drained_queue() {
        let bus = stormwire_common::events::EventBus::new(1024);
        let events = bus.subscribe();
        let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(SUBSCRIBER_QUEUE_CAPACITY);
        let (close_tx, close_rx) = watch::channel(None);

        let handle = tokio::spawn(distribute_events(
            events,
            out_tx,
            Arc::new(Mutex::new(SubscriptionFilter::default())),
            HashSet::new(),
            close_tx,
        ));

        const BURST: usize = 1000;
        let producer = tokio::spawn(async move {
            for i in 0..BURST {
                bus.emit_lossy(AlertEvent::added(alert(&format!("a{i}"), "SV", "OHC085")));
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut received = Vec::with_capacity(BURST);
        while received.len() < BURST {
            match tokio::time::timeout(Duration::from_secs(2), out_rx.recv()).await {
                Ok(Some(Outgoing::Frame(frame))) => {
                    received.push(frame.data["alert"]["product_id"].as_str().unwrap().to_string())
                }
                Ok(Some(Outgoing::Pong(_))) => {}
                _ => break,
            }
        }

        producer.await.unwrap();
        assert_eq!(received.len(), BURST);
        // In-order delivery, no duplication, no omission.
        for (i, id) in received.iter().enumerate() {
            assert_eq!(id, &format!("a{i}"));
        }
        assert_eq!(*close_rx.borrow(), None);
        handle.abort();
    }
}
