// Progress bus - per-request ordered event stream with catch-up replay
//
// The orchestrator publishes; the SSE endpoint subscribes. Every event gets a
// strictly monotonic per-request sequence number and is stored in an
// in-memory history so late subscribers replay the full trajectory. History
// lives one hour after the first emit, then a background sweep drops it. A
// second subscription for the same request preempts the first.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Event kinds used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    Connection,
    StepProgress,
    InvestorKpis,
    Ping,
    Error,
    Complete,
}

/// One event on a request's stream
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub sequence: u64,
}

/// Message delivered to a live subscriber
#[derive(Debug)]
pub enum SubscriberMessage {
    Event(ProgressEvent),
    /// A newer subscription took over this request's stream
    Preempted,
}

/// What a new subscriber gets: full history plus the live channel
pub struct Subscription {
    pub history: Vec<ProgressEvent>,
    pub live: mpsc::UnboundedReceiver<SubscriberMessage>,
}

struct RequestStream {
    history: Vec<ProgressEvent>,
    next_sequence: u64,
    subscriber: Option<mpsc::UnboundedSender<SubscriberMessage>>,
    expires_at: Instant,
}

impl RequestStream {
    fn new(ttl: Duration) -> Self {
        Self {
            history: Vec::new(),
            next_sequence: 0,
            subscriber: None,
            expires_at: Instant::now() + ttl,
        }
    }
}

/// Concurrent map of per-request streams
pub struct ProgressBus {
    streams: Mutex<HashMap<String, RequestStream>>,
    ttl: Duration,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl ProgressBus {
    pub fn new(ttl: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Publish an event, assigning the next sequence number for the request
    pub fn publish(&self, request_id: &str, kind: ProgressEventKind, data: serde_json::Value) {
        let Ok(mut streams) = self.streams.lock() else {
            return;
        };
        let stream = streams
            .entry(request_id.to_string())
            .or_insert_with(|| RequestStream::new(self.ttl));

        let event = ProgressEvent {
            kind,
            data,
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            sequence: stream.next_sequence,
        };
        stream.next_sequence += 1;
        stream.history.push(event.clone());

        // A closed receiver means the subscriber went away
        if let Some(subscriber) = &stream.subscriber {
            if subscriber.send(SubscriberMessage::Event(event)).is_err() {
                stream.subscriber = None;
            }
        }
    }

    /// Subscribe to a request's stream, preempting any earlier subscriber
    ///
    /// The returned history is complete up to the subscription instant; every
    /// later event arrives on the live channel exactly once.
    pub fn subscribe(&self, request_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut streams = match self.streams.lock() {
            Ok(streams) => streams,
            Err(_) => {
                return Subscription {
                    history: Vec::new(),
                    live: rx,
                }
            }
        };
        let stream = streams
            .entry(request_id.to_string())
            .or_insert_with(|| RequestStream::new(self.ttl));

        if let Some(old) = stream.subscriber.replace(tx) {
            let _ = old.send(SubscriberMessage::Preempted);
        }

        Subscription {
            history: stream.history.clone(),
            live: rx,
        }
    }

    /// Whether any history is retained for the request
    pub fn has_request(&self, request_id: &str) -> bool {
        self.streams
            .lock()
            .map(|s| s.contains_key(request_id))
            .unwrap_or(false)
    }

    /// Drop streams whose TTL has expired
    pub fn sweep(&self) {
        let now = Instant::now();
        if let Ok(mut streams) = self.streams.lock() {
            streams.retain(|_, stream| stream.expires_at > now);
        }
    }

    pub fn len(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic TTL sweep; stops when the shutdown watch flips or closes
pub fn spawn_sweeper(
    bus: std::sync::Arc<ProgressBus>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => bus.sweep(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_monotonic_per_request() {
        let bus = ProgressBus::default();
        for _ in 0..5 {
            bus.publish("r1", ProgressEventKind::StepProgress, json!({}));
        }
        bus.publish("r2", ProgressEventKind::StepProgress, json!({}));

        let sub = bus.subscribe("r1");
        let sequences: Vec<u64> = sub.history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

        let sub2 = bus.subscribe("r2");
        assert_eq!(sub2.history[0].sequence, 0);
    }

    #[tokio::test]
    async fn test_history_replay_plus_live_exactly_once() {
        let bus = ProgressBus::default();
        bus.publish("r1", ProgressEventKind::StepProgress, json!({"step": "received"}));
        bus.publish("r1", ProgressEventKind::StepProgress, json!({"step": "detection"}));

        let mut sub = bus.subscribe("r1");
        assert_eq!(sub.history.len(), 2);

        bus.publish("r1", ProgressEventKind::Complete, json!({"ok": true}));

        let live = sub.live.recv().await.unwrap();
        match live {
            SubscriberMessage::Event(event) => {
                assert_eq!(event.kind, ProgressEventKind::Complete);
                // Live continues exactly where the replayed history ended
                assert_eq!(event.sequence, 2);
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_subscriber_preempts_first() {
        let bus = ProgressBus::default();
        bus.publish("r1", ProgressEventKind::StepProgress, json!({}));

        let mut first = bus.subscribe("r1");
        let _second = bus.subscribe("r1");

        match first.live.recv().await.unwrap() {
            SubscriberMessage::Preempted => {}
            other => panic!("expected preemption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_after_preemption_go_to_new_subscriber() {
        let bus = ProgressBus::default();
        let _first = bus.subscribe("r1");
        let mut second = bus.subscribe("r1");

        bus.publish("r1", ProgressEventKind::Error, json!({"error": "boom"}));

        match second.live.recv().await.unwrap() {
            SubscriberMessage::Event(event) => assert_eq!(event.kind, ProgressEventKind::Error),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_resubscribe_replays_terminal_event() {
        let bus = ProgressBus::default();
        bus.publish("r1", ProgressEventKind::Complete, json!({"answer": 42}));

        let first = bus.subscribe("r1");
        let second = bus.subscribe("r1");
        assert_eq!(first.history.len(), 1);
        assert_eq!(second.history.len(), 1);
        assert_eq!(second.history[0].kind, ProgressEventKind::Complete);
    }

    #[test]
    fn test_sweep_drops_expired_streams() {
        let bus = ProgressBus::new(Duration::from_secs(0));
        bus.publish("r1", ProgressEventKind::StepProgress, json!({}));
        assert!(bus.has_request("r1"));

        bus.sweep();
        assert!(!bus.has_request("r1"));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_dropped_subscriber_does_not_block_publish() {
        let bus = ProgressBus::default();
        {
            let _sub = bus.subscribe("r1");
            // Receiver dropped here
        }
        bus.publish("r1", ProgressEventKind::StepProgress, json!({}));
        let sub = bus.subscribe("r1");
        assert_eq!(sub.history.len(), 1);
    }

    #[test]
    fn test_event_wire_shape() {
        let bus = ProgressBus::default();
        bus.publish("r9", ProgressEventKind::StepProgress, json!({"step": "routing"}));
        let sub = bus.subscribe("r9");
        let value = serde_json::to_value(&sub.history[0]).unwrap();
        assert_eq!(value["type"], "step_progress");
        assert_eq!(value["request_id"], "r9");
        assert_eq!(value["data"]["step"], "routing");
        assert!(value["timestamp"].is_string());
    }
}
