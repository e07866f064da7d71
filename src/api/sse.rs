// SSE endpoint - streams a request's progress events
//
// Wire format: standard server-sent events with one JSON object per data
// line. The sequence a subscriber sees is: one connection event, the full
// stored history in emission order, then live events until a terminal
// complete/error arrives. A ping event goes out after 30 seconds of
// idleness. A newer subscription for the same request preempts this one.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Response, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::progress::{ProgressEvent, ProgressEventKind, SubscriberMessage};

use super::AppState;

/// Idle interval between keepalive pings
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /api/v1/stream/{request_id}
pub async fn stream(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response<Body> {
    let subscription = state.progress.subscribe(&request_id);
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(64);

    tokio::spawn(pump(request_id, subscription, tx));

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| {
            Response::new(Body::from("failed to build event stream response"))
        })
}

/// Forward connection event, history replay, then live events to the client
async fn pump(
    request_id: String,
    mut subscription: crate::progress::Subscription,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let connected = json!({
        "type": "connection",
        "status": "connected",
        "request_id": request_id,
        "timestamp": Utc::now(),
    });
    if tx.send(Ok(frame_value(&connected))).await.is_err() {
        return;
    }

    // Catch-up replay for late subscribers
    let mut saw_terminal = false;
    for event in subscription.history.drain(..) {
        saw_terminal |= is_terminal(&event);
        if tx.send(Ok(frame_event(&event))).await.is_err() {
            return;
        }
    }
    if saw_terminal {
        return;
    }

    // Live phase with idle pings
    loop {
        match tokio::time::timeout(PING_INTERVAL, subscription.live.recv()).await {
            Ok(Some(SubscriberMessage::Event(event))) => {
                let terminal = is_terminal(&event);
                if tx.send(Ok(frame_event(&event))).await.is_err() {
                    return;
                }
                if terminal {
                    return;
                }
            }
            Ok(Some(SubscriberMessage::Preempted)) => {
                tracing::debug!(%request_id, "stream preempted by newer subscription");
                return;
            }
            // Publisher side is gone
            Ok(None) => return,
            Err(_) => {
                let ping = json!({ "type": "ping", "timestamp": Utc::now() });
                if tx.send(Ok(frame_value(&ping))).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn is_terminal(event: &ProgressEvent) -> bool {
    matches!(
        event.kind,
        ProgressEventKind::Complete | ProgressEventKind::Error
    )
}

/// One SSE message: a single JSON object on one data line
fn frame_event(event: &ProgressEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(encoded) => Bytes::from(format!("data: {encoded}\n\n")),
        Err(_) => Bytes::from_static(b"data: {}\n\n"),
    }
}

fn frame_value(value: &serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}
