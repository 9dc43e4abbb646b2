//! External event sink
//!
//! Best-effort duplication of structured engine events to an operator-run
//! HTTP endpoint. Events are queued on a bounded channel and drained by a
//! background task; the pipeline never waits on the sink, and a full queue
//! drops the event rather than apply backpressure.

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 256;

/// Handle for emitting events. Cheap to clone; a no-op when no sink URL is
/// configured.
#[derive(Clone)]
pub struct LogSink {
    tx: Option<mpsc::Sender<Value>>,
}

impl LogSink {
    /// Spawn the drain task and return the emit handle
    pub fn start(url: Option<String>, token: Option<String>) -> Self {
        let Some(url) = url else {
            return Self { tx: None };
        };

        let (tx, mut rx) = mpsc::channel::<Value>(QUEUE_CAPACITY);
        let client = Client::new();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut request = client.post(&url).json(&event);
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("log sink accepted event");
                    }
                    Ok(response) => {
                        warn!("log sink rejected event: {}", response.status());
                    }
                    Err(e) => {
                        warn!("log sink unreachable: {}", e);
                    }
                }
            }
        });

        Self { tx: Some(tx) }
    }

    /// Disabled sink; every emit is a no-op
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue an event. Never blocks; drops when the queue is full.
    pub fn emit(&self, kind: &str, fields: Value) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = json!({
            "event": kind,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": fields,
        });
        if tx.try_send(event).is_err() {
            debug!("log sink queue full, dropping {} event", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_is_noop() {
        let sink = LogSink::disabled();
        sink.emit("sell_submitted", json!({"asset": "ETH"}));
    }

    #[tokio::test]
    async fn unconfigured_url_disables() {
        let sink = LogSink::start(None, None);
        assert!(sink.tx.is_none());
        sink.emit("anything", json!({}));
    }
}
