//! Balance feed WebSocket
//!
//! One authenticated streaming connection to the `balances` channel. Every
//! inbound frame is decoded once at this boundary into a tagged
//! `FeedMessage`; the engine only ever sees typed `EngineEvent`s.
//!
//! Lifecycle: obtain a short-lived token via the REST client, subscribe,
//! forward one snapshot then updates in stream order. On close, reconnect
//! with capped exponential backoff; after ten straight failures the feed is
//! marked degraded and left down (the process keeps serving status). A
//! watchdog task force-closes the socket when no heartbeat has been seen
//! for thirty seconds.

use super::exchange::KrakenClient;
use super::metrics::Metrics;
use crate::types::{BalanceEvent, EngineEvent, LedgerEntryKind};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval, sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const WATCHDOG_TICK: Duration = Duration::from_secs(10);
const HEARTBEAT_STALL: Duration = Duration::from_secs(30);
const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Subscription errors that no amount of retrying will fix
const PERMANENT_SUBSCRIPTION_ERRORS: &[&str] =
    &["invalid channel", "invalid token", "event not found"];

/// Feed connectivity, shared with the status surface
#[derive(Debug)]
pub struct FeedStatus {
    connected: AtomicBool,
    degraded: AtomicBool,
    /// Epoch millis of the last heartbeat; 0 = never
    last_heartbeat_ms: AtomicI64,
}

impl FeedStatus {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            last_heartbeat_ms: AtomicI64::new(0),
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    fn set_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }

    fn mark_heartbeat(&self) {
        self.last_heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn heartbeat_stalled(&self) -> bool {
        let ms = self.last_heartbeat_ms.load(Ordering::Relaxed);
        if ms == 0 {
            return false;
        }
        Utc::now().timestamp_millis() - ms > HEARTBEAT_STALL.as_millis() as i64
    }
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound frames, decoded once at the boundary
#[derive(Debug, PartialEq)]
enum FeedMessage {
    Snapshot(Vec<(String, Decimal)>),
    Update(Vec<BalanceEvent>),
    Heartbeat,
    /// Subscription acks and other control chatter
    Status,
    SubscriptionError(String),
    Ignored,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshotEntry {
    asset: String,
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawUpdateEntry {
    asset: String,
    #[serde(rename = "type")]
    kind: LedgerEntryKind,
    amount: Decimal,
    balance: Decimal,
    #[serde(default)]
    ledger_id: Option<String>,
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

fn decode_frame(text: &str) -> FeedMessage {
    let frame: RawFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("undecodable frame ({}): {}", e, text);
            return FeedMessage::Ignored;
        }
    };

    if frame.event.as_deref() == Some("subscriptionStatus")
        && frame.status.as_deref() == Some("error")
    {
        return FeedMessage::SubscriptionError(frame.error_message.unwrap_or_default());
    }

    match frame.channel.as_deref() {
        Some("heartbeat") => FeedMessage::Heartbeat,
        Some("status") => FeedMessage::Status,
        Some("balances") => {
            let data = frame.data.unwrap_or(serde_json::Value::Null);
            match frame.kind.as_deref() {
                Some("snapshot") => {
                    match serde_json::from_value::<Vec<RawSnapshotEntry>>(data) {
                        Ok(entries) => FeedMessage::Snapshot(
                            entries.into_iter().map(|e| (e.asset, e.balance)).collect(),
                        ),
                        Err(e) => {
                            warn!("bad snapshot payload: {}", e);
                            FeedMessage::Ignored
                        }
                    }
                }
                Some("update") => match serde_json::from_value::<Vec<RawUpdateEntry>>(data) {
                    Ok(entries) => FeedMessage::Update(
                        entries
                            .into_iter()
                            .map(|e| BalanceEvent {
                                asset: e.asset,
                                kind: e.kind,
                                amount: e.amount,
                                balance: e.balance,
                                ledger_id: e.ledger_id,
                                ref_id: e.ref_id,
                                timestamp: e.timestamp,
                            })
                            .collect(),
                    ),
                    Err(e) => {
                        warn!("bad update payload: {}", e);
                        FeedMessage::Ignored
                    }
                },
                _ => FeedMessage::Ignored,
            }
        }
        _ => FeedMessage::Ignored,
    }
}

enum CycleEnd {
    /// Socket closed or stalled; take the reconnect path
    Closed,
    /// Clean shutdown requested
    Shutdown,
    /// Permanent subscription rejection; do not reconnect
    Fatal(String),
}

/// The balance feed service
pub struct BalanceFeed {
    client: Arc<KrakenClient>,
    ws_url: String,
    events: mpsc::Sender<EngineEvent>,
    status: Arc<FeedStatus>,
    metrics: Metrics,
}

impl BalanceFeed {
    pub fn new(
        client: Arc<KrakenClient>,
        ws_url: String,
        events: mpsc::Sender<EngineEvent>,
        status: Arc<FeedStatus>,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            ws_url,
            events,
            status,
            metrics,
        }
    }

    /// Run until shutdown, the reconnect budget is exhausted, or the
    /// subscription is permanently rejected. This loop is the only place
    /// reconnects are scheduled, so at most one is ever pending.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        let mut first_connect = true;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if !first_connect {
                self.metrics.inc_ws_reconnects();
            }
            first_connect = false;

            match self.connect_and_listen(&mut attempt, &mut shutdown_rx).await {
                Ok(CycleEnd::Shutdown) => break,
                Ok(CycleEnd::Fatal(msg)) => {
                    warn!("balance feed permanently rejected: {}", msg);
                    self.status.set_degraded();
                    break;
                }
                Ok(CycleEnd::Closed) => {
                    attempt += 1;
                    info!("balance feed closed, reconnecting (attempt {})", attempt);
                }
                Err(e) => {
                    attempt += 1;
                    warn!("balance feed error: {} (attempt {})", e, attempt);
                }
            }
            self.status.set_connected(false);

            if attempt >= MAX_RECONNECT_ATTEMPTS {
                warn!(
                    "balance feed gave up after {} reconnect attempts; marking degraded",
                    attempt
                );
                self.status.set_degraded();
                break;
            }

            let delay = reconnect_delay(attempt);
            debug!("reconnect backoff {:?}", delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.status.set_connected(false);
        info!("balance feed stopped");
    }

    async fn connect_and_listen(
        &self,
        attempt: &mut u32,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<CycleEnd> {
        let token = self.client.ws_token().await?;

        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("balance feed connected");

        let subscribe = json!({
            "method": "subscribe",
            "params": { "channel": "balances", "token": token },
        });
        write.send(Message::Text(subscribe.to_string())).await?;

        // Baseline so a silent server is detected as a stall, not ignored
        self.status.mark_heartbeat();

        // Independent watchdog task; it pokes us when heartbeats stop and
        // we tear the connection down to enter the reconnect path.
        let stall = Arc::new(Notify::new());
        let watchdog = tokio::spawn(watchdog_loop(self.status.clone(), stall.clone()));

        let mut subscribe_retried = false;
        let outcome = loop {
            tokio::select! {
                message = read.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            warn!("balance feed read error: {}", e);
                            break CycleEnd::Closed;
                        }
                        None => break CycleEnd::Closed,
                    };
                    match message {
                        Message::Text(text) => {
                            match decode_frame(&text) {
                                FeedMessage::Snapshot(entries) => {
                                    // A snapshot means the subscription took
                                    self.status.set_connected(true);
                                    *attempt = 0;
                                    if self.events.send(EngineEvent::Snapshot(entries)).await.is_err() {
                                        break CycleEnd::Shutdown;
                                    }
                                }
                                FeedMessage::Update(events) => {
                                    let mut engine_gone = false;
                                    for event in events {
                                        if self.events.send(EngineEvent::Update(event)).await.is_err() {
                                            engine_gone = true;
                                            break;
                                        }
                                    }
                                    if engine_gone {
                                        break CycleEnd::Shutdown;
                                    }
                                }
                                FeedMessage::Heartbeat => {
                                    self.status.mark_heartbeat();
                                }
                                FeedMessage::Status => {
                                    debug!("feed status frame");
                                }
                                FeedMessage::SubscriptionError(msg) => {
                                    let lower = msg.to_lowercase();
                                    let permanent = PERMANENT_SUBSCRIPTION_ERRORS
                                        .iter()
                                        .any(|p| lower.contains(p));
                                    if permanent {
                                        break CycleEnd::Fatal(msg);
                                    }
                                    if subscribe_retried {
                                        warn!("subscription failed twice: {}", msg);
                                        break CycleEnd::Closed;
                                    }
                                    warn!("subscription error, retrying once in {:?}: {}", SUBSCRIBE_RETRY_DELAY, msg);
                                    subscribe_retried = true;
                                    sleep(SUBSCRIBE_RETRY_DELAY).await;
                                    let token = match self.client.ws_token().await {
                                        Ok(token) => token,
                                        Err(e) => {
                                            warn!("token refresh for resubscribe failed: {}", e);
                                            break CycleEnd::Closed;
                                        }
                                    };
                                    let subscribe = json!({
                                        "method": "subscribe",
                                        "params": { "channel": "balances", "token": token },
                                    });
                                    if write.send(Message::Text(subscribe.to_string())).await.is_err() {
                                        break CycleEnd::Closed;
                                    }
                                }
                                FeedMessage::Ignored => {}
                            }
                        }
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Close(_) => {
                            info!("balance feed closed by server");
                            break CycleEnd::Closed;
                        }
                        _ => {}
                    }
                }

                _ = stall.notified() => {
                    warn!("no heartbeat for {:?}, forcing reconnect", HEARTBEAT_STALL);
                    let _ = write.send(Message::Close(None)).await;
                    break CycleEnd::Closed;
                }

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        break CycleEnd::Shutdown;
                    }
                }
            }
        };

        watchdog.abort();
        Ok(outcome)
    }
}

async fn watchdog_loop(status: Arc<FeedStatus>, stall: Arc<Notify>) {
    let mut tick = interval(WATCHDOG_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        if status.heartbeat_stalled() {
            stall.notify_one();
            return;
        }
    }
}

fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(6);
    (BASE_RECONNECT_DELAY * factor as u32).min(MAX_RECONNECT_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_snapshot() {
        let text = r#"{"channel":"balances","type":"snapshot","data":[
            {"asset":"USD","balance":"100.00"},
            {"asset":"ETH","balance":"0.5"}
        ]}"#;
        match decode_frame(text) {
            FeedMessage::Snapshot(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0], ("USD".to_string(), dec!(100.00)));
                assert_eq!(entries[1], ("ETH".to_string(), dec!(0.5)));
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn decodes_update() {
        let text = r#"{"channel":"balances","type":"update","data":[
            {"asset":"ETH","type":"deposit","amount":"0.2","balance":"0.2",
             "ledger_id":"L123","ref_id":"R456","timestamp":"2025-06-01T12:00:00Z"}
        ]}"#;
        match decode_frame(text) {
            FeedMessage::Update(events) => {
                assert_eq!(events.len(), 1);
                let event = &events[0];
                assert_eq!(event.asset, "ETH");
                assert_eq!(event.kind, LedgerEntryKind::Deposit);
                assert_eq!(event.amount, dec!(0.2));
                assert_eq!(event.balance, dec!(0.2));
                assert_eq!(event.ledger_id.as_deref(), Some("L123"));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn decodes_trade_update_with_negative_amount() {
        let text = r#"{"channel":"balances","type":"update","data":[
            {"asset":"ETH","type":"trade","amount":"-0.2","balance":"0"}
        ]}"#;
        match decode_frame(text) {
            FeedMessage::Update(events) => {
                assert_eq!(events[0].kind, LedgerEntryKind::Trade);
                assert_eq!(events[0].amount, dec!(-0.2));
                assert_eq!(events[0].balance, Decimal::ZERO);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn decodes_heartbeat() {
        assert_eq!(decode_frame(r#"{"channel":"heartbeat"}"#), FeedMessage::Heartbeat);
    }

    #[test]
    fn decodes_subscription_error() {
        let text = r#"{"event":"subscriptionStatus","status":"error","errorMessage":"Invalid token"}"#;
        match decode_frame(text) {
            FeedMessage::SubscriptionError(msg) => assert_eq!(msg, "Invalid token"),
            other => panic!("expected subscription error, got {:?}", other),
        }
    }

    #[test]
    fn garbage_is_ignored() {
        assert_eq!(decode_frame("not json"), FeedMessage::Ignored);
        assert_eq!(decode_frame(r#"{"channel":"unknown"}"#), FeedMessage::Ignored);
    }

    #[test]
    fn reconnect_delay_caps_at_one_minute() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(2), Duration::from_secs(4));
        assert_eq!(reconnect_delay(5), Duration::from_secs(32));
        assert_eq!(reconnect_delay(6), Duration::from_secs(60));
        assert_eq!(reconnect_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn stall_detection() {
        let status = FeedStatus::new();
        // Never seen a heartbeat: not stalled (nothing to compare against)
        assert!(!status.heartbeat_stalled());
        status.mark_heartbeat();
        assert!(!status.heartbeat_stalled());
        status
            .last_heartbeat_ms
            .store(Utc::now().timestamp_millis() - 31_000, Ordering::Relaxed);
        assert!(status.heartbeat_stalled());
    }
}
