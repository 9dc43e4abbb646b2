//! The auto-sell engine
//!
//! Per-asset state machine: IDLE -> EVAL -> PENDING -> FINALIZED -> IDLE.
//! Deposits and first-sight balances go through four ordered gates before a
//! market sell is dispatched; trade echoes and administrative ledger entries
//! only refresh the reported balance. One sell cycle per asset at a time;
//! concurrent events coalesce against the live reported balance and the
//! cycle re-examines the asset before it lets go of the per-asset lock.

use super::types::{AmbiguousEntry, Trigger};
use crate::services::api_errors::ApiError;
use crate::services::assets::{standardize, AssetRegistry, ResolvedPair};
use crate::services::exchange::KrakenClient;
use crate::services::log_sink::LogSink;
use crate::services::metrics::Metrics;
use crate::types::{BalanceEvent, EngineEvent, LedgerEntryKind, Order, OrderState, SkipReason, Trade};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Wait before the one status poll after a submission
const SETTLE_DELAY: Duration = Duration::from_secs(3);
/// Wait before re-submitting the unfilled residual of a partial fill
const RESIDUAL_DELAY: Duration = Duration::from_secs(2);
/// Submission retries: `attempt * SUBMIT_BACKOFF` between attempts
const SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_BACKOFF: Duration = Duration::from_secs(2);
/// Terminal orders stay visible this long before being swept
const ORDER_RETENTION_SECS: i64 = 3600;
/// A decrease of at least this share of the submitted volume counts as the
/// ambiguous order having filled
const AMBIGUOUS_FILL_SHARE: Decimal = dec!(0.9);

struct EngineState {
    /// Last value delivered by the feed or snapshot, keyed by standard code
    reported: RwLock<HashMap<String, Decimal>>,
    /// Amount in hand when the most recent cycle evaluated the asset
    last_acted: RwLock<HashMap<String, Decimal>>,
    /// Orders this process has placed, non-terminal plus a retention window
    orders: RwLock<HashMap<String, Order>>,
    /// Submissions awaiting snapshot reconciliation
    ambiguous: RwLock<HashMap<String, AmbiguousEntry>>,
    /// Per-asset single-flight locks
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    initial_pass_complete: AtomicBool,
    in_flight: AtomicU64,
}

/// The liquidation engine (C4)
pub struct AutoSellEngine {
    client: Arc<KrakenClient>,
    registry: Arc<AssetRegistry>,
    metrics: Metrics,
    sink: LogSink,
    state: EngineState,
}

impl AutoSellEngine {
    pub fn new(
        client: Arc<KrakenClient>,
        registry: Arc<AssetRegistry>,
        metrics: Metrics,
        sink: LogSink,
    ) -> Self {
        Self {
            client,
            registry,
            metrics,
            sink,
            state: EngineState {
                reported: RwLock::new(HashMap::new()),
                last_acted: RwLock::new(HashMap::new()),
                orders: RwLock::new(HashMap::new()),
                ambiguous: RwLock::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                initial_pass_complete: AtomicBool::new(false),
                in_flight: AtomicU64::new(0),
            },
        }
    }

    /// One-time startup sweep. Fetches the balance and runs every non-zero
    /// asset through the gates, serially, before the feed is started.
    pub async fn cold_pass(self: &Arc<Self>) -> Result<(), ApiError> {
        let balances = self.client.balance().await?;
        info!("cold pass over {} assets", balances.len());

        {
            let mut reported = self.state.reported.write().await;
            for (native, amount) in &balances {
                reported.insert(standardize(native), *amount);
            }
        }

        for (native, amount) in balances {
            if amount <= Decimal::ZERO {
                continue;
            }
            let asset = standardize(&native);
            self.clone().sell_cycle(asset, amount, Trigger::ColdPass).await;
        }

        self.state.initial_pass_complete.store(true, Ordering::Relaxed);
        info!("cold pass complete");
        Ok(())
    }

    /// Consume typed feed events until the channel closes or shutdown
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<EngineEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(EngineEvent::Snapshot(entries)) => self.handle_snapshot(entries).await,
                    Some(EngineEvent::Update(event)) => self.handle_update(event).await,
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("engine event loop stopped");
    }

    /// A fresh snapshot is ground truth: replace `reported`, settle any
    /// parked ambiguous submissions, then re-examine assets whose amount
    /// differs from what the last cycle acted on.
    async fn handle_snapshot(self: &Arc<Self>, entries: Vec<(String, Decimal)>) {
        let mut snapshot: HashMap<String, Decimal> = HashMap::with_capacity(entries.len());
        for (native, amount) in entries {
            snapshot.insert(standardize(&native), amount);
        }
        debug!("snapshot with {} assets", snapshot.len());

        *self.state.reported.write().await = snapshot.clone();
        self.reconcile_ambiguous(&snapshot).await;

        for (asset, amount) in snapshot {
            if amount <= Decimal::ZERO {
                self.state.last_acted.write().await.remove(&asset);
                continue;
            }
            let acted = self.state.last_acted.read().await.get(&asset).copied();
            if acted == Some(amount) {
                debug!("{}: snapshot amount unchanged, ignoring", asset);
                continue;
            }
            self.spawn_cycle(asset, amount, Trigger::Snapshot);
        }
    }

    /// Classification of stream updates:
    /// deposits dispatch, trades are our own settlement echo, everything
    /// else is bookkeeping. A zero total clears the asset's acted state so
    /// a later identical amount re-arms it.
    async fn handle_update(self: &Arc<Self>, event: BalanceEvent) {
        let asset = standardize(&event.asset);
        debug!(
            "{}: {} amount={} balance={}",
            asset, event.kind, event.amount, event.balance
        );

        self.state
            .reported
            .write()
            .await
            .insert(asset.clone(), event.balance);

        if event.balance <= Decimal::ZERO {
            self.state.last_acted.write().await.remove(&asset);
            return;
        }

        match event.kind {
            LedgerEntryKind::Deposit if event.amount > Decimal::ZERO => {
                self.spawn_cycle(asset, event.balance, Trigger::Deposit);
            }
            LedgerEntryKind::Trade => {
                // Settlement echo of an order this process placed
                debug!("{}: trade echo, no dispatch", asset);
            }
            _ => {}
        }
    }

    fn spawn_cycle(self: &Arc<Self>, asset: String, amount: Decimal, trigger: Trigger) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.sell_cycle(asset, amount, trigger).await;
        });
    }

    /// One full per-asset cycle under the single-flight lock. After each
    /// evaluation the asset is re-examined: events that arrived while the
    /// cycle was in flight only refreshed `reported`, so a changed balance
    /// means more work.
    async fn sell_cycle(self: Arc<Self>, asset: String, amount: Decimal, trigger: Trigger) {
        let lock = self.asset_lock(&asset).await;
        let Ok(_guard) = lock.try_lock() else {
            debug!("{}: sell already in flight, coalescing", asset);
            return;
        };

        self.state.in_flight.fetch_add(1, Ordering::Relaxed);
        let mut hint = amount;
        loop {
            let requested = self
                .state
                .reported
                .read()
                .await
                .get(&asset)
                .copied()
                .unwrap_or(hint);
            if requested <= Decimal::ZERO {
                break;
            }
            let acted = self.state.last_acted.read().await.get(&asset).copied();
            if acted == Some(requested) {
                break;
            }

            self.evaluate_and_sell(&asset, requested, trigger).await;
            hint = requested;
        }
        self.state.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Gates, submission, settle poll. Records the evaluated amount in
    /// `last_acted` up front so replays of the same snapshot are no-ops.
    async fn evaluate_and_sell(&self, asset: &str, requested: Decimal, trigger: Trigger) {
        self.state
            .last_acted
            .write()
            .await
            .insert(asset.to_string(), requested);

        if self.state.ambiguous.read().await.contains_key(asset) {
            info!("{}: awaiting ambiguous-submission reconciliation, holding off", asset);
            return;
        }

        let resolved = match self.check_gates(asset, requested).await {
            Ok(resolved) => resolved,
            Err(Some(reason)) => {
                self.metrics.inc_sells_skipped();
                info!(
                    "{}: not selling {} ({}), trigger={}",
                    asset, requested, reason, trigger
                );
                self.sink.emit(
                    "sell_skipped",
                    json!({
                        "asset": asset,
                        "amount": requested.to_string(),
                        "reason": reason,
                        "trigger": trigger.to_string(),
                    }),
                );
                return;
            }
            Err(None) => return, // live-balance fetch failed, already logged
        };

        let mut volume = resolved.volume;
        let mut followed_up = false;
        loop {
            let Some(txid) = self
                .submit_with_retry(asset, &resolved.pair, volume, requested)
                .await
            else {
                break;
            };

            match self.settle_poll(asset, &resolved.pair, &txid, volume).await {
                Some(residual) if !followed_up => {
                    // One follow-up for the unfilled remainder, re-gated:
                    // it may now be below the pair minimum.
                    sleep(RESIDUAL_DELAY).await;
                    match self.check_gates(asset, residual).await {
                        Ok(regated) => {
                            followed_up = true;
                            volume = regated.volume;
                        }
                        Err(Some(reason)) => {
                            self.metrics.inc_sells_skipped();
                            info!("{}: residual {} not re-sold ({})", asset, residual, reason);
                            break;
                        }
                        Err(None) => break,
                    }
                }
                _ => break,
            }
        }
        // `last_acted` stays at the amount this cycle acted on: the tail
        // check in `sell_cycle` must see a deposit that landed while the
        // order worked as a changed balance and go around again.
    }

    /// Dispatch gates, checked in order. `Err(Some(reason))` is a logged
    /// business rejection; `Err(None)` means the verification call itself
    /// failed.
    async fn check_gates(
        &self,
        asset: &str,
        requested: Decimal,
    ) -> Result<GatedSell, Option<SkipReason>> {
        if self.registry.is_target_fiat(asset) {
            return Err(Some(SkipReason::TargetCurrency));
        }

        let Some(ResolvedPair {
            pair_symbol,
            minimum_order_size,
        }) = self.registry.pair_for(asset)
        else {
            return Err(Some(SkipReason::NoMarket));
        };

        if requested < minimum_order_size {
            return Err(Some(SkipReason::BelowMinimumOrder));
        }

        // The feed can lag reality; only sell what the exchange will honor.
        let live = match self.client.balance().await {
            Ok(balances) => balances
                .iter()
                .find(|(native, _)| standardize(native) == asset)
                .map(|(_, amount)| *amount)
                .unwrap_or(Decimal::ZERO),
            Err(e) => {
                warn!("{}: live balance verification failed: {}", asset, e);
                return Err(None);
            }
        };

        if live < minimum_order_size {
            return Err(Some(SkipReason::InsufficientAvailableBalance));
        }

        Ok(GatedSell {
            pair: pair_symbol,
            volume: requested.min(live),
        })
    }

    /// Submit with bounded retries. Ambiguous outcomes are parked, never
    /// re-issued. Returns the txid on success.
    async fn submit_with_retry(
        &self,
        asset: &str,
        pair: &str,
        volume: Decimal,
        balance_at_submit: Decimal,
    ) -> Option<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.submit_market_sell(pair, volume).await {
                Ok(txid) => {
                    self.metrics.inc_orders_submitted();
                    info!("{}: submitted market sell {} vol={}", asset, txid, volume);
                    self.sink.emit(
                        "sell_submitted",
                        json!({
                            "asset": asset,
                            "pair": pair,
                            "txid": txid,
                            "volume": volume.to_string(),
                        }),
                    );
                    self.record_order(asset, pair, &txid, volume).await;
                    return Some(txid);
                }
                Err(ApiError::AmbiguousSubmission) => {
                    self.metrics.inc_ambiguous_submissions();
                    warn!(
                        "{}: submission outcome unknown (vol={}), parking for reconciliation",
                        asset, volume
                    );
                    self.sink.emit(
                        "sell_ambiguous",
                        json!({
                            "asset": asset,
                            "pair": pair,
                            "volume": volume.to_string(),
                        }),
                    );
                    self.state.ambiguous.write().await.insert(
                        asset.to_string(),
                        AmbiguousEntry {
                            submitted_volume: volume,
                            balance_at_submit,
                        },
                    );
                    return None;
                }
                Err(e) if e.is_retryable() && attempt < SUBMIT_ATTEMPTS => {
                    warn!(
                        "{}: sell attempt {}/{} failed: {}",
                        asset, attempt, SUBMIT_ATTEMPTS, e
                    );
                    sleep(SUBMIT_BACKOFF * attempt).await;
                    // A zero balance arriving during backoff cancels the cycle
                    let current = self
                        .state
                        .reported
                        .read()
                        .await
                        .get(asset)
                        .copied()
                        .unwrap_or(Decimal::ZERO);
                    if current <= Decimal::ZERO {
                        info!("{}: balance cleared during backoff, abandoning sell", asset);
                        return None;
                    }
                }
                Err(e) => {
                    self.metrics.inc_orders_failed();
                    error!(
                        "{}: sell failed after {} attempt(s): {} (vol={})",
                        asset, attempt, e, volume
                    );
                    self.sink.emit(
                        "sell_failed",
                        json!({
                            "asset": asset,
                            "pair": pair,
                            "volume": volume.to_string(),
                            "error": e.to_string(),
                            "attempts": attempt,
                        }),
                    );
                    return None;
                }
            }
        }
    }

    /// Query the order once after a settle delay. Returns the unfilled
    /// residual when the order closed short of the submitted volume.
    async fn settle_poll(
        &self,
        asset: &str,
        pair: &str,
        txid: &str,
        submitted: Decimal,
    ) -> Option<Decimal> {
        sleep(SETTLE_DELAY).await;

        let orders = match self.client.query_orders(&[txid.to_string()]).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("{}: settle poll for {} failed: {}", asset, txid, e);
                return None;
            }
        };
        let Some(order_info) = orders.get(txid) else {
            warn!("{}: exchange does not know order {}", asset, txid);
            return None;
        };

        let filled = order_info.vol_exec.unwrap_or(Decimal::ZERO);
        let state = match order_info.status.as_str() {
            "closed" => OrderState::Closed,
            "canceled" | "expired" => OrderState::Canceled,
            "open" => OrderState::Open,
            "pending" => OrderState::Pending,
            other => {
                debug!("{}: order {} in unexpected status {}", asset, txid, other);
                OrderState::Open
            }
        };

        let fills = if order_info.trades.is_empty() {
            Vec::new()
        } else {
            self.fetch_fills(pair, txid, &order_info.trades).await
        };
        self.finalize_order(txid, state, filled, fills).await;

        match state {
            OrderState::Closed if filled < submitted => {
                self.metrics.inc_orders_partially_filled();
                let residual = submitted - filled;
                info!(
                    "{}: order {} closed partially filled ({} of {}), residual {}",
                    asset, txid, filled, submitted, residual
                );
                Some(residual)
            }
            OrderState::Closed => {
                self.metrics.inc_orders_filled();
                info!("{}: order {} closed, filled {}", asset, txid, filled);
                self.sink.emit(
                    "sell_filled",
                    json!({
                        "asset": asset,
                        "txid": txid,
                        "volume": filled.to_string(),
                    }),
                );
                None
            }
            OrderState::Canceled => {
                self.metrics.inc_orders_failed();
                warn!("{}: order {} canceled by the exchange", asset, txid);
                None
            }
            _ => {
                // Still working; the balance going to zero closes the cycle
                debug!("{}: order {} still {}", asset, txid, state);
                None
            }
        }
    }

    async fn fetch_fills(&self, pair: &str, txid: &str, trade_ids: &[String]) -> Vec<Trade> {
        match self.client.query_trades(trade_ids).await {
            Ok(trades) => trades
                .into_iter()
                .map(|(trade_id, info)| Trade {
                    trade_id,
                    order_txid: txid.to_string(),
                    pair: pair.to_string(),
                    side: info.side,
                    price: info.price,
                    volume: info.vol,
                    cost: info.cost,
                    fee: info.fee,
                    timestamp: Utc
                        .timestamp_opt(info.time as i64, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
                .collect(),
            Err(e) => {
                debug!("fill lookup for {} failed: {}", txid, e);
                Vec::new()
            }
        }
    }

    async fn record_order(&self, asset: &str, pair: &str, txid: &str, volume: Decimal) {
        let mut orders = self.state.orders.write().await;
        // Sweep terminal orders past the retention window while we hold the lock
        let cutoff = Utc::now() - ChronoDuration::seconds(ORDER_RETENTION_SECS);
        orders.retain(|_, order| {
            !order.state.is_terminal() || order.finalized_at.map_or(true, |at| at > cutoff)
        });
        orders.insert(
            txid.to_string(),
            Order {
                txid: txid.to_string(),
                asset: asset.to_string(),
                pair: pair.to_string(),
                requested_volume: volume,
                filled_volume: Decimal::ZERO,
                state: OrderState::Pending,
                fills: Vec::new(),
                submitted_at: Utc::now(),
                finalized_at: None,
            },
        );
    }

    async fn finalize_order(
        &self,
        txid: &str,
        state: OrderState,
        filled: Decimal,
        fills: Vec<Trade>,
    ) {
        let mut orders = self.state.orders.write().await;
        if let Some(order) = orders.get_mut(txid) {
            order.state = state;
            order.filled_volume = filled;
            if !fills.is_empty() {
                order.fills = fills;
            }
            if state.is_terminal() {
                order.finalized_at = Some(Utc::now());
            }
        }
    }

    /// Settle parked ambiguous submissions against a fresh snapshot: a
    /// balance that dropped by roughly the submitted volume means the order
    /// made it; anything else re-arms the asset for normal classification.
    async fn reconcile_ambiguous(&self, snapshot: &HashMap<String, Decimal>) {
        let parked: Vec<(String, AmbiguousEntry)> = {
            let ambiguous = self.state.ambiguous.read().await;
            ambiguous.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        if parked.is_empty() {
            return;
        }

        for (asset, entry) in parked {
            let current = snapshot.get(&asset).copied().unwrap_or(Decimal::ZERO);
            let decrease = entry.balance_at_submit - current;
            let filled = decrease >= entry.submitted_volume * AMBIGUOUS_FILL_SHARE;

            if filled {
                info!(
                    "{}: ambiguous submission reconciled as filled (balance {} -> {})",
                    asset, entry.balance_at_submit, current
                );
                self.sink.emit(
                    "ambiguous_reconciled",
                    json!({
                        "asset": asset,
                        "outcome": "filled",
                        "submitted_volume": entry.submitted_volume.to_string(),
                        "balance": current.to_string(),
                    }),
                );
                // Suppress re-dispatch of whatever dust remains this round
                self.state.last_acted.write().await.insert(asset.clone(), current);
            } else {
                info!(
                    "{}: ambiguous submission reconciled as not filled (balance {} -> {}), re-arming",
                    asset, entry.balance_at_submit, current
                );
                self.sink.emit(
                    "ambiguous_reconciled",
                    json!({
                        "asset": asset,
                        "outcome": "not_filled",
                        "submitted_volume": entry.submitted_volume.to_string(),
                        "balance": current.to_string(),
                    }),
                );
                // The submitting cycle recorded this balance as acted on;
                // forget that so the snapshot loop re-classifies the asset
                // even though the amount is unchanged.
                self.state.last_acted.write().await.remove(&asset);
            }
            self.state.ambiguous.write().await.remove(&asset);
        }
    }

    async fn asset_lock(&self, asset: &str) -> Arc<Mutex<()>> {
        let mut locks = self.state.locks.lock().await;
        locks
            .entry(asset.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Read-only accessors for the status surface

    pub fn initial_pass_complete(&self) -> bool {
        self.state.initial_pass_complete.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.state.in_flight.load(Ordering::Relaxed)
    }

    pub async fn balances(&self) -> HashMap<String, Decimal> {
        self.state.reported.read().await.clone()
    }

    pub async fn balance(&self, asset: &str) -> Option<Decimal> {
        self.state
            .reported
            .read()
            .await
            .get(&standardize(asset))
            .copied()
    }

    pub async fn order(&self, txid: &str) -> Option<Order> {
        self.state.orders.read().await.get(txid).cloned()
    }
}

struct GatedSell {
    pair: String,
    volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    /// Engine whose client points at nothing; tests below only exercise
    /// paths that never reach the network.
    fn offline_engine() -> (Arc<AutoSellEngine>, Metrics) {
        let config = Config {
            api_key: "key".to_string(),
            api_secret: b"secret".to_vec(),
            target_fiat: "USD".to_string(),
            sandbox: false,
            http_port: 0,
            debug: false,
            log_sink_url: None,
            log_sink_token: None,
        };
        let metrics = Metrics::new();
        let client = Arc::new(KrakenClient::with_base_url(
            &config,
            metrics.clone(),
            "http://127.0.0.1:9".to_string(),
        ));
        // Empty registry: every dispatch dies at the no-market gate,
        // observable through the skip counter, without any network.
        let registry = Arc::new(AssetRegistry::new("USD"));
        let engine = Arc::new(AutoSellEngine::new(
            client,
            registry,
            metrics.clone(),
            LogSink::disabled(),
        ));
        (engine, metrics)
    }

    async fn settle() {
        sleep(Duration::from_millis(100)).await;
    }

    fn deposit(asset: &str, amount: Decimal, balance: Decimal) -> BalanceEvent {
        BalanceEvent {
            asset: asset.to_string(),
            kind: LedgerEntryKind::Deposit,
            amount,
            balance,
            ledger_id: None,
            ref_id: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn deposit_reaches_the_gates() {
        let (engine, metrics) = offline_engine();
        engine.handle_update(deposit("XETH", dec!(0.2), dec!(0.2))).await;
        settle().await;
        assert_eq!(metrics.snapshot().sells_skipped, 1);
        assert_eq!(engine.balance("ETH").await, Some(dec!(0.2)));
    }

    #[tokio::test]
    async fn trade_echo_updates_reported_only() {
        let (engine, metrics) = offline_engine();
        engine
            .state
            .reported
            .write()
            .await
            .insert("ETH".to_string(), dec!(0.2));

        engine
            .handle_update(BalanceEvent {
                asset: "XETH".to_string(),
                kind: LedgerEntryKind::Trade,
                amount: dec!(-0.2),
                balance: Decimal::ZERO,
                ledger_id: None,
                ref_id: None,
                timestamp: None,
            })
            .await;
        settle().await;

        assert_eq!(engine.balance("ETH").await, Some(Decimal::ZERO));
        assert_eq!(metrics.snapshot().sells_skipped, 0);
        assert_eq!(metrics.snapshot().orders_submitted, 0);
    }

    #[tokio::test]
    async fn withdrawal_never_dispatches() {
        let (engine, metrics) = offline_engine();
        engine
            .handle_update(BalanceEvent {
                asset: "XETH".to_string(),
                kind: LedgerEntryKind::Withdrawal,
                amount: dec!(-0.1),
                balance: dec!(0.3),
                ledger_id: None,
                ref_id: None,
                timestamp: None,
            })
            .await;
        settle().await;
        assert_eq!(metrics.snapshot().sells_skipped, 0);
        assert_eq!(engine.balance("ETH").await, Some(dec!(0.3)));
    }

    #[tokio::test]
    async fn snapshot_replay_with_unchanged_amount_is_ignored() {
        let (engine, metrics) = offline_engine();
        let entries = vec![("XETH".to_string(), dec!(0.5))];

        engine.handle_snapshot(entries.clone()).await;
        settle().await;
        let after_first = metrics.snapshot().sells_skipped;
        assert_eq!(after_first, 1);

        engine.handle_snapshot(entries).await;
        settle().await;
        assert_eq!(metrics.snapshot().sells_skipped, after_first);
    }

    #[tokio::test]
    async fn zero_total_rearms_the_asset() {
        let (engine, metrics) = offline_engine();
        engine.handle_snapshot(vec![("XETH".to_string(), dec!(0.5))]).await;
        settle().await;
        assert_eq!(metrics.snapshot().sells_skipped, 1);

        // Balance goes to zero, then the same amount shows up again: that
        // is a fresh deposit, not a replay.
        engine
            .handle_update(BalanceEvent {
                asset: "XETH".to_string(),
                kind: LedgerEntryKind::Trade,
                amount: dec!(-0.5),
                balance: Decimal::ZERO,
                ledger_id: None,
                ref_id: None,
                timestamp: None,
            })
            .await;
        engine.handle_snapshot(vec![("XETH".to_string(), dec!(0.5))]).await;
        settle().await;
        assert_eq!(metrics.snapshot().sells_skipped, 2);
    }

    #[tokio::test]
    async fn ambiguous_submission_reconciles_as_filled() {
        let (engine, metrics) = offline_engine();
        engine.state.ambiguous.write().await.insert(
            "ETH".to_string(),
            AmbiguousEntry {
                submitted_volume: dec!(0.5),
                balance_at_submit: dec!(0.5),
            },
        );

        // Balance collapsed by the submitted volume: the order made it
        engine.handle_snapshot(vec![("XETH".to_string(), Decimal::ZERO)]).await;
        settle().await;

        assert!(engine.state.ambiguous.read().await.is_empty());
        assert_eq!(metrics.snapshot().sells_skipped, 0);
    }

    #[tokio::test]
    async fn ambiguous_submission_rearms_when_balance_unchanged() {
        let (engine, metrics) = offline_engine();
        // Reproduce the state a submitting cycle leaves behind when the
        // order goes ambiguous: the pre-submit balance is both reported
        // and recorded as acted on, and the entry is parked.
        engine
            .state
            .reported
            .write()
            .await
            .insert("ETH".to_string(), dec!(0.5));
        engine
            .state
            .last_acted
            .write()
            .await
            .insert("ETH".to_string(), dec!(0.5));
        engine.state.ambiguous.write().await.insert(
            "ETH".to_string(),
            AmbiguousEntry {
                submitted_volume: dec!(0.5),
                balance_at_submit: dec!(0.5),
            },
        );

        // Balance did not move: the order never reached the exchange. Even
        // though the snapshot amount equals last-acted, reconciliation must
        // re-arm the asset and the snapshot loop must re-classify it.
        engine.handle_snapshot(vec![("XETH".to_string(), dec!(0.5))]).await;
        settle().await;

        assert!(engine.state.ambiguous.read().await.is_empty());
        assert_eq!(metrics.snapshot().sells_skipped, 1);
    }

    #[tokio::test]
    async fn target_fiat_is_never_a_candidate() {
        let (engine, metrics) = offline_engine();
        engine.handle_update(deposit("ZUSD", dec!(100), dec!(100))).await;
        settle().await;
        // The target-currency gate fires, not the no-market gate; either
        // way nothing is submitted.
        assert_eq!(metrics.snapshot().orders_submitted, 0);
        assert_eq!(metrics.snapshot().sells_skipped, 1);
        assert_eq!(engine.balance("USD").await, Some(dec!(100)));
    }
}
