/// Fast trade executor: send first, confirm later
///
/// The single entry point is `process_signal_fast`. It never blocks the
/// caller: dedup and stats are synchronous, the trade itself runs in its
/// own task. Sends go out with skipPreflight and the position is finalized
/// or undone when the WebSocket confirmation arrives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::blockchain::{
    human_error, human_error_with_action, BalanceTracker, RpcClient, TransactionBuilder, Wallet,
};
use crate::client::{PriceFeed, WalletMonitor, WsClient};
use crate::config::ConfigManager;
use crate::database::{Db, TradeRow};
use crate::signal::{Signal, SignalType};
use crate::trading::jupiter_client::{JupiterClient, SOL_MINT};
use crate::trading::metrics::{Metrics, TradeTimer};
use crate::trading::position::{Position, PositionTracker, PENDING_TX_SIG};

/// 0.005 SOL floor: below this a trade cannot cover itself plus fees.
pub const MIN_TRADE_LAMPORTS: u64 = 5_000_000;
/// 0.001 SOL minimum allocation per trade.
pub const MIN_ALLOC_LAMPORTS: u64 = 1_000_000;

const PENDING_POSITION_TTL: Duration = Duration::from_secs(2 * 60);
const FAILED_POSITION_TTL: Duration = Duration::from_secs(60);
const DUPLICATE_SIGNAL_TTL: Duration = Duration::from_secs(5 * 60);
const SIGNAL_CLEANUP_TTL: Duration = Duration::from_secs(10 * 60);
const SEEN_TARGET_MAX: usize = 1000;

const MONITOR_INTERVAL: Duration = Duration::from_secs(5);
const MONITOR_CONCURRENCY: usize = 5;
/// Skip the RPC poll when the WebSocket refreshed the position this recently.
const WS_FRESHNESS: Duration = Duration::from_secs(2);

const RETRY_BASE_BACKOFF_MS: u64 = 100;
const SELL_ALL_STAGGER: Duration = Duration::from_millis(100);

const SIM_BALANCE_LAMPORTS: u64 = 1_000_000_000;
const SIM_TOKEN_BALANCE: u64 = 1_000_000_000;

/// How a trade request ended. Policy rejections are outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    Sent { signature: String },
    Simulated { signature: String },
    Skipped { reason: String },
}

struct WsStack {
    client: Arc<WsClient>,
    wallet_monitor: Arc<WalletMonitor>,
    price_feed: Arc<PriceFeed>,
}

pub struct FastExecutor {
    cfg: Arc<ConfigManager>,
    wallet: Arc<Wallet>,
    rpc: Arc<RpcClient>,
    jupiter: Arc<JupiterClient>,
    tx_builder: Arc<TransactionBuilder>,
    positions: Arc<PositionTracker>,
    balance: Arc<BalanceTracker>,
    db: Option<Arc<Db>>,
    metrics: Arc<Metrics>,

    // Duplicate protection
    recent_signals: DashMap<i64, Instant>,
    recent_mints: DashMap<String, Instant>,
    seen_target: DashMap<String, ()>,

    // Dashboard counters; updated even when trading is paused
    total_entry_signals: AtomicU64,
    reached_target_hits: AtomicU64,

    max_retries: u32,
    sim_mode: AtomicBool,

    ws: RwLock<Option<WsStack>>,
}

impl FastExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<ConfigManager>,
        wallet: Arc<Wallet>,
        rpc: Arc<RpcClient>,
        jupiter: Arc<JupiterClient>,
        tx_builder: Arc<TransactionBuilder>,
        positions: Arc<PositionTracker>,
        balance: Arc<BalanceTracker>,
        db: Option<Arc<Db>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            wallet,
            rpc,
            jupiter,
            tx_builder,
            positions,
            balance,
            db,
            metrics: Arc::new(Metrics::new()),
            recent_signals: DashMap::new(),
            recent_mints: DashMap::new(),
            seen_target: DashMap::new(),
            total_entry_signals: AtomicU64::new(0),
            reached_target_hits: AtomicU64::new(0),
            max_retries: 2,
            sim_mode: AtomicBool::new(false),
            ws: RwLock::new(None),
        })
    }

    pub fn set_simulation_mode(&self, enabled: bool) {
        self.sim_mode.store(enabled, Ordering::Relaxed);
        info!(enabled, "executor simulation mode set");
    }

    fn sim_active(&self) -> bool {
        self.sim_mode.load(Ordering::Relaxed) || self.cfg.trading().simulation_mode
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// (total entry signals, unique take-profit hits)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.total_entry_signals.load(Ordering::Relaxed),
            self.reached_target_hits.load(Ordering::Relaxed),
        )
    }

    pub fn reset_stats(&self) {
        self.total_entry_signals.store(0, Ordering::Relaxed);
        self.reached_target_hits.store(0, Ordering::Relaxed);
    }

    pub fn open_positions(&self) -> Vec<crate::trading::position::PositionSnapshot> {
        self.positions.get_all_snapshots()
    }

    pub async fn clear_positions(&self) {
        self.positions.clear_all().await;
    }

    // ---- WebSocket wiring -------------------------------------------------

    /// Connects the subscription layer: wallet balance pushes, price feed,
    /// and confirmation callbacks. A missing URL disables real-time mode.
    pub async fn setup_websocket(
        self: &Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let ws_url = self.cfg.ws_url();
        if ws_url.is_empty() {
            warn!("WebSocket URL not configured, skipping real-time setup");
            return Ok(());
        }

        let ws_cfg = self.cfg.get().websocket;
        let client = WsClient::new(
            ws_url,
            Duration::from_millis(ws_cfg.reconnect_delay_ms),
            Duration::from_millis(ws_cfg.ping_interval_ms),
        );

        let executor = Arc::clone(self);
        client.set_callbacks(
            move || {
                info!("📡 WebSocket connected - real-time mode active");
                executor.resubscribe_positions();
            },
            || {
                warn!("📡 WebSocket disconnected");
            },
        );

        client.start(shutdown).await?;

        let price_feed = PriceFeed::new(Arc::clone(&client));
        let executor = Arc::clone(self);
        price_feed.on_price_update(move |update| {
            executor.handle_realtime_price_update(update);
        });

        let wallet_monitor = WalletMonitor::new(Arc::clone(&client), self.wallet.address().to_string());
        let balance = Arc::clone(&self.balance);
        wallet_monitor.on_balance_update(move |update| {
            debug!(sol = update.lamports as f64 / 1e9, slot = update.slot, "real-time wallet balance");
            balance.set_balance(update.lamports);
        });

        if let Err(err) = wallet_monitor.start_wallet_subscription().await {
            warn!(error = %err, "failed to start wallet subscription");
        }

        *self.ws.write().unwrap() = Some(WsStack {
            client,
            wallet_monitor,
            price_feed,
        });
        info!("WebSocket + price feed + wallet monitor initialized");
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("shutting down executor...");
        let stack = self.ws.write().unwrap().take();
        if let Some(stack) = stack {
            stack.wallet_monitor.stop().await;
            drop(stack.price_feed);
            drop(stack.client);
        }
        info!("executor shutdown complete");
    }

    fn wallet_monitor(&self) -> Option<Arc<WalletMonitor>> {
        self.ws
            .read()
            .unwrap()
            .as_ref()
            .map(|s| Arc::clone(&s.wallet_monitor))
    }

    fn price_feed(&self) -> Option<Arc<PriceFeed>> {
        self.ws
            .read()
            .unwrap()
            .as_ref()
            .map(|s| Arc::clone(&s.price_feed))
    }

    /// Server-side subscription ids die with the socket; re-track every
    /// position that has a pool address after a reconnect.
    fn resubscribe_positions(&self) {
        let Some(price_feed) = self.price_feed() else {
            return;
        };
        for position in self.positions.get_all() {
            let Some(pool_addr) = position.pool_addr() else {
                continue;
            };
            let price_feed = Arc::clone(&price_feed);
            let mint = position.mint.clone();
            tokio::spawn(async move {
                if let Err(err) = price_feed.track_token(&mint, &pool_addr).await {
                    warn!(mint = %mint, error = %err, "failed to resubscribe");
                }
            });
        }
    }

    /// WebSocket price push: instant take-profit detection between polls.
    fn handle_realtime_price_update(self: &Arc<Self>, update: crate::client::PriceUpdate) {
        let Some(position) = self.positions.get(&update.mint) else {
            return;
        };

        if update.token_balance == 0 && position.token_balance() > 0 {
            warn!(mint = %update.mint, "token balance dropped to 0 - removing position");
            let positions = Arc::clone(&self.positions);
            let mint = update.mint.clone();
            tokio::spawn(async move {
                let _ = positions.remove(&mint).await;
            });
            return;
        }

        if update.price_sol <= 0.0 {
            if update.token_balance > 0 {
                position.set_token_balance(update.token_balance);
            }
            return;
        }

        let current_value_sol = update.price_sol * update.token_balance as f64;
        let multiple = position.update_stats(current_value_sol, update.token_balance);

        let trading = self.cfg.trading();
        if trading.auto_trading_enabled
            && multiple >= trading.take_profit_multiple
            && !position.reached_target()
        {
            position.set_reached_target(true);
            self.increment_target_hit(&update.mint);
            info!(
                token = %position.token_name,
                multiple,
                "🚀 real-time take-profit detected - triggering auto-sell"
            );

            let executor = Arc::clone(self);
            let signal = Signal {
                token_name: position.token_name.clone(),
                mint: update.mint.clone(),
                signal_type: SignalType::Exit,
                value: multiple,
                unit: "X".to_string(),
                msg_id: 0,
                timestamp: 0,
            };
            tokio::spawn(async move {
                if let Err(err) = executor.execute_sell_fast(signal, TradeTimer::new()).await {
                    error!(error = %human_error_with_action(&err), "real-time sell failed");
                }
            });
        }
    }

    // ---- Signal entry point ----------------------------------------------

    /// Non-blocking entry point for classified signals. Dedup and counting
    /// happen inline; the trade runs in its own task so one bad signal can
    /// never stall another.
    pub fn process_signal_fast(self: &Arc<Self>, signal: Signal) {
        let mut timer = TradeTimer::new();

        if signal.mint.is_empty() {
            debug!(token = %signal.token_name, "signal without mint, ignoring");
            return;
        }

        if self.is_duplicate_signal(signal.msg_id) {
            debug!(msg_id = signal.msg_id, "duplicate signal ignored");
            return;
        }
        self.mark_signal_seen(signal.msg_id);

        timer.mark_parse_done();
        timer.mark_resolve_done();

        // Count before the trading gate so the dashboard stays meaningful
        // with auto-trading paused.
        match signal.signal_type {
            SignalType::Entry => {
                self.increment_entry_signals(&signal.mint);
                info!(
                    token = %signal.token_name,
                    value = signal.value,
                    unit = %signal.unit,
                    "📊 ENTRY SIGNAL"
                );
            }
            SignalType::Exit => {
                // Unique-hit counting happens in the sell path.
                info!(token = %signal.token_name, value = signal.value, "📊 EXIT SIGNAL");
            }
            SignalType::Other => return,
        }

        if !self.cfg.trading().auto_trading_enabled {
            return;
        }

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let result = match signal.signal_type {
                SignalType::Entry => executor.execute_buy_fast(signal, timer).await,
                SignalType::Exit => {
                    if executor.positions.has(&signal.mint) {
                        executor.execute_sell_fast(signal, timer).await
                    } else {
                        Ok(TradeOutcome::Skipped {
                            reason: "no position for exit signal".to_string(),
                        })
                    }
                }
                SignalType::Other => return,
            };

            match result {
                Ok(TradeOutcome::Skipped { reason }) => debug!(reason = %reason, "trade skipped"),
                Ok(_) => {}
                Err(err) => error!(error = %human_error_with_action(&err), "trade failed"),
            }
        });
    }

    // ---- Buy path ---------------------------------------------------------

    pub async fn execute_buy_fast(
        self: &Arc<Self>,
        signal: Signal,
        mut timer: TradeTimer,
    ) -> Result<TradeOutcome> {
        if !self.positions.can_open() {
            warn!(
                token = %signal.token_name,
                current = self.positions.count(),
                "❌ max positions reached - skipping buy"
            );
            return Ok(TradeOutcome::Skipped {
                reason: "max open positions reached".to_string(),
            });
        }

        // Already holding this mint: refresh display stats, no second buy.
        if let Some(position) = self.positions.get(&signal.mint) {
            position.set_stats_from_signal(signal.value, &signal.unit);
            self.positions.add(position).await?;
            warn!(mint = %signal.mint, "already have position, updated stats, skipping buy");
            return Ok(TradeOutcome::Skipped {
                reason: "position already open".to_string(),
            });
        }

        let trading = self.cfg.trading();
        let sim = self.sim_active();

        let balance_lamports = if sim {
            SIM_BALANCE_LAMPORTS
        } else {
            self.balance.balance_lamports()
        };

        if balance_lamports == 0 {
            error!(token = %signal.token_name, "❌ cannot buy: wallet balance is 0 SOL");
            return Ok(TradeOutcome::Skipped {
                reason: "wallet balance is 0 - fund your wallet to trade".to_string(),
            });
        }
        if balance_lamports < MIN_TRADE_LAMPORTS {
            error!(
                token = %signal.token_name,
                balance_sol = balance_lamports as f64 / 1e9,
                min_sol = MIN_TRADE_LAMPORTS as f64 / 1e9,
                "❌ cannot buy: balance too low for trade + fees"
            );
            return Ok(TradeOutcome::Skipped {
                reason: "balance too low for trade + fees".to_string(),
            });
        }

        let mut alloc_lamports =
            (balance_lamports as f64 * trading.max_alloc_percent / 100.0) as u64;
        if alloc_lamports < MIN_ALLOC_LAMPORTS {
            alloc_lamports = MIN_ALLOC_LAMPORTS;
        }

        info!(
            token = %signal.token_name,
            mint = %signal.mint,
            amount = alloc_lamports,
            balance_sol = balance_lamports as f64 / 1e9,
            "⚡ FAST BUY - executing"
        );

        // Insert the PENDING sentinel before anything can await: this is
        // what blocks a concurrent duplicate buy for the same mint.
        let pending = Arc::new(Position::new(
            signal.mint.clone(),
            signal.token_name.clone(),
            alloc_lamports as f64 / 1e9,
            signal.value,
            signal.unit.clone(),
            signal.msg_id,
            PENDING_TX_SIG.to_string(),
        ));
        self.positions.add(pending).await?;

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff_ms = RETRY_BASE_BACKOFF_MS * (1 << (attempt - 1));
                warn!(attempt = attempt + 1, backoff_ms, "retrying buy...");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            if sim {
                timer.mark_quote_done();
                timer.mark_sign_done();
                timer.mark_send_done();
                let tx_sig = format!("SIM_BUY_{}", signal.token_name);
                self.metrics.record_trade(true, 0, 0, 0, 0, 0);
                info!(tx_sig = %tx_sig, "⚡ SIMULATION BUY EXECUTED");
                self.spawn_track_position(signal.clone(), alloc_lamports, tx_sig.clone());
                return Ok(TradeOutcome::Simulated { signature: tx_sig });
            }

            let swap_tx = match self
                .jupiter
                .get_swap_transaction(SOL_MINT, &signal.mint, self.wallet.address(), alloc_lamports)
                .await
            {
                Ok(tx) => tx,
                Err(err) => {
                    error!(error = %human_error_with_action(&err), "⚡ AGGREGATOR FAILED");
                    last_err = Some(err);
                    continue;
                }
            };
            timer.mark_quote_done();

            let signed_tx = match self.tx_builder.sign_serialized_transaction(&swap_tx) {
                Ok(tx) => tx,
                Err(err) => {
                    error!(error = %human_error(&err), "⚡ SIGN FAILED");
                    last_err = Some(err);
                    continue;
                }
            };
            timer.mark_sign_done();

            let send_result = self.rpc.send_transaction(&signed_tx, true).await;
            timer.mark_send_done();

            let (parse, resolve, quote, sign, send) = timer.breakdown();
            self.metrics
                .record_trade(send_result.is_ok(), parse, resolve, quote, sign, send);

            let tx_sig = match send_result {
                Ok(sig) => sig,
                Err(err) => {
                    let err = anyhow!(err);
                    error!(error = %human_error_with_action(&err), "⚡ TX SEND FAILED");
                    last_err = Some(err);
                    continue;
                }
            };

            info!(
                tx_sig = %tx_sig,
                total_ms = timer.total_ms(),
                quote_ms = quote,
                sign_ms = sign,
                send_ms = send,
                "⚡ BUY SENT"
            );

            self.confirm_buy_async(&signal.mint, &tx_sig);
            self.spawn_track_position(signal.clone(), alloc_lamports, tx_sig.clone());
            return Ok(TradeOutcome::Sent { signature: tx_sig });
        }

        // All attempts failed: release the mint for future signals.
        let _ = self.positions.remove(&signal.mint).await;
        Err(last_err.unwrap_or_else(|| anyhow!("buy failed with no attempts")))
    }

    /// Requests a one-shot confirmation. A failed buy undoes the position;
    /// removal is reentrant, a concurrent monitor removal is harmless.
    fn confirm_buy_async(&self, mint: &str, tx_sig: &str) {
        let Some(monitor) = self.wallet_monitor() else {
            return;
        };

        let positions = Arc::clone(&self.positions);
        let mint = mint.to_string();
        let sig = tx_sig.to_string();
        let sig_for_cb = sig.clone();
        tokio::spawn(async move {
            let result = monitor
                .wait_for_confirmation(&sig, move |conf| {
                    if conf.confirmed {
                        info!(sig = %sig_for_cb, "✅ BUY CONFIRMED via WebSocket");
                    } else {
                        error!(sig = %sig_for_cb, err = %conf.error, "❌ BUY FAILED via WebSocket");
                        tokio::spawn(async move {
                            let _ = positions.remove(&mint).await;
                        });
                    }
                })
                .await;
            if let Err(err) = result {
                warn!(error = %err, "buy confirmation subscription failed");
            }
        });
    }

    /// Replaces the PENDING sentinel with the real signature, refreshes the
    /// balance and records the BUY row. Runs off the hot path.
    fn spawn_track_position(self: &Arc<Self>, signal: Signal, alloc_lamports: u64, tx_sig: String) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let position = Arc::new(Position::new(
                signal.mint.clone(),
                signal.token_name.clone(),
                alloc_lamports as f64 / 1e9,
                signal.value,
                signal.unit.clone(),
                signal.msg_id,
                tx_sig.clone(),
            ));
            if let Err(err) = executor.positions.add(position).await {
                error!(error = %err, "failed to track position");
            }

            if !executor.sim_active() {
                let _ = executor.balance.refresh().await;
            }

            if let Some(db) = &executor.db {
                let result = db
                    .insert_trade(&TradeRow {
                        id: 0,
                        mint: signal.mint.clone(),
                        token_name: signal.token_name.clone(),
                        side: "BUY".to_string(),
                        amount_sol: alloc_lamports as f64 / 1e9,
                        entry_value: signal.value,
                        exit_value: 0.0,
                        pnl: 0.0,
                        duration: 0,
                        entry_tx_sig: tx_sig,
                        exit_tx_sig: String::new(),
                        timestamp: chrono::Utc::now().timestamp(),
                    })
                    .await;
                if let Err(err) = result {
                    warn!(error = %err, "failed to record BUY trade");
                }
            }
        });
    }

    // ---- Sell path ---------------------------------------------------------

    pub async fn execute_sell_fast(
        self: &Arc<Self>,
        signal: Signal,
        mut timer: TradeTimer,
    ) -> Result<TradeOutcome> {
        // Refresh display stats and count the unique take-profit hit.
        if let Some(position) = self.positions.get(&signal.mint) {
            position.set_stats_from_signal(signal.value, &signal.unit);
            if !position.reached_target() {
                position.set_reached_target(true);
                self.increment_target_hit(&signal.mint);
            }
            self.positions.add(position).await?;
        }

        let token_amount = match self.get_token_balance(&signal.mint).await {
            Ok(amount) => amount,
            Err(err) => {
                warn!(mint = %signal.mint, error = %err, "failed to read token balance");
                return Err(err);
            }
        };
        if token_amount == 0 {
            warn!(mint = %signal.mint, "no token balance to sell");
            let _ = self.positions.remove(&signal.mint).await;
            return Ok(TradeOutcome::Skipped {
                reason: "no token balance to sell".to_string(),
            });
        }

        info!(
            token = %signal.token_name,
            mint = %signal.mint,
            amount = token_amount,
            "⚡ FAST SELL"
        );

        if self.sim_active() {
            timer.mark_quote_done();
            timer.mark_sign_done();
            timer.mark_send_done();
            let tx_sig = format!("SIM_SELL_{}", signal.token_name);
            self.record_sell_trade(&signal, &tx_sig).await;
            let _ = self.positions.remove(&signal.mint).await;
            info!(tx_sig = %tx_sig, "⚡ SIMULATION SELL EXECUTED");
            return Ok(TradeOutcome::Simulated { signature: tx_sig });
        }

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff_ms = RETRY_BASE_BACKOFF_MS * (1 << (attempt - 1));
                warn!(attempt = attempt + 1, backoff_ms, "retrying sell...");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            let swap_tx = match self
                .jupiter
                .get_swap_transaction(&signal.mint, SOL_MINT, self.wallet.address(), token_amount)
                .await
            {
                Ok(tx) => tx,
                Err(err) => {
                    error!(error = %human_error_with_action(&err), "⚡ AGGREGATOR FAILED");
                    last_err = Some(err);
                    continue;
                }
            };
            timer.mark_quote_done();

            let signed_tx = match self.tx_builder.sign_serialized_transaction(&swap_tx) {
                Ok(tx) => tx,
                Err(err) => {
                    error!(error = %human_error(&err), "⚡ SIGN FAILED");
                    last_err = Some(err);
                    continue;
                }
            };
            timer.mark_sign_done();

            let send_result = self.rpc.send_transaction(&signed_tx, true).await;
            timer.mark_send_done();

            let (parse, resolve, quote, sign, send) = timer.breakdown();
            self.metrics
                .record_trade(send_result.is_ok(), parse, resolve, quote, sign, send);

            let tx_sig = match send_result {
                Ok(sig) => sig,
                Err(err) => {
                    let err = anyhow!(err);
                    error!(error = %human_error_with_action(&err), "⚡ TX SEND FAILED");
                    last_err = Some(err);
                    continue;
                }
            };

            info!(tx_sig = %tx_sig, total_ms = timer.total_ms(), "⚡ SELL SENT");
            self.record_sell_trade(&signal, &tx_sig).await;

            if let Some(monitor) = self.wallet_monitor() {
                let positions = Arc::clone(&self.positions);
                let mint = signal.mint.clone();
                let sig = tx_sig.clone();
                let sig_for_cb = sig.clone();
                tokio::spawn(async move {
                    let result = monitor
                        .wait_for_confirmation(&sig, move |conf| {
                            if conf.confirmed {
                                info!(sig = %sig_for_cb, "✅ SELL CONFIRMED via WebSocket");
                                tokio::spawn(async move {
                                    let _ = positions.remove(&mint).await;
                                });
                            } else {
                                error!(sig = %sig_for_cb, err = %conf.error, "❌ SELL FAILED via WebSocket");
                            }
                        })
                        .await;
                    if let Err(err) = result {
                        warn!(error = %err, "sell confirmation subscription failed");
                    }
                });
            } else {
                let executor = Arc::clone(self);
                let mint = signal.mint.clone();
                tokio::spawn(async move {
                    let _ = executor.positions.remove(&mint).await;
                    if !executor.sim_active() {
                        let _ = executor.balance.refresh().await;
                    }
                });
            }

            return Ok(TradeOutcome::Sent { signature: tx_sig });
        }

        Err(last_err.unwrap_or_else(|| anyhow!("sell failed with no attempts")))
    }

    async fn record_sell_trade(&self, signal: &Signal, tx_sig: &str) {
        let (Some(db), Some(position)) = (self.db.as_ref(), self.positions.get(&signal.mint))
        else {
            return;
        };

        let snapshot = position.snapshot();
        let duration = position.age().num_seconds();
        let result = db
            .insert_trade(&TradeRow {
                id: 0,
                mint: signal.mint.clone(),
                token_name: signal.token_name.clone(),
                side: "SELL".to_string(),
                amount_sol: snapshot.size_sol,
                entry_value: snapshot.entry_value,
                exit_value: snapshot.current_value,
                pnl: snapshot.pnl_percent,
                duration,
                entry_tx_sig: snapshot.entry_tx_sig,
                exit_tx_sig: tx_sig.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            })
            .await;
        if let Err(err) = result {
            warn!(error = %err, "failed to record SELL trade");
        }
    }

    /// Sum of the wallet's holdings of `mint` across both token programs.
    async fn get_token_balance(&self, mint: &str) -> Result<u64> {
        if self.sim_active() {
            return Ok(SIM_TOKEN_BALANCE);
        }

        let accounts = self.rpc.get_all_token_accounts(self.wallet.address()).await?;
        Ok(accounts
            .iter()
            .filter(|a| a.mint == mint)
            .map(|a| a.amount)
            .sum())
    }

    // ---- Administrative exits ----------------------------------------------

    /// Sells every active position, staggered to dodge rate limits.
    pub async fn sell_all_positions(self: &Arc<Self>) {
        let positions = self.positions.get_all();
        warn!(count = positions.len(), "🚨 selling ALL positions");

        for position in positions {
            let executor = Arc::clone(self);
            let mint = position.mint.clone();
            tokio::spawn(async move {
                if let Err(err) = executor.force_close(&mint).await {
                    error!(mint = %mint, error = %err, "failed to force close");
                }
            });
            tokio::time::sleep(SELL_ALL_STAGGER).await;
        }
    }

    pub async fn force_close(self: &Arc<Self>, mint: &str) -> Result<TradeOutcome> {
        let token_name = self
            .positions
            .get(mint)
            .map(|p| p.token_name.clone())
            .unwrap_or_else(|| "FORCE_CLOSE".to_string());

        let signal = Signal {
            token_name,
            mint: mint.to_string(),
            signal_type: SignalType::Exit,
            value: 0.0,
            unit: "X".to_string(),
            msg_id: 0,
            timestamp: 0,
        };
        self.execute_sell_fast(signal, TradeTimer::new()).await
    }

    // ---- Monitor loop ------------------------------------------------------

    pub fn start_monitoring(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!("starting active trade monitor (fast mode)...");
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("trade monitor stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        executor.monitor_positions().await;
                    }
                }
            }
        });
    }

    /// One monitoring sweep over all live positions, bounded parallelism.
    pub async fn monitor_positions(self: &Arc<Self>) {
        let positions = self.positions.get_all();
        if positions.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(MONITOR_CONCURRENCY));
        let mut handles = Vec::with_capacity(positions.len());

        for position in positions {
            // A healthy WebSocket makes this poll a no-op.
            if let Some(age) = position.last_update_age() {
                if age < WS_FRESHNESS {
                    continue;
                }
            }

            let executor = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                executor.check_position(position).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn check_position(self: &Arc<Self>, position: Arc<Position>) {
        let trading = self.cfg.trading();

        // A PENDING position past its TTL means the buy never confirmed.
        if position.is_pending() {
            if position.age().num_seconds() as u64 > PENDING_POSITION_TTL.as_secs() {
                warn!(
                    token = %position.token_name,
                    age_s = position.age().num_seconds(),
                    "removing stale PENDING position (buy likely failed)"
                );
                let _ = self.positions.remove(&position.mint).await;
            }
            return;
        }

        let balance = match self.get_token_balance(&position.mint).await {
            Ok(balance) => balance,
            Err(err) => {
                debug!(mint = %position.mint, error = %err, "failed to get balance");
                return;
            }
        };

        if balance == 0 {
            // Sold externally or the buy silently failed.
            if !position.is_failed() {
                warn!(token = %position.token_name, "position has 0 tokens - marking as failed");
                position.mark_failed();
            }
            if position.age().num_seconds() as u64 > FAILED_POSITION_TTL.as_secs() {
                let _ = self.positions.remove(&position.mint).await;
            }
            return;
        }

        let quote = match self
            .jupiter
            .get_quote(&position.mint, SOL_MINT, balance)
            .await
        {
            Ok(quote) => quote,
            Err(err) => {
                debug!(mint = %position.mint, error = %err, "monitor quote failed");
                return;
            }
        };

        let out_amount: u64 = quote.out_amount.parse().unwrap_or(0);
        let current_value_sol = out_amount as f64 / 1e9;
        let multiple = position.update_stats(current_value_sol, balance);

        if let Some(price_feed) = self.price_feed() {
            if balance > 0 {
                price_feed.set_price(&position.mint, current_value_sol / balance as f64);
            }
        }

        if multiple >= trading.take_profit_multiple {
            if !position.reached_target() {
                position.set_reached_target(true);
                self.increment_target_hit(&position.mint);
                info!(token = %position.token_name, multiple, "reached target! marked as win");
            }

            if trading.auto_trading_enabled {
                info!(token = %position.token_name, "triggering take-profit sell");
                let executor = Arc::clone(self);
                let signal = Signal {
                    token_name: position.token_name.clone(),
                    mint: position.mint.clone(),
                    signal_type: SignalType::Exit,
                    value: multiple,
                    unit: "X".to_string(),
                    msg_id: 0,
                    timestamp: 0,
                };
                tokio::spawn(async move {
                    if let Err(err) = executor.execute_sell_fast(signal, TradeTimer::new()).await {
                        error!(error = %human_error_with_action(&err), "take-profit sell failed");
                    }
                });
            }
        }

        if trading.partial_profit_percent > 0.0
            && trading.partial_profit_multiple > 1.0
            && multiple >= trading.partial_profit_multiple
            && !position.partial_sold()
        {
            info!(token = %position.token_name, multiple, "triggering partial profit take");
            self.execute_partial_sell(&position, trading.partial_profit_percent)
                .await;
        }

        if trading.max_hold_minutes > 0
            && position.age().num_minutes() as u64 > trading.max_hold_minutes
        {
            info!(token = %position.token_name, "max hold time reached, selling all");
            let executor = Arc::clone(self);
            let signal = Signal {
                token_name: position.token_name.clone(),
                mint: position.mint.clone(),
                signal_type: SignalType::Exit,
                value: multiple,
                unit: "X".to_string(),
                msg_id: 0,
                timestamp: 0,
            };
            tokio::spawn(async move {
                if let Err(err) = executor.execute_sell_fast(signal, TradeTimer::new()).await {
                    error!(error = %human_error_with_action(&err), "time-based sell failed");
                }
            });
        }
    }

    /// Sells `percent` of the balance, keeping the original cost basis.
    async fn execute_partial_sell(self: &Arc<Self>, position: &Arc<Position>, percent: f64) {
        let Ok(balance) = self.get_token_balance(&position.mint).await else {
            return;
        };
        let sell_amount = (balance as f64 * percent / 100.0) as u64;
        if sell_amount == 0 {
            return;
        }

        info!(token = %position.token_name, percent, "selling part of position...");

        if self.sim_active() {
            position.set_partial_sold(true);
            info!("partial sell simulated ✓");
            return;
        }

        let swap_tx = match self
            .jupiter
            .get_swap_transaction(&position.mint, SOL_MINT, self.wallet.address(), sell_amount)
            .await
        {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %human_error_with_action(&err), "failed partial swap tx");
                return;
            }
        };

        let Ok(signed_tx) = self.tx_builder.sign_serialized_transaction(&swap_tx) else {
            return;
        };

        match self.rpc.send_transaction(&signed_tx, true).await {
            Ok(tx_sig) => {
                position.set_partial_sold(true);
                info!(tx_sig = %tx_sig, "partial sell executed ✓");
            }
            Err(err) => {
                let err = anyhow!(err);
                error!(error = %human_error_with_action(&err), "failed partial sell send");
            }
        }
    }

    // ---- Dedup and counters -----------------------------------------------

    fn is_duplicate_signal(&self, msg_id: i64) -> bool {
        self.recent_signals
            .get(&msg_id)
            .map(|seen| seen.elapsed() < DUPLICATE_SIGNAL_TTL)
            .unwrap_or(false)
    }

    fn mark_signal_seen(&self, msg_id: i64) {
        self.recent_signals.insert(msg_id, Instant::now());

        // Prune on every write so the maps stay bounded.
        self.recent_signals
            .retain(|_, seen| seen.elapsed() <= SIGNAL_CLEANUP_TTL);
        self.recent_mints
            .retain(|_, seen| seen.elapsed() <= SIGNAL_CLEANUP_TTL);

        // Only unique-counter accuracy is affected by these resets, never
        // trading safety.
        if self.recent_mints.len() > SEEN_TARGET_MAX {
            self.recent_mints.clear();
            debug!("cleared recent-mints map (size exceeded {})", SEEN_TARGET_MAX);
        }
        if self.seen_target.len() > SEEN_TARGET_MAX {
            self.seen_target.clear();
            debug!("cleared seen-target map (size exceeded {})", SEEN_TARGET_MAX);
        }
    }

    fn increment_entry_signals(&self, mint: &str) {
        if !self.recent_mints.contains_key(mint) {
            self.total_entry_signals.fetch_add(1, Ordering::Relaxed);
        }
        self.recent_mints.insert(mint.to_string(), Instant::now());
    }

    fn increment_target_hit(&self, mint: &str) {
        if self.seen_target.insert(mint.to_string(), ()).is_none() {
            self.reached_target_hits.fetch_add(1, Ordering::Relaxed);
        }
    }
}
