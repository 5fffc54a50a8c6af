/// Position tracking with a durable SQLite mirror
///
/// At most one position exists per mint. New buys go in with the PENDING
/// sentinel before the transaction is sent, which is what blocks a second
/// concurrent buy for the same mint. Mutable fields live behind a
/// per-position lock so the monitor loop and WebSocket callbacks can
/// update them while the UI reads snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::database::{Db, PositionRow};

pub const PENDING_TX_SIG: &str = "PENDING";
pub const FAILED_TX_SIG: &str = "FAILED";

/// Persisted positions older than this are dropped on startup.
const STALE_POSITION_HOURS: i64 = 24;
/// Persisted PENDING positions older than this likely never filled.
const STALE_PENDING_MINUTES: i64 = 10;

#[derive(Debug)]
struct PositionState {
    entry_tx_sig: String,
    pool_addr: Option<String>,
    current_value: f64,
    pnl_sol: f64,
    pnl_percent: f64,
    reached_target: bool,
    partial_sold: bool,
    token_balance: u64,
    last_update: Option<Instant>,
}

#[derive(Debug)]
pub struct Position {
    pub mint: String,
    pub token_name: String,
    /// SOL committed at entry.
    pub size_sol: f64,
    pub entry_value: f64,
    pub entry_unit: String,
    pub entry_time: DateTime<Utc>,
    pub msg_id: i64,
    state: RwLock<PositionState>,
}

/// Immutable copy of a position for display and logging. The live record
/// carries a lock, so it cannot be handed out directly.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub mint: String,
    pub token_name: String,
    pub size_sol: f64,
    pub entry_value: f64,
    pub entry_unit: String,
    pub entry_time: DateTime<Utc>,
    pub entry_tx_sig: String,
    pub msg_id: i64,
    pub pool_addr: Option<String>,
    pub current_value: f64,
    pub pnl_sol: f64,
    pub pnl_percent: f64,
    pub reached_target: bool,
    pub partial_sold: bool,
    pub token_balance: u64,
}

impl Position {
    pub fn new(
        mint: String,
        token_name: String,
        size_sol: f64,
        entry_value: f64,
        entry_unit: String,
        msg_id: i64,
        entry_tx_sig: String,
    ) -> Self {
        Self {
            mint,
            token_name,
            size_sol,
            entry_value,
            entry_unit,
            entry_time: Utc::now(),
            msg_id,
            state: RwLock::new(PositionState {
                entry_tx_sig,
                pool_addr: None,
                current_value: entry_value,
                pnl_sol: 0.0,
                pnl_percent: 0.0,
                reached_target: false,
                partial_sold: false,
                token_balance: 0,
                last_update: None,
            }),
        }
    }

    pub(crate) fn from_row(row: &PositionRow) -> Self {
        let entry_time = DateTime::from_timestamp(row.entry_time, 0).unwrap_or_else(Utc::now);
        let position = Self::new(
            row.mint.clone(),
            row.token_name.clone(),
            row.size,
            row.entry_value,
            row.entry_unit.clone(),
            row.msg_id,
            row.entry_tx_sig.clone(),
        );
        Self {
            entry_time,
            ..position
        }
    }

    pub fn to_row(&self) -> PositionRow {
        PositionRow {
            mint: self.mint.clone(),
            token_name: self.token_name.clone(),
            size: self.size_sol,
            entry_value: self.entry_value,
            entry_unit: self.entry_unit.clone(),
            entry_time: self.entry_time.timestamp(),
            entry_tx_sig: self.entry_tx_sig(),
            msg_id: self.msg_id,
        }
    }

    /// Applies a fresh valuation and returns the PnL multiple
    /// (current value over entry size).
    pub fn update_stats(&self, current_val_sol: f64, token_balance: u64) -> f64 {
        let mut state = self.state.write().unwrap();
        state.token_balance = token_balance;
        state.pnl_sol = current_val_sol - self.size_sol;
        state.last_update = Some(Instant::now());

        if self.size_sol <= 0.0 {
            return 0.0;
        }

        let multiple = current_val_sol / self.size_sol;
        state.pnl_percent = (multiple - 1.0) * 100.0;
        // Keep current_value in the entry signal's units for display.
        state.current_value = multiple * self.entry_value;
        multiple
    }

    /// Refreshes display stats from a signal magnitude without a quote.
    /// Exit multiples are converted to percent terms.
    pub fn set_stats_from_signal(&self, value: f64, unit: &str) {
        let real_value = if unit == "X" { value * 100.0 } else { value };

        let mut state = self.state.write().unwrap();
        state.current_value = real_value;
        if self.entry_value > 0.0 {
            state.pnl_percent = (real_value / self.entry_value - 1.0) * 100.0;
        }
        state.last_update = Some(Instant::now());
    }

    pub fn entry_tx_sig(&self) -> String {
        self.state.read().unwrap().entry_tx_sig.clone()
    }

    pub fn set_entry_tx_sig(&self, sig: &str) {
        self.state.write().unwrap().entry_tx_sig = sig.to_string();
    }

    pub fn is_pending(&self) -> bool {
        self.state.read().unwrap().entry_tx_sig == PENDING_TX_SIG
    }

    pub fn is_failed(&self) -> bool {
        self.state.read().unwrap().entry_tx_sig == FAILED_TX_SIG
    }

    pub fn mark_failed(&self) {
        let mut state = self.state.write().unwrap();
        state.entry_tx_sig = FAILED_TX_SIG.to_string();
        state.pnl_percent = -100.0;
    }

    pub fn reached_target(&self) -> bool {
        self.state.read().unwrap().reached_target
    }

    pub fn set_reached_target(&self, reached: bool) {
        self.state.write().unwrap().reached_target = reached;
    }

    pub fn partial_sold(&self) -> bool {
        self.state.read().unwrap().partial_sold
    }

    pub fn set_partial_sold(&self, sold: bool) {
        self.state.write().unwrap().partial_sold = sold;
    }

    pub fn token_balance(&self) -> u64 {
        self.state.read().unwrap().token_balance
    }

    pub fn set_token_balance(&self, balance: u64) {
        let mut state = self.state.write().unwrap();
        state.token_balance = balance;
        state.last_update = Some(Instant::now());
    }

    pub fn pool_addr(&self) -> Option<String> {
        self.state.read().unwrap().pool_addr.clone()
    }

    pub fn set_pool_addr(&self, pool_addr: String) {
        self.state.write().unwrap().pool_addr = Some(pool_addr);
    }

    /// Time since the last stats update, if any.
    pub fn last_update_age(&self) -> Option<std::time::Duration> {
        self.state.read().unwrap().last_update.map(|t| t.elapsed())
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.entry_time)
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        let state = self.state.read().unwrap();
        PositionSnapshot {
            mint: self.mint.clone(),
            token_name: self.token_name.clone(),
            size_sol: self.size_sol,
            entry_value: self.entry_value,
            entry_unit: self.entry_unit.clone(),
            entry_time: self.entry_time,
            entry_tx_sig: state.entry_tx_sig.clone(),
            msg_id: self.msg_id,
            pool_addr: state.pool_addr.clone(),
            current_value: state.current_value,
            pnl_sol: state.pnl_sol,
            pnl_percent: state.pnl_percent,
            reached_target: state.reached_target,
            partial_sold: state.partial_sold,
            token_balance: state.token_balance,
        }
    }
}

pub struct PositionTracker {
    positions: RwLock<HashMap<String, Arc<Position>>>,
    db: Option<Arc<Db>>,
    max_positions: AtomicUsize,
}

impl PositionTracker {
    pub fn new(db: Option<Arc<Db>>, max_positions: usize) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            db,
            max_positions: AtomicUsize::new(max_positions),
        }
    }

    /// Restores persisted positions, skipping anything stale enough that
    /// the market has moved on: entries older than a day, and PENDING
    /// entries whose buy almost certainly never confirmed.
    pub async fn load(db: Option<Arc<Db>>, max_positions: usize) -> Self {
        let tracker = Self::new(db, max_positions);

        let Some(db) = tracker.db.as_ref() else {
            return tracker;
        };

        let rows = match db.get_all_positions().await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "failed to load positions from DB");
                return tracker;
            }
        };

        let mut loaded = 0usize;
        let mut stale = 0usize;
        {
            let mut positions = tracker.positions.write().unwrap();
            for row in &rows {
                let entry_time =
                    DateTime::from_timestamp(row.entry_time, 0).unwrap_or_else(Utc::now);
                let age = Utc::now().signed_duration_since(entry_time);

                if age.num_hours() >= STALE_POSITION_HOURS {
                    stale += 1;
                    debug!(token = %row.token_name, "skipping stale position from DB");
                    continue;
                }
                if row.entry_tx_sig == PENDING_TX_SIG
                    && age.num_minutes() >= STALE_PENDING_MINUTES
                {
                    stale += 1;
                    debug!(token = %row.token_name, "skipping old PENDING position");
                    continue;
                }

                positions.insert(row.mint.clone(), Arc::new(Position::from_row(row)));
                loaded += 1;
            }
        }

        if stale > 0 {
            warn!(stale, loaded, "cleaned up stale positions from DB");
        } else {
            info!(count = loaded, "loaded positions from DB");
        }
        tracker
    }

    /// Inserts or replaces, then mirrors to the sink.
    pub async fn add(&self, position: Arc<Position>) -> Result<()> {
        let row = position.to_row();
        {
            let mut positions = self.positions.write().unwrap();
            positions.insert(position.mint.clone(), position);
        }

        if let Some(db) = &self.db {
            db.insert_position(&row).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, mint: &str) -> Option<Arc<Position>> {
        let removed = {
            let mut positions = self.positions.write().unwrap();
            positions.remove(mint)
        };

        if let Some(db) = &self.db {
            if let Err(err) = db.delete_position(mint).await {
                warn!(mint = %mint, error = %err, "failed to delete position from DB");
            }
        }
        removed
    }

    pub fn has(&self, mint: &str) -> bool {
        self.positions.read().unwrap().contains_key(mint)
    }

    pub fn get(&self, mint: &str) -> Option<Arc<Position>> {
        self.positions.read().unwrap().get(mint).cloned()
    }

    pub fn count(&self) -> usize {
        self.positions.read().unwrap().len()
    }

    pub fn can_open(&self) -> bool {
        self.count() < self.max_positions.load(Ordering::Relaxed)
    }

    pub fn set_max_positions(&self, max: usize) {
        self.max_positions.store(max, Ordering::Relaxed);
    }

    /// Live references, for in-process mutation by the monitor.
    pub fn get_all(&self) -> Vec<Arc<Position>> {
        self.positions.read().unwrap().values().cloned().collect()
    }

    /// Detached copies for the UI.
    pub fn get_all_snapshots(&self) -> Vec<PositionSnapshot> {
        self.positions
            .read()
            .unwrap()
            .values()
            .map(|p| p.snapshot())
            .collect()
    }

    /// Removes everything from memory and the sink. Does not sell.
    pub async fn clear_all(&self) {
        let mints: Vec<String> = {
            let mut positions = self.positions.write().unwrap();
            let mints = positions.keys().cloned().collect();
            positions.clear();
            mints
        };

        if let Some(db) = &self.db {
            for mint in &mints {
                if let Err(err) = db.delete_position(mint).await {
                    warn!(mint = %mint, error = %err, "failed to delete position from DB");
                }
            }
        }
        info!("all positions cleared");
    }
}
