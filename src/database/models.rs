/// Row types for the persistence tables

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PositionRow {
    pub mint: String,
    pub token_name: String,
    /// SOL committed at entry.
    pub size: f64,
    pub entry_value: f64,
    pub entry_unit: String,
    /// Unix seconds.
    pub entry_time: i64,
    pub entry_tx_sig: String,
    pub msg_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub mint: String,
    pub token_name: String,
    /// "BUY" or "SELL".
    pub side: String,
    pub amount_sol: f64,
    pub entry_value: f64,
    pub exit_value: f64,
    pub pnl: f64,
    /// Seconds held.
    pub duration: i64,
    pub entry_tx_sig: String,
    pub exit_tx_sig: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SignalRow {
    pub id: i64,
    pub token_name: String,
    pub value: f64,
    pub unit: String,
    pub signal_type: String,
    pub msg_id: i64,
    pub timestamp: i64,
}
