/// SQLite persistence for positions, trades and signals

pub mod models;

pub use models::{PositionRow, SignalRow, TradeRow};

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub struct Db {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS positions (
    mint TEXT PRIMARY KEY,
    token_name TEXT NOT NULL,
    size REAL NOT NULL,
    entry_value REAL NOT NULL,
    entry_unit TEXT NOT NULL,
    entry_time INTEGER NOT NULL,
    entry_tx_sig TEXT NOT NULL,
    msg_id INTEGER
)"#,
    r#"CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mint TEXT NOT NULL,
    token_name TEXT NOT NULL,
    side TEXT NOT NULL DEFAULT 'SELL',
    amount_sol REAL NOT NULL DEFAULT 0,
    entry_value REAL NOT NULL,
    exit_value REAL NOT NULL,
    pnl REAL NOT NULL,
    duration INTEGER NOT NULL,
    entry_tx_sig TEXT NOT NULL,
    exit_tx_sig TEXT NOT NULL,
    timestamp INTEGER NOT NULL
)"#,
    r#"CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_name TEXT NOT NULL,
    value REAL NOT NULL,
    unit TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    msg_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON signals(timestamp)",
];

impl Db {
    /// Opens (or creates) the database and applies the schema. `path` may
    /// be a filesystem path or a full `sqlite:` URL.
    pub async fn connect(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path.contains(":memory:");

        let options = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        })
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

        // A shared in-memory database only exists on one connection.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!(path = %path, "database initialized");
        Ok(Self { pool })
    }

    pub async fn insert_position(&self, p: &PositionRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO positions
               (mint, token_name, size, entry_value, entry_unit, entry_time, entry_tx_sig, msg_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&p.mint)
        .bind(&p.token_name)
        .bind(p.size)
        .bind(p.entry_value)
        .bind(&p.entry_unit)
        .bind(p.entry_time)
        .bind(&p.entry_tx_sig)
        .bind(p.msg_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_position(&self, mint: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM positions WHERE mint = ?")
            .bind(mint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_position(&self, mint: &str) -> Result<Option<PositionRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PositionRow>(
            r#"SELECT mint, token_name, size, entry_value, entry_unit, entry_time, entry_tx_sig, msg_id
               FROM positions WHERE mint = ?"#,
        )
        .bind(mint)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_all_positions(&self) -> Result<Vec<PositionRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, PositionRow>(
            r#"SELECT mint, token_name, size, entry_value, entry_unit, entry_time, entry_tx_sig, msg_id
               FROM positions"#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn insert_trade(&self, t: &TradeRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"INSERT INTO trades
               (mint, token_name, side, amount_sol, entry_value, exit_value, pnl, duration,
                entry_tx_sig, exit_tx_sig, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&t.mint)
        .bind(&t.token_name)
        .bind(&t.side)
        .bind(t.amount_sol)
        .bind(t.entry_value)
        .bind(t.exit_value)
        .bind(t.pnl)
        .bind(t.duration)
        .bind(&t.entry_tx_sig)
        .bind(&t.exit_tx_sig)
        .bind(t.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, TradeRow>(
            r#"SELECT id, mint, token_name, side, amount_sol, entry_value, exit_value, pnl,
                      duration, entry_tx_sig, exit_tx_sig, timestamp
               FROM trades ORDER BY timestamp DESC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn insert_signal(&self, s: &SignalRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"INSERT INTO signals (token_name, value, unit, signal_type, msg_id, timestamp)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&s.token_name)
        .bind(s.value)
        .bind(&s.unit)
        .bind(&s.signal_type)
        .bind(s.msg_id)
        .bind(s.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_signals(&self, limit: i64) -> Result<Vec<SignalRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, SignalRow>(
            r#"SELECT id, token_name, value, unit, signal_type, msg_id, timestamp
               FROM signals ORDER BY timestamp DESC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Aggregate (total trades, win rate percent, total pnl).
    pub async fn trading_stats(&self) -> Result<(i64, f64, f64), DatabaseError> {
        let (total, wins, total_pnl): (i64, Option<i64>, Option<f64>) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      SUM(CASE WHEN pnl > 0 THEN 1 ELSE 0 END),
                      COALESCE(SUM(pnl), 0)
               FROM trades"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let win_rate = if total > 0 {
            wins.unwrap_or(0) as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Ok((total, win_rate, total_pnl.unwrap_or(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Db {
        Db::connect("sqlite::memory:").await.unwrap()
    }

    fn position_row(mint: &str) -> PositionRow {
        PositionRow {
            mint: mint.to_string(),
            token_name: "BONK".to_string(),
            size: 0.2,
            entry_value: 57.0,
            entry_unit: "%".to_string(),
            entry_time: 1_700_000_000,
            entry_tx_sig: "PENDING".to_string(),
            msg_id: 1,
        }
    }

    #[tokio::test]
    async fn test_position_upsert_and_delete() {
        let db = test_db().await;

        db.insert_position(&position_row("mint1")).await.unwrap();
        let got = db.get_position("mint1").await.unwrap().unwrap();
        assert_eq!(got.token_name, "BONK");
        assert_eq!(got.entry_tx_sig, "PENDING");

        // Replacing the same mint upgrades the row in place.
        let mut upgraded = position_row("mint1");
        upgraded.entry_tx_sig = "realSig123".to_string();
        db.insert_position(&upgraded).await.unwrap();

        let all = db.get_all_positions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entry_tx_sig, "realSig123");

        db.delete_position("mint1").await.unwrap();
        assert!(db.get_position("mint1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trades_roundtrip_and_stats() {
        let db = test_db().await;

        let trade = TradeRow {
            id: 0,
            mint: "mint1".to_string(),
            token_name: "BONK".to_string(),
            side: "SELL".to_string(),
            amount_sol: 0.2,
            entry_value: 57.0,
            exit_value: 140.0,
            pnl: 145.6,
            duration: 360,
            entry_tx_sig: "entrySig".to_string(),
            exit_tx_sig: "exitSig".to_string(),
            timestamp: 1_700_000_100,
        };
        db.insert_trade(&trade).await.unwrap();

        let mut loss = trade.clone();
        loss.pnl = -40.0;
        loss.timestamp = 1_700_000_200;
        db.insert_trade(&loss).await.unwrap();

        let recent = db.recent_trades(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        // Most recent first.
        assert_eq!(recent[0].timestamp, 1_700_000_200);

        let (total, win_rate, total_pnl) = db.trading_stats().await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(win_rate, 50.0);
        assert!((total_pnl - 105.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let db = test_db().await;
        let (total, win_rate, total_pnl) = db.trading_stats().await.unwrap();
        assert_eq!(total, 0);
        assert_eq!(win_rate, 0.0);
        assert_eq!(total_pnl, 0.0);
    }

    #[tokio::test]
    async fn test_signals_roundtrip() {
        let db = test_db().await;

        db.insert_signal(&SignalRow {
            id: 0,
            token_name: "BONK".to_string(),
            value: 57.0,
            unit: "%".to_string(),
            signal_type: "ENTRY".to_string(),
            msg_id: 77,
            timestamp: 1_700_000_000,
        })
        .await
        .unwrap();

        let signals = db.recent_signals(5).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].msg_id, 77);
        assert_eq!(signals[0].signal_type, "ENTRY");
    }
}
