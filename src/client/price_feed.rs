/// Real-time price and balance tracking for held tokens
///
/// Each tracked mint gets an AMM pool subscription (activity signal) and a
/// token account subscription (balance). Pool account bytes are provider
/// and venue specific, so a pool update carries the cached last price
/// rather than a decoded one; prices are cached here after each quote.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::websocket::WsClient;

/// Raydium AMM program, the dominant pool venue for new listings.
pub const RAYDIUM_AMM_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

#[derive(Debug, Clone, Default)]
pub struct PriceUpdate {
    pub mint: String,
    /// SOL per token; zero when no cached price exists yet.
    pub price_sol: f64,
    /// Wallet's balance of this token in raw units.
    pub token_balance: u64,
    pub slot: u64,
}

/// AMM pool state for price derivation.
#[derive(Debug, Clone, Copy)]
pub struct PoolReserves {
    pub base_reserve: u64,
    pub quote_reserve: u64,
    pub base_decimals: u32,
    pub quote_decimals: u32,
}

type PriceHandler = Arc<dyn Fn(PriceUpdate) + Send + Sync>;

pub struct PriceFeed {
    client: Arc<WsClient>,

    /// mint -> pool subscription id
    pool_subs: DashMap<String, u64>,
    /// mint -> token account subscription id
    token_subs: DashMap<String, u64>,
    /// mint -> pool address
    pool_addrs: DashMap<String, String>,
    /// mint -> last known price in SOL
    prices: DashMap<String, f64>,

    handlers: RwLock<Vec<PriceHandler>>,
}

impl PriceFeed {
    pub fn new(client: Arc<WsClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            pool_subs: DashMap::new(),
            token_subs: DashMap::new(),
            pool_addrs: DashMap::new(),
            prices: DashMap::new(),
            handlers: RwLock::new(Vec::new()),
        })
    }

    pub fn on_price_update(&self, handler: impl Fn(PriceUpdate) + Send + Sync + 'static) {
        self.handlers.write().unwrap().push(Arc::new(handler));
    }

    /// Starts tracking a token through its AMM pool account.
    pub async fn track_token(self: &Arc<Self>, mint: &str, pool_addr: &str) -> Result<()> {
        if self.pool_subs.contains_key(mint) {
            return Ok(());
        }

        self.pool_addrs
            .insert(mint.to_string(), pool_addr.to_string());

        let feed = Arc::clone(self);
        let mint_owned = mint.to_string();
        let sub_id = self
            .client
            .account_subscribe(pool_addr, move |data| {
                feed.handle_pool_update(&mint_owned, data);
            })
            .await
            .context("subscribe to pool")?;
        self.pool_subs.insert(mint.to_string(), sub_id);

        info!(
            mint = %truncate(mint, 8),
            pool = %truncate(pool_addr, 8),
            sub_id,
            "tracking token via AMM pool"
        );
        Ok(())
    }

    /// Subscribes to the wallet's token account for live balance changes.
    pub async fn track_token_account(
        self: &Arc<Self>,
        mint: &str,
        token_account_addr: &str,
    ) -> Result<()> {
        if self.token_subs.contains_key(mint) {
            return Ok(());
        }

        let feed = Arc::clone(self);
        let mint_owned = mint.to_string();
        let sub_id = self
            .client
            .account_subscribe(token_account_addr, move |data| {
                feed.handle_token_account_update(&mint_owned, data);
            })
            .await
            .context("subscribe to token account")?;
        self.token_subs.insert(mint.to_string(), sub_id);

        debug!(mint = %truncate(mint, 8), sub_id, "tracking token account balance");
        Ok(())
    }

    pub async fn untrack_token(&self, mint: &str) {
        if let Some((_, sub_id)) = self.pool_subs.remove(mint) {
            self.client.unsubscribe("accountUnsubscribe", sub_id).await;
        }
        if let Some((_, sub_id)) = self.token_subs.remove(mint) {
            self.client.unsubscribe("accountUnsubscribe", sub_id).await;
        }
        self.pool_addrs.remove(mint);
        self.prices.remove(mint);
    }

    /// Pool account changed: emit an update with whatever price we last
    /// computed. Decoding venue-specific pool bytes is deliberately left
    /// out; the monitor loop re-quotes on activity.
    fn handle_pool_update(&self, mint: &str, data: Value) {
        let slot = slot_of(&data);

        let update = PriceUpdate {
            mint: mint.to_string(),
            price_sol: self.price(mint),
            token_balance: 0,
            slot,
        };
        self.notify(update);
    }

    fn handle_token_account_update(&self, mint: &str, data: Value) {
        let slot = slot_of(&data);
        let amount = data
            .pointer("/value/data/parsed/info/tokenAmount/amount")
            .and_then(Value::as_str)
            .map(|s| s.parse().unwrap_or(0));

        let Some(token_balance) = amount else {
            warn!(mint = %truncate(mint, 8), "token account update without amount");
            return;
        };

        let update = PriceUpdate {
            mint: mint.to_string(),
            price_sol: self.price(mint),
            token_balance,
            slot,
        };
        self.notify(update);
    }

    /// Caches a price computed elsewhere (a quote, usually).
    pub fn set_price(&self, mint: &str, price_sol: f64) {
        self.prices.insert(mint.to_string(), price_sol);
    }

    pub fn price(&self, mint: &str) -> f64 {
        self.prices.get(mint).map(|p| *p).unwrap_or(0.0)
    }

    pub fn tracked_count(&self) -> usize {
        self.pool_subs.len()
    }

    fn notify(&self, update: PriceUpdate) {
        let handlers = self.handlers.read().unwrap().clone();
        for handler in handlers {
            handler(update.clone());
        }
    }
}

/// Token price in quote units from AMM reserves.
pub fn calculate_price_from_reserves(reserves: PoolReserves) -> f64 {
    if reserves.base_reserve == 0 {
        return 0.0;
    }
    let base = reserves.base_reserve as f64 / 10f64.powi(reserves.base_decimals as i32);
    let quote = reserves.quote_reserve as f64 / 10f64.powi(reserves.quote_decimals as i32);
    quote / base
}

fn slot_of(data: &Value) -> u64 {
    data.pointer("/context/slot").and_then(Value::as_u64).unwrap_or(0)
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn test_feed() -> Arc<PriceFeed> {
        let client = WsClient::new(
            "wss://example.invalid/ws".to_string(),
            Duration::from_millis(100),
            Duration::from_secs(15),
        );
        PriceFeed::new(client)
    }

    #[test]
    fn test_price_from_reserves() {
        // 1000 tokens (6 decimals) against 50 SOL (9 decimals).
        let price = calculate_price_from_reserves(PoolReserves {
            base_reserve: 1_000_000_000,
            quote_reserve: 50_000_000_000,
            base_decimals: 6,
            quote_decimals: 9,
        });
        assert!((price - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_price_from_empty_pool_is_zero() {
        let price = calculate_price_from_reserves(PoolReserves {
            base_reserve: 0,
            quote_reserve: 1_000,
            base_decimals: 6,
            quote_decimals: 9,
        });
        assert_eq!(price, 0.0);
    }

    #[test]
    fn test_pool_update_emits_cached_price() {
        let feed = test_feed();
        feed.set_price("mint1", 0.0025);

        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        feed.on_price_update(move |update| {
            seen_clone.write().unwrap().push(update);
        });

        feed.handle_pool_update("mint1", json!({"context": {"slot": 77}, "value": {}}));

        let updates = seen.read().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].mint, "mint1");
        assert_eq!(updates[0].slot, 77);
        assert!((updates[0].price_sol - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn test_token_account_update_parses_balance() {
        let feed = test_feed();

        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        feed.on_price_update(move |update| {
            seen_clone.write().unwrap().push(update);
        });

        feed.handle_token_account_update(
            "mint1",
            json!({
                "context": {"slot": 80},
                "value": {"data": {"parsed": {"info": {"tokenAmount": {
                    "amount": "123456789", "decimals": 6
                }}}}}
            }),
        );

        let updates = seen.read().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].token_balance, 123_456_789);
    }

    #[test]
    fn test_malformed_token_update_is_dropped() {
        let feed = test_feed();
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        feed.on_price_update(move |update| {
            seen_clone.write().unwrap().push(update);
        });

        feed.handle_token_account_update("mint1", json!({"value": {}}));
        assert!(seen.read().unwrap().is_empty());
    }

    #[test]
    fn test_price_cache_roundtrip() {
        let feed = test_feed();
        assert_eq!(feed.price("unknown"), 0.0);
        feed.set_price("mint1", 1.5);
        assert_eq!(feed.price("mint1"), 1.5);
    }
}
