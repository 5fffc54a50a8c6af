/// Double-buffered blockhash prefetch
///
/// A background task refreshes aggressively (100ms default) so the trade
/// hot path never waits on the network for a signing nonce. Readers take
/// `current`, fall back to `next`, and only when both are stale pay for a
/// synchronous fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::rpc::{RpcClient, RpcError};

const SYNC_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct CachedBlockhash {
    pub hash: String,
    pub last_valid_block_height: u64,
    pub fetched_at: Instant,
}

pub struct BlockhashCache {
    current: RwLock<Option<Arc<CachedBlockhash>>>,
    next: RwLock<Option<Arc<CachedBlockhash>>>,

    rpc: Arc<RpcClient>,
    ttl: Duration,
    interval: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockhashCache {
    pub fn new(rpc: Arc<RpcClient>, refresh_interval: Duration, ttl: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            next: RwLock::new(None),
            rpc,
            ttl,
            interval: refresh_interval,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Performs one synchronous fetch (startup must not proceed without a
    /// valid hash) and spawns the prefetch task.
    pub async fn start(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.fetch_and_rotate()
            .await
            .context("initial blockhash fetch")?;

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("blockhash prefetch stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = cache.fetch_and_rotate().await {
                            warn!(error = %err, "blockhash prefetch failed");
                        }
                    }
                }
            }
        });

        info!(
            interval_ms = self.interval.as_millis() as u64,
            ttl_s = self.ttl.as_secs(),
            "blockhash cache started (double-buffer mode)"
        );
        Ok(())
    }

    /// Hot path. Returns a fresh hash without touching the network unless
    /// both buffers have gone stale.
    pub async fn get(&self) -> Result<String, RpcError> {
        if let Some(cached) = self.lookup() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.hash.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        warn!("blockhash cache miss, forcing sync refresh");
        self.fetch_and_rotate().await?;

        // fetch_and_rotate always leaves current populated.
        Ok(self.lookup_unchecked().expect("current after refresh").hash.clone())
    }

    pub async fn get_with_height(&self) -> Result<(String, u64), RpcError> {
        if let Some(cached) = self.lookup() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((cached.hash.clone(), cached.last_valid_block_height));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.fetch_and_rotate().await?;
        let cached = self.lookup_unchecked().expect("current after refresh");
        Ok((cached.hash.clone(), cached.last_valid_block_height))
    }

    /// Time since the current buffer was fetched.
    pub fn age(&self) -> Option<Duration> {
        self.current
            .read()
            .unwrap()
            .as_ref()
            .map(|c| c.fetched_at.elapsed())
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 100.0;
        }
        hits as f64 / total as f64 * 100.0
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn lookup(&self) -> Option<Arc<CachedBlockhash>> {
        if let Some(cached) = self.current.read().unwrap().as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Some(Arc::clone(cached));
            }
        }
        if let Some(next) = self.next.read().unwrap().as_ref() {
            if next.fetched_at.elapsed() < self.ttl {
                return Some(Arc::clone(next));
            }
        }
        None
    }

    fn lookup_unchecked(&self) -> Option<Arc<CachedBlockhash>> {
        self.current.read().unwrap().as_ref().map(Arc::clone)
    }

    async fn fetch_and_rotate(&self) -> Result<(), RpcError> {
        let result = tokio::time::timeout(SYNC_FETCH_TIMEOUT, self.rpc.get_latest_blockhash())
            .await
            .map_err(|_| RpcError::Http {
                status: 0,
                body: "blockhash fetch timed out".to_string(),
            })??;

        let fresh = Arc::new(CachedBlockhash {
            hash: result.blockhash,
            last_valid_block_height: result.last_valid_block_height,
            fetched_at: Instant::now(),
        });

        self.rotate_in(fresh);
        debug!(hit_rate = self.hit_rate(), "blockhash prefetched");
        Ok(())
    }

    /// Rotation is unidirectional: next moves to current, the fresh hash
    /// becomes next. On bootstrap the fresh hash fills both slots.
    fn rotate_in(&self, fresh: Arc<CachedBlockhash>) {
        let mut current = self.current.write().unwrap();
        let mut next = self.next.write().unwrap();

        let had_current = current.is_some();
        *current = next.take();
        *next = Some(Arc::clone(&fresh));

        if !had_current || current.is_none() {
            *current = Some(fresh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache(ttl: Duration) -> BlockhashCache {
        let rpc = Arc::new(
            RpcClient::new(
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:1".to_string(),
                String::new(),
            )
            .unwrap(),
        );
        BlockhashCache::new(rpc, Duration::from_millis(100), ttl)
    }

    fn hash(label: &str) -> Arc<CachedBlockhash> {
        Arc::new(CachedBlockhash {
            hash: label.to_string(),
            last_valid_block_height: 1,
            fetched_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_fresh_hash_is_a_hit() {
        let cache = test_cache(Duration::from_secs(30));
        cache.rotate_in(hash("aaa"));

        let got = cache.get().await.unwrap();
        assert_eq!(got, "aaa");
        assert_eq!(cache.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.miss_count(), 0);
    }

    #[test]
    fn test_bootstrap_fills_both_buffers() {
        let cache = test_cache(Duration::from_secs(30));
        cache.rotate_in(hash("first"));

        assert_eq!(cache.current.read().unwrap().as_ref().unwrap().hash, "first");
        assert_eq!(cache.next.read().unwrap().as_ref().unwrap().hash, "first");
    }

    #[test]
    fn test_rotation_is_unidirectional() {
        let cache = test_cache(Duration::from_secs(30));
        cache.rotate_in(hash("a"));
        cache.rotate_in(hash("b"));
        cache.rotate_in(hash("c"));

        // After three rotations: current holds the second fetch, next the third.
        assert_eq!(cache.current.read().unwrap().as_ref().unwrap().hash, "b");
        assert_eq!(cache.next.read().unwrap().as_ref().unwrap().hash, "c");
    }

    #[test]
    fn test_stale_buffers_are_skipped() {
        let cache = test_cache(Duration::from_millis(0));
        cache.rotate_in(hash("stale"));
        // TTL of zero makes everything stale immediately.
        assert!(cache.lookup().is_none());
    }

    #[test]
    fn test_reader_falls_back_to_next() {
        let cache = test_cache(Duration::from_secs(30));
        cache.rotate_in(hash("a"));
        cache.rotate_in(hash("b"));

        // Manually expire only the current buffer.
        let Some(past) = Instant::now().checked_sub(Duration::from_secs(120)) else {
            return;
        };
        {
            let mut current = cache.current.write().unwrap();
            *current = Some(Arc::new(CachedBlockhash {
                hash: "a".to_string(),
                last_valid_block_height: 1,
                fetched_at: past,
            }));
        }

        let got = cache.lookup().unwrap();
        assert_eq!(got.hash, "b");
    }

    #[test]
    fn test_hit_rate_starts_at_full() {
        let cache = test_cache(Duration::from_secs(30));
        assert_eq!(cache.hit_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_stale_get_counts_one_miss() {
        // TTL 0 forces the sync-refresh path; the unreachable RPC makes the
        // refresh fail, but the miss must be counted exactly once per get.
        let cache = test_cache(Duration::from_millis(0));
        cache.rotate_in(hash("stale"));

        assert!(cache.get().await.is_err());
        assert_eq!(cache.miss_count(), 1);
        assert_eq!(cache.hits.load(Ordering::Relaxed), 0);
    }
}
