/// Auto-generated wallet keys with an on-disk cache
///
/// Used when no private key is present in the environment. The cache file
/// holds the key material, so it is written with owner-only permissions
/// and expires after a configurable TTL (10 minutes by default).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use tracing::{info, warn};

use super::wallet::Wallet;

const CACHE_FILE_NAME: &str = "wallet_cache.json";

#[derive(Debug, Serialize, Deserialize)]
struct CachedKeyData {
    private_key: String,
    public_key: String,
    address: String,
    generated_at: DateTime<Utc>,
}

pub struct CachedKeyManager {
    key_path: PathBuf,
    refresh_every: Duration,
}

impl CachedKeyManager {
    pub fn new(cache_dir: &str, refresh_every: Duration) -> Self {
        Self {
            key_path: PathBuf::from(cache_dir).join(CACHE_FILE_NAME),
            refresh_every,
        }
    }

    /// Returns the cached wallet if still fresh, otherwise generates a new
    /// keypair and caches it.
    pub fn get_or_generate(&self) -> Result<Wallet> {
        if let Some(wallet) = self.load_from_cache() {
            info!(address = %wallet.address(), "loaded wallet from cache");
            return Ok(wallet);
        }

        let keypair = Keypair::new();
        let wallet = self.cache_keypair(&keypair)?;
        info!(
            address = %wallet.address(),
            ttl_s = self.refresh_every.as_secs(),
            "generated new wallet"
        );
        Ok(wallet)
    }

    /// Forces a new keypair, replacing the cache.
    pub fn refresh(&self) -> Result<Wallet> {
        let keypair = Keypair::new();
        let wallet = self.cache_keypair(&keypair)?;
        info!(address = %wallet.address(), "wallet key refreshed");
        Ok(wallet)
    }

    fn load_from_cache(&self) -> Option<Wallet> {
        let data = std::fs::read_to_string(&self.key_path).ok()?;
        let cached: CachedKeyData = serde_json::from_str(&data).ok()?;

        let age = Utc::now().signed_duration_since(cached.generated_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.refresh_every.as_secs() {
            return None;
        }

        match Wallet::from_base58(&cached.private_key) {
            Ok(wallet) => {
                // A mismatched address means the cache file is corrupt.
                let pubkey_b58 = bs58::encode(wallet.pubkey_bytes()).into_string();
                if wallet.address() != cached.address || pubkey_b58 != cached.public_key {
                    warn!("cached wallet key inconsistent, regenerating");
                    return None;
                }
                Some(wallet)
            }
            Err(err) => {
                warn!(error = %err, "cached wallet key unreadable, regenerating");
                None
            }
        }
    }

    fn cache_keypair(&self, keypair: &Keypair) -> Result<Wallet> {
        let cached = CachedKeyData {
            private_key: bs58::encode(keypair.to_bytes()).into_string(),
            public_key: bs58::encode(keypair.pubkey().to_bytes()).into_string(),
            address: keypair.pubkey().to_string(),
            generated_at: Utc::now(),
        };

        if let Some(parent) = self.key_path.parent() {
            std::fs::create_dir_all(parent).context("create key cache dir")?;
        }

        let json = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&self.key_path, &json).context("write key cache")?;

        // Key material on disk gets owner-only permissions.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.key_path, std::fs::Permissions::from_mode(0o600))
                .context("chmod key cache")?;
        }

        let bytes = keypair.to_bytes();
        let keypair_copy = Keypair::from_bytes(&bytes).context("recreate keypair")?;
        Ok(Wallet::from_keypair(keypair_copy))
    }
}
