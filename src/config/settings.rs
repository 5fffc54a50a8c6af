/// Configuration structures

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub jupiter: JupiterConfig,
    #[serde(default)]
    pub blockchain: BlockchainConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
    /// Environment variable holding the base58 private key
    pub private_key_env: String,
    /// Directory for the auto-generated wallet cache file
    pub key_cache_dir: String,
    /// Auto-generated key lifetime in seconds
    pub key_cache_ttl_seconds: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "WALLET_PRIVATE_KEY".to_string(),
            key_cache_dir: "data".to_string(),
            key_cache_ttl_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcConfig {
    pub primary_url: String,
    pub primary_api_key_env: String,
    pub fallback_url: String,
    pub fallback_api_key_env: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            primary_url: "https://rpc.shyft.to".to_string(),
            primary_api_key_env: "SHYFT_API_KEY".to_string(),
            fallback_url: "https://api.mainnet-beta.solana.com".to_string(),
            fallback_api_key_env: "HELIUS_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    pub min_entry_percent: f64,
    pub take_profit_multiple: f64,
    pub max_alloc_percent: f64,
    pub max_open_positions: usize,
    pub auto_trading_enabled: bool,
    /// Sell this percent of the position at partial_profit_multiple (0 = disabled)
    pub partial_profit_percent: f64,
    pub partial_profit_multiple: f64,
    /// Force-exit positions older than this (0 = disabled)
    pub max_hold_minutes: u64,
    pub simulation_mode: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_entry_percent: 50.0,
            take_profit_multiple: 2.0,
            max_alloc_percent: 20.0,
            max_open_positions: 5,
            auto_trading_enabled: false,
            partial_profit_percent: 0.0,
            partial_profit_multiple: 1.5,
            max_hold_minutes: 0,
            simulation_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JupiterConfig {
    pub base_url: String,
    pub slippage_bps: u32,
    pub timeout_seconds: u64,
    pub api_keys_env: String,
    pub max_priority_fee_lamports: u64,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.jup.ag/swap/v1".to_string(),
            slippage_bps: 500,
            timeout_seconds: 10,
            api_keys_env: "JUPITER_API_KEYS".to_string(),
            max_priority_fee_lamports: 1_250_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockchainConfig {
    pub blockhash_refresh_ms: u64,
    pub blockhash_ttl_seconds: u64,
    pub balance_refresh_seconds: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            blockhash_refresh_ms: 100,
            blockhash_ttl_seconds: 60,
            balance_refresh_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub sqlite_path: String,
    pub signals_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/stoat.db".to_string(),
            signals_buffer_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSocketConfig {
    pub url: String,
    pub reconnect_delay_ms: u64,
    pub ping_interval_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_delay_ms: 2000,
            ping_interval_ms: 15000,
        }
    }
}
