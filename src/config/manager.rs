/// Thread-safe access to configuration with runtime updates

use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use tracing::info;

use super::Config;

pub struct ConfigManager {
    config: RwLock<Config>,
}

impl ConfigManager {
    /// Loads configuration from a TOML file, falling back to defaults
    /// for any missing section.
    pub fn load(path: &str) -> Result<Self> {
        let config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("read config file {}", path))?;
            toml::from_str(&content).with_context(|| format!("parse config file {}", path))?
        } else {
            info!(path = %path, "config file not found, using defaults");
            Config::default()
        };

        Ok(Self {
            config: RwLock::new(config),
        })
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn get(&self) -> Config {
        self.config.read().unwrap().clone()
    }

    /// Trading section is read on every signal, so it gets its own accessor.
    pub fn trading(&self) -> super::TradingConfig {
        self.config.read().unwrap().trading.clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut Config)) {
        let mut config = self.config.write().unwrap();
        apply(&mut config);
    }

    pub fn private_key(&self) -> Option<String> {
        let env_name = self.config.read().unwrap().wallet.private_key_env.clone();
        std::env::var(env_name).ok().filter(|k| !k.is_empty())
    }

    pub fn jupiter_api_keys(&self) -> Vec<String> {
        let env_name = self.config.read().unwrap().jupiter.api_keys_env.clone();
        std::env::var(env_name)
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Primary provider API key, sent as the `x-api-key` header.
    pub fn primary_api_key(&self) -> String {
        let env_name = self.config.read().unwrap().rpc.primary_api_key_env.clone();
        std::env::var(env_name).unwrap_or_default()
    }

    /// Primary RPC URL with the API key injected as a query parameter.
    /// The key lives only in the environment, never in the config file.
    pub fn rpc_primary_url(&self) -> String {
        let cfg = self.config.read().unwrap();
        inject_api_key(&cfg.rpc.primary_url, &cfg.rpc.primary_api_key_env)
    }

    pub fn rpc_fallback_url(&self) -> String {
        let cfg = self.config.read().unwrap();
        inject_api_key(&cfg.rpc.fallback_url, &cfg.rpc.fallback_api_key_env)
    }

    pub fn ws_url(&self) -> String {
        let cfg = self.config.read().unwrap();
        if cfg.websocket.url.is_empty() {
            return String::new();
        }
        inject_api_key(&cfg.websocket.url, &cfg.rpc.primary_api_key_env)
    }
}

/// Appends the provider's API key query parameter. Helius expects `api-key`,
/// everyone else takes `api_key`.
fn inject_api_key(url: &str, key_env: &str) -> String {
    let key = std::env::var(key_env).unwrap_or_default();
    if key.is_empty() || url.contains("api_key") || url.contains("api-key") {
        return url.to_string();
    }

    let param = if url.contains("helius") { "api-key" } else { "api_key" };
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, sep, param, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_api_key_param_style() {
        std::env::set_var("STOAT_TEST_KEY", "abc123");

        let url = inject_api_key("https://rpc.shyft.to", "STOAT_TEST_KEY");
        assert_eq!(url, "https://rpc.shyft.to?api_key=abc123");

        let url = inject_api_key("https://mainnet.helius-rpc.com", "STOAT_TEST_KEY");
        assert_eq!(url, "https://mainnet.helius-rpc.com?api-key=abc123");

        let url = inject_api_key("https://rpc.shyft.to?network=mainnet", "STOAT_TEST_KEY");
        assert_eq!(url, "https://rpc.shyft.to?network=mainnet&api_key=abc123");
    }

    #[test]
    fn test_inject_api_key_no_key() {
        let url = inject_api_key("https://rpc.shyft.to", "STOAT_TEST_KEY_UNSET");
        assert_eq!(url, "https://rpc.shyft.to");
    }

    #[test]
    fn test_inject_api_key_already_present() {
        std::env::set_var("STOAT_TEST_KEY2", "xyz");
        let url = inject_api_key("https://rpc.example.com?api_key=old", "STOAT_TEST_KEY2");
        assert_eq!(url, "https://rpc.example.com?api_key=old");
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let manager = ConfigManager::load("/nonexistent/stoat.toml").unwrap();
        let cfg = manager.get();
        assert_eq!(cfg.trading.min_entry_percent, 50.0);
        assert_eq!(cfg.trading.take_profit_multiple, 2.0);
        assert_eq!(cfg.blockchain.blockhash_refresh_ms, 100);
        assert!(!cfg.trading.auto_trading_enabled);
    }

    #[test]
    fn test_update_applies() {
        let manager = ConfigManager::from_config(Config::default());
        manager.update(|c| c.trading.auto_trading_enabled = true);
        assert!(manager.trading().auto_trading_enabled);
    }
}
