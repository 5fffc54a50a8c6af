/// Wallet balance pushes and transaction confirmations
///
/// One account subscription covers the wallet's SOL balance; signature
/// subscriptions are one-shot — the callback fires once and the
/// subscription is torn down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::websocket::WsClient;

#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    pub address: String,
    pub lamports: u64,
    pub slot: u64,
}

#[derive(Debug, Clone)]
pub struct TxConfirmation {
    pub signature: String,
    pub confirmed: bool,
    pub error: String,
    pub slot: u64,
}

type BalanceHandler = Arc<dyn Fn(BalanceUpdate) + Send + Sync>;
type ConfirmationHandler = Box<dyn FnOnce(TxConfirmation) + Send>;

pub struct WalletMonitor {
    client: Arc<WsClient>,
    wallet_addr: String,
    wallet_sub_id: AtomicU64,

    /// signature -> one-shot confirmation callback
    tx_callbacks: DashMap<String, ConfirmationHandler>,
    /// signature -> subscription id
    tx_subs: DashMap<String, u64>,

    on_balance: RwLock<Option<BalanceHandler>>,
}

impl WalletMonitor {
    pub fn new(client: Arc<WsClient>, wallet_addr: String) -> Arc<Self> {
        Arc::new(Self {
            client,
            wallet_addr,
            wallet_sub_id: AtomicU64::new(0),
            tx_callbacks: DashMap::new(),
            tx_subs: DashMap::new(),
            on_balance: RwLock::new(None),
        })
    }

    pub fn on_balance_update(&self, handler: impl Fn(BalanceUpdate) + Send + Sync + 'static) {
        *self.on_balance.write().unwrap() = Some(Arc::new(handler));
    }

    /// Subscribes to the wallet account for SOL balance pushes.
    pub async fn start_wallet_subscription(self: &Arc<Self>) -> Result<()> {
        if self.wallet_addr.is_empty() {
            return Ok(());
        }

        let monitor = Arc::clone(self);
        let sub_id = self
            .client
            .account_subscribe(&self.wallet_addr, move |data| {
                monitor.handle_balance_update(data);
            })
            .await?;

        self.wallet_sub_id.store(sub_id, Ordering::Relaxed);
        info!(
            addr = %truncate(&self.wallet_addr, 8),
            sub_id,
            "subscribed to wallet balance"
        );
        Ok(())
    }

    fn handle_balance_update(&self, data: Value) {
        let lamports = data
            .get("value")
            .and_then(|v| v.get("lamports"))
            .and_then(Value::as_u64);
        let slot = data
            .get("context")
            .and_then(|c| c.get("slot"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let Some(lamports) = lamports else {
            warn!("balance update without lamports field");
            return;
        };

        debug!(lamports, slot, "wallet balance update");

        let handler = self.on_balance.read().unwrap().clone();
        if let Some(handler) = handler {
            handler(BalanceUpdate {
                address: self.wallet_addr.clone(),
                lamports,
                slot,
            });
        }
    }

    /// Registers a one-shot confirmation callback for a signature. The
    /// subscription is removed as soon as the notification arrives.
    pub async fn wait_for_confirmation(
        self: &Arc<Self>,
        signature: &str,
        callback: impl FnOnce(TxConfirmation) + Send + 'static,
    ) -> Result<()> {
        self.tx_callbacks
            .insert(signature.to_string(), Box::new(callback));

        let monitor = Arc::clone(self);
        let sig = signature.to_string();
        let sub_result = self
            .client
            .signature_subscribe(signature, move |data| {
                monitor.handle_tx_confirmation(&sig, data);
            })
            .await;

        match sub_result {
            Ok(sub_id) => {
                self.tx_subs.insert(signature.to_string(), sub_id);
                debug!(sig = %truncate(signature, 12), sub_id, "waiting for TX confirmation");
                Ok(())
            }
            Err(err) => {
                self.tx_callbacks.remove(signature);
                Err(err)
            }
        }
    }

    fn handle_tx_confirmation(&self, signature: &str, data: Value) {
        let slot = data
            .get("context")
            .and_then(|c| c.get("slot"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let err_value = data.get("value").and_then(|v| v.get("err"));
        let confirmed = matches!(err_value, None | Some(Value::Null));

        let confirmation = TxConfirmation {
            signature: signature.to_string(),
            confirmed,
            error: match err_value {
                None | Some(Value::Null) => String::new(),
                Some(err) => err.to_string(),
            },
            slot,
        };

        if confirmation.confirmed {
            info!(sig = %truncate(signature, 12), slot, "✅ TX confirmed");
        } else {
            error!(
                sig = %truncate(signature, 12),
                error = %confirmation.error,
                "❌ TX failed"
            );
        }

        // Dispatch exactly once, then tear the subscription down. The
        // server already closed it on its side after notifying.
        if let Some((_, callback)) = self.tx_callbacks.remove(signature) {
            callback(confirmation);
        }
        if let Some((_, sub_id)) = self.tx_subs.remove(signature) {
            self.client.drop_handler(sub_id);
        }
    }

    /// Unsubscribes from everything this monitor owns.
    pub async fn stop(&self) {
        let wallet_sub = self.wallet_sub_id.swap(0, Ordering::Relaxed);
        if wallet_sub != 0 {
            self.client.unsubscribe("accountUnsubscribe", wallet_sub).await;
        }

        let subs: Vec<(String, u64)> = self
            .tx_subs
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        for (sig, sub_id) in subs {
            self.client.unsubscribe("signatureUnsubscribe", sub_id).await;
            self.tx_subs.remove(&sig);
            self.tx_callbacks.remove(&sig);
        }
    }
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
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_monitor() -> Arc<WalletMonitor> {
        let client = WsClient::new(
            "wss://example.invalid/ws".to_string(),
            Duration::from_millis(100),
            Duration::from_secs(15),
        );
        WalletMonitor::new(client, "WaLLetAddr111".to_string())
    }

    #[test]
    fn test_balance_update_parses_lamports() {
        let monitor = test_monitor();
        let seen = Arc::new(RwLock::new(None));

        let seen_clone = Arc::clone(&seen);
        monitor.on_balance_update(move |update| {
            *seen_clone.write().unwrap() = Some(update);
        });

        monitor.handle_balance_update(json!({
            "context": {"slot": 333},
            "value": {"lamports": 2_000_000_000u64}
        }));

        let update = seen.read().unwrap().clone().unwrap();
        assert_eq!(update.lamports, 2_000_000_000);
        assert_eq!(update.slot, 333);
        assert_eq!(update.address, "WaLLetAddr111");
    }

    #[test]
    fn test_balance_update_without_lamports_is_ignored() {
        let monitor = test_monitor();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        monitor.on_balance_update(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        monitor.handle_balance_update(json!({"context": {"slot": 1}, "value": {}}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_confirmation_success_dispatches_once() {
        let monitor = test_monitor();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        monitor
            .tx_callbacks
            .insert("sig1".to_string(), Box::new(move |conf| {
                assert!(conf.confirmed);
                assert!(conf.error.is_empty());
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }));

        let notification = json!({"context": {"slot": 9}, "value": {"err": null}});
        monitor.handle_tx_confirmation("sig1", notification.clone());
        monitor.handle_tx_confirmation("sig1", notification);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(monitor.tx_callbacks.is_empty());
    }

    #[test]
    fn test_confirmation_failure_carries_error() {
        let monitor = test_monitor();
        let seen = Arc::new(RwLock::new(None));

        let seen_clone = Arc::clone(&seen);
        monitor
            .tx_callbacks
            .insert("sig2".to_string(), Box::new(move |conf| {
                *seen_clone.write().unwrap() = Some(conf);
            }));

        monitor.handle_tx_confirmation(
            "sig2",
            json!({"context": {"slot": 10}, "value": {"err": {"InstructionError": [2, "Custom"]}}}),
        );

        let conf = seen.read().unwrap().clone().unwrap();
        assert!(!conf.confirmed);
        assert!(conf.error.contains("InstructionError"));
        assert_eq!(conf.slot, 10);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
