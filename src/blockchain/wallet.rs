/// Wallet keypair and cached SOL balance

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::signer::keypair::keypair_from_seed;
use tracing::info;

use super::rpc::RpcClient;

pub const LAMPORTS_PER_SOL: f64 = 1e9;

/// Single Ed25519 keypair. The private key never leaves this struct.
pub struct Wallet {
    keypair: Keypair,
    address: String,
}

impl Wallet {
    /// Loads a wallet from a base58-encoded private key: either the full
    /// 64-byte keypair or a 32-byte seed.
    pub fn from_base58(private_key: &str) -> Result<Self> {
        let bytes = bs58::decode(private_key)
            .into_vec()
            .context("decode private key")?;

        let keypair = match bytes.len() {
            64 => Keypair::from_bytes(&bytes).context("invalid keypair bytes")?,
            32 => keypair_from_seed(&bytes)
                .map_err(|e| anyhow::anyhow!("invalid seed: {}", e))?,
            n => bail!("invalid private key length: {} (expected 32 or 64)", n),
        };

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let address = keypair.pubkey().to_string();
        info!(address = %address, "wallet loaded");
        Self { keypair, address }
    }

    /// Base58 public key.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pubkey_bytes(&self) -> [u8; 32] {
        self.keypair.pubkey().to_bytes()
    }

    /// Signs a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature = self.keypair.sign_message(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(signature.as_ref());
        out
    }
}

/// Cached wallet SOL balance. Readers on the trade path never hit RPC;
/// the value is refreshed periodically and pushed from the WebSocket
/// subscription when it changes on-chain.
pub struct BalanceTracker {
    wallet_address: String,
    rpc: Arc<RpcClient>,
    balance_lamports: AtomicU64,
}

impl BalanceTracker {
    pub fn new(wallet_address: String, rpc: Arc<RpcClient>) -> Self {
        Self {
            wallet_address,
            rpc,
            balance_lamports: AtomicU64::new(0),
        }
    }

    pub async fn refresh(&self) -> Result<()> {
        let balance = self.rpc.get_balance(&self.wallet_address).await?;
        self.balance_lamports.store(balance, Ordering::Relaxed);
        Ok(())
    }

    /// Direct write from the subscription layer.
    pub fn set_balance(&self, lamports: u64) {
        self.balance_lamports.store(lamports, Ordering::Relaxed);
    }

    pub fn balance_lamports(&self) -> u64 {
        self.balance_lamports.load(Ordering::Relaxed)
    }

    pub fn balance_sol(&self) -> f64 {
        self.balance_lamports() as f64 / LAMPORTS_PER_SOL
    }

    pub fn has_sufficient(&self, amount_lamports: u64, fees_lamports: u64) -> bool {
        self.balance_lamports() >= amount_lamports + fees_lamports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tracker() -> BalanceTracker {
        let rpc = Arc::new(
            RpcClient::new(
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:1".to_string(),
                String::new(),
            )
            .unwrap(),
        );
        BalanceTracker::new("wallet".to_string(), rpc)
    }

    #[test]
    fn test_wallet_roundtrip_base58() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let expected_address = keypair.pubkey().to_string();

        let wallet = Wallet::from_base58(&encoded).unwrap();
        assert_eq!(wallet.address(), expected_address);
    }

    #[test]
    fn test_wallet_from_seed() {
        let seed = [7u8; 32];
        let encoded = bs58::encode(seed).into_string();
        let wallet = Wallet::from_base58(&encoded).unwrap();
        assert!(!wallet.address().is_empty());
    }

    #[test]
    fn test_wallet_rejects_bad_length() {
        let encoded = bs58::encode([1u8; 17]).into_string();
        assert!(Wallet::from_base58(&encoded).is_err());
    }

    #[test]
    fn test_signature_verifies() {
        let keypair = Keypair::new();
        let pubkey = keypair.pubkey();
        let wallet = Wallet::from_keypair(keypair);

        let message = b"stoat test message";
        let signature = wallet.sign(message);
        let sig = solana_sdk::signature::Signature::from(signature);
        assert!(sig.verify(pubkey.as_ref(), message));
    }

    #[test]
    fn test_balance_tracker_push_and_read() {
        let tracker = test_tracker();
        assert_eq!(tracker.balance_lamports(), 0);

        tracker.set_balance(1_500_000_000);
        assert_eq!(tracker.balance_lamports(), 1_500_000_000);
        assert!((tracker.balance_sol() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_has_sufficient() {
        let tracker = test_tracker();
        tracker.set_balance(1_000_000);
        assert!(tracker.has_sufficient(900_000, 100_000));
        assert!(!tracker.has_sufficient(900_000, 100_001));
    }
}
