/// Signing of pre-serialized swap transactions
///
/// The aggregator hands back a complete wire-format transaction with an
/// empty signature slot. Signing means locating the message behind the
/// compact-array signature section and splicing our signature into slot 0;
/// nothing else in the transaction is touched.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use super::blockhash::BlockhashCache;
use super::rpc::RpcError;
use super::wallet::Wallet;

pub const COMPUTE_BUDGET_PROGRAM_ID: &str = "ComputeBudget111111111111111111111111111111";

const SIGNATURE_LEN: usize = 64;

pub struct TransactionBuilder {
    wallet: Arc<Wallet>,
    blockhash_cache: Arc<BlockhashCache>,
    priority_fee_lamports: u64,
    compute_unit_limit: u32,
}

impl TransactionBuilder {
    pub fn new(
        wallet: Arc<Wallet>,
        blockhash_cache: Arc<BlockhashCache>,
        priority_fee_lamports: u64,
    ) -> Self {
        Self {
            wallet,
            blockhash_cache,
            priority_fee_lamports,
            // Default sized for aggregator swaps.
            compute_unit_limit: 600_000,
        }
    }

    pub fn set_compute_unit_limit(&mut self, limit: u32) {
        self.compute_unit_limit = limit;
    }

    /// Signs a base64-encoded serialized transaction and returns it
    /// re-encoded. Wire layout: compact-u16 signature count (one byte for
    /// counts below 128), `count * 64` signature bytes, then the message.
    pub fn sign_serialized_transaction(&self, serialized_tx_base64: &str) -> Result<String> {
        let tx_bytes = base64::decode(serialized_tx_base64).context("decode transaction")?;
        if tx_bytes.is_empty() {
            bail!("empty transaction");
        }

        let sig_count = tx_bytes[0] as usize;
        if sig_count >= 128 {
            bail!("unsupported signature count: {}", sig_count);
        }

        if sig_count == 0 {
            // No signature slots reserved: prepend one.
            let message = &tx_bytes[1..];
            let signature = self.wallet.sign(message);

            let mut signed = Vec::with_capacity(1 + SIGNATURE_LEN + message.len());
            signed.push(1);
            signed.extend_from_slice(&signature);
            signed.extend_from_slice(message);
            return Ok(base64::encode(signed));
        }

        let message_offset = 1 + sig_count * SIGNATURE_LEN;
        if tx_bytes.len() <= message_offset {
            bail!(
                "transaction too short: {} bytes for {} signatures",
                tx_bytes.len(),
                sig_count
            );
        }

        let mut signed = tx_bytes;
        let signature = self.wallet.sign(&signed[message_offset..]);
        signed[1..1 + SIGNATURE_LEN].copy_from_slice(&signature);

        Ok(base64::encode(signed))
    }

    /// Compute-budget instruction payloads (SetComputeUnitLimit and
    /// SetComputeUnitPrice) for transactions assembled locally.
    pub fn build_compute_budget_instructions(&self) -> (Vec<u8>, Vec<u8>) {
        let mut set_limit = Vec::with_capacity(5);
        set_limit.push(2u8); // SetComputeUnitLimit
        set_limit.extend_from_slice(&self.compute_unit_limit.to_le_bytes());

        let micro_lamports_per_cu =
            (self.priority_fee_lamports * 1_000_000) / self.compute_unit_limit as u64;
        let mut set_price = Vec::with_capacity(9);
        set_price.push(3u8); // SetComputeUnitPrice
        set_price.extend_from_slice(&micro_lamports_per_cu.to_le_bytes());

        (set_limit, set_price)
    }

    /// Current cached blockhash, for status reporting.
    pub async fn recent_blockhash(&self) -> Result<String, RpcError> {
        self.blockhash_cache.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::rpc::RpcClient;
    use solana_sdk::signature::{Keypair, Signer};
    use std::time::Duration;

    fn test_builder() -> (TransactionBuilder, solana_sdk::pubkey::Pubkey) {
        let keypair = Keypair::new();
        let pubkey = keypair.pubkey();
        let wallet = Arc::new(Wallet::from_keypair(keypair));
        let rpc = Arc::new(
            RpcClient::new(
                "http://127.0.0.1:1".to_string(),
                "http://127.0.0.1:1".to_string(),
                String::new(),
            )
            .unwrap(),
        );
        let cache = Arc::new(BlockhashCache::new(
            rpc,
            Duration::from_millis(100),
            Duration::from_secs(30),
        ));
        (TransactionBuilder::new(wallet, cache, 1_000_000), pubkey)
    }

    fn decode_parts(signed_b64: &str) -> (u8, Vec<u8>, Vec<u8>) {
        let bytes = base64::decode(signed_b64).unwrap();
        let sig_count = bytes[0];
        let sig = bytes[1..65].to_vec();
        let message = bytes[65..].to_vec();
        (sig_count, sig, message)
    }

    #[test]
    fn test_sign_zero_sig_count_prepends_slot() {
        let (builder, pubkey) = test_builder();

        let message = b"minimal message bytes".to_vec();
        let mut tx = vec![0u8];
        tx.extend_from_slice(&message);

        let signed = builder
            .sign_serialized_transaction(&base64::encode(&tx))
            .unwrap();
        let (sig_count, sig, got_message) = decode_parts(&signed);

        assert_eq!(sig_count, 1);
        assert_eq!(got_message, message);

        let signature = solana_sdk::signature::Signature::try_from(sig.as_slice()).unwrap();
        assert!(signature.verify(pubkey.as_ref(), &got_message));
    }

    #[test]
    fn test_sign_one_sig_slot_splices_in_place() {
        let (builder, pubkey) = test_builder();

        let message = vec![3u8, 1, 4, 1, 5, 9, 2, 6];
        let mut tx = vec![1u8];
        tx.extend_from_slice(&[0u8; 64]);
        tx.extend_from_slice(&message);

        let signed = builder
            .sign_serialized_transaction(&base64::encode(&tx))
            .unwrap();
        let (sig_count, sig, got_message) = decode_parts(&signed);

        assert_eq!(sig_count, 1);
        // Message bytes must survive the splice untouched.
        assert_eq!(got_message, message);
        assert_ne!(sig, vec![0u8; 64]);

        let signature = solana_sdk::signature::Signature::try_from(sig.as_slice()).unwrap();
        assert!(signature.verify(pubkey.as_ref(), &got_message));
    }

    #[test]
    fn test_sign_multi_slot_only_overwrites_first() {
        let (builder, _) = test_builder();

        let message = vec![9u8; 10];
        let mut tx = vec![2u8];
        tx.extend_from_slice(&[0u8; 64]);
        tx.extend_from_slice(&[0xAAu8; 64]);
        tx.extend_from_slice(&message);

        let signed = builder
            .sign_serialized_transaction(&base64::encode(&tx))
            .unwrap();
        let bytes = base64::decode(signed).unwrap();

        assert_eq!(bytes[0], 2);
        assert_ne!(&bytes[1..65], &[0u8; 64][..]);
        // Second slot stays as delivered.
        assert_eq!(&bytes[65..129], &[0xAAu8; 64][..]);
        assert_eq!(&bytes[129..], &message[..]);
    }

    #[test]
    fn test_sign_rejects_garbage() {
        let (builder, _) = test_builder();
        assert!(builder.sign_serialized_transaction("not base64!!!").is_err());
        assert!(builder
            .sign_serialized_transaction(&base64::encode([1u8, 2, 3]))
            .is_err());
        assert!(builder.sign_serialized_transaction("").is_err());
    }

    #[test]
    fn test_compute_budget_instructions_layout() {
        let (builder, _) = test_builder();
        let (set_limit, set_price) = builder.build_compute_budget_instructions();

        assert_eq!(set_limit.len(), 5);
        assert_eq!(set_limit[0], 2);
        assert_eq!(
            u32::from_le_bytes(set_limit[1..5].try_into().unwrap()),
            600_000
        );

        assert_eq!(set_price.len(), 9);
        assert_eq!(set_price[0], 3);
        let micro = u64::from_le_bytes(set_price[1..9].try_into().unwrap());
        assert_eq!(micro, (1_000_000u64 * 1_000_000) / 600_000);
    }
}
