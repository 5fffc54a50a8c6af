/// Solana chain plumbing: RPC, blockhash prefetch, wallet, signing

pub mod blockhash;
pub mod errors;
pub mod keycache;
pub mod rpc;
pub mod transaction;
pub mod wallet;

pub use blockhash::{BlockhashCache, CachedBlockhash};
pub use errors::{human_error, human_error_with_action, parse_tx_error, TxError};
pub use keycache::CachedKeyManager;
pub use rpc::{
    RpcClient, RpcError, SignatureStatus, TokenAccountFilter, TokenAccountInfo, TxCheckResult,
    TxStatus,
};
pub use transaction::TransactionBuilder;
pub use wallet::{BalanceTracker, Wallet};
