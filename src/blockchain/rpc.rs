/// JSON-RPC client with primary/fallback failover and a circuit breaker
///
/// One pooled HTTP client serves every call. The circuit opens after five
/// consecutive primary failures and sends traffic straight to the fallback
/// until 30 seconds pass without a new failure.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

const FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_RESET_AFTER: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Default)]
struct CircuitBreaker {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

impl CircuitBreaker {
    fn record_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());
        if self.failures >= FAILURE_THRESHOLD && !self.open {
            self.open = true;
            warn!("RPC circuit breaker opened");
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.open = false;
    }

    fn is_open(&self) -> bool {
        if !self.open {
            return false;
        }
        // Auto-reset: give the primary another chance after a quiet period.
        match self.last_failure {
            Some(at) => at.elapsed() <= CIRCUIT_RESET_AFTER,
            None => false,
        }
    }
}

pub struct RpcClient {
    primary_url: String,
    fallback_url: String,
    api_key: String,
    http: reqwest::Client,
    circuit: Mutex<CircuitBreaker>,
}

impl RpcClient {
    pub fn new(primary_url: String, fallback_url: String, api_key: String) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            primary_url,
            fallback_url,
            api_key,
            http,
            circuit: Mutex::new(CircuitBreaker::default()),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        if self.circuit.lock().unwrap().is_open() {
            return self.call_url(&self.fallback_url, method, &params).await;
        }

        match self.call_url(&self.primary_url, method, &params).await {
            Ok(result) => {
                self.circuit.lock().unwrap().record_success();
                Ok(result)
            }
            Err(err) => {
                self.circuit.lock().unwrap().record_failure();
                warn!(method = %method, error = %err, "primary RPC failed, trying fallback");
                self.call_url(&self.fallback_url, method, &params).await
            }
        }
    }

    async fn call_url<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: &Value,
    ) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut request = self.http.post(url).json(&body);
        if !self.api_key.is_empty() {
            request = request.header("x-api-key", &self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let rpc_response: RpcResponse = response.json().await?;
        if let Some(err) = rpc_response.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(serde_json::from_value(
            rpc_response.result.unwrap_or(Value::Null),
        )?)
    }

    pub async fn get_latest_blockhash(&self) -> Result<BlockhashValue, RpcError> {
        let resp: ValueEnvelope<BlockhashValue> = self
            .call("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
            .await?;
        Ok(resp.value)
    }

    pub async fn get_balance(&self, pubkey: &str) -> Result<u64, RpcError> {
        let resp: ValueEnvelope<u64> = self
            .call("getBalance", json!([pubkey, {"commitment": "confirmed"}]))
            .await?;
        Ok(resp.value)
    }

    /// Submits a signed base64 transaction and returns its signature.
    pub async fn send_transaction(
        &self,
        signed_tx: &str,
        skip_preflight: bool,
    ) -> Result<String, RpcError> {
        self.call(
            "sendTransaction",
            json!([signed_tx, {
                "encoding": "base64",
                "skipPreflight": skip_preflight,
                "preflightCommitment": "processed",
                "maxRetries": 3,
            }]),
        )
        .await
    }

    pub async fn get_token_account_balance(
        &self,
        token_account: &str,
    ) -> Result<(u64, u8), RpcError> {
        #[derive(Deserialize)]
        struct TokenAmount {
            amount: String,
            decimals: u8,
        }

        let resp: ValueEnvelope<TokenAmount> = self
            .call("getTokenAccountBalance", json!([token_account]))
            .await?;
        Ok((parse_amount(&resp.value.amount), resp.value.decimals))
    }

    pub async fn get_token_accounts_by_owner(
        &self,
        owner: &str,
        filter: TokenAccountFilter,
    ) -> Result<Vec<TokenAccountInfo>, RpcError> {
        let filter_value = match &filter {
            TokenAccountFilter::Mint(mint) => json!({"mint": mint}),
            TokenAccountFilter::ProgramId(program_id) => json!({"programId": program_id}),
        };

        let resp: ValueEnvelope<Vec<RawTokenAccount>> = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, filter_value, {"encoding": "jsonParsed"}]),
            )
            .await?;

        Ok(resp
            .value
            .into_iter()
            .map(|raw| TokenAccountInfo {
                address: raw.pubkey,
                mint: raw.account.data.parsed.info.mint,
                amount: parse_amount(&raw.account.data.parsed.info.token_amount.amount),
                decimals: raw.account.data.parsed.info.token_amount.decimals,
            })
            .collect())
    }

    /// Fetches every token account the owner holds, across both the legacy
    /// SPL Token program and Token-2022. Fails the whole call if either
    /// sub-query fails: partial results would make a live Token-2022
    /// position read as balance 0 and a bogus -100% PnL downstream.
    pub async fn get_all_token_accounts(
        &self,
        owner: &str,
    ) -> Result<Vec<TokenAccountInfo>, RpcError> {
        let mut accounts = self
            .get_token_accounts_by_owner(owner, TokenAccountFilter::ProgramId(TOKEN_PROGRAM_ID))
            .await?;

        let accounts_2022 = self
            .get_token_accounts_by_owner(
                owner,
                TokenAccountFilter::ProgramId(TOKEN_2022_PROGRAM_ID),
            )
            .await?;

        accounts.extend(accounts_2022);
        Ok(accounts)
    }

    pub async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<Option<SignatureStatus>>, RpcError> {
        let resp: ValueEnvelope<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([signatures, {"searchTransactionHistory": true}]),
            )
            .await?;
        Ok(resp.value)
    }

    pub async fn check_transaction(&self, signature: &str) -> Result<TxCheckResult, RpcError> {
        let statuses = self
            .get_signature_statuses(&[signature.to_string()])
            .await?;
        Ok(classify_status(
            signature,
            statuses.into_iter().next().flatten(),
        ))
    }

    /// Round-trip probe against the primary endpoint, -1 on failure.
    pub async fn latency_ms(&self) -> i64 {
        let start = Instant::now();
        match self.get_latest_blockhash().await {
            Ok(_) => start.elapsed().as_millis() as i64,
            Err(err) => {
                debug!(error = %err, "latency probe failed");
                -1
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueEnvelope<T> {
    value: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockhashValue {
    pub blockhash: String,
    #[serde(rename = "lastValidBlockHeight")]
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone)]
pub enum TokenAccountFilter {
    Mint(String),
    ProgramId(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccountInfo {
    pub address: String,
    pub mint: String,
    pub amount: u64,
    pub decimals: u8,
}

#[derive(Debug, Deserialize)]
struct RawTokenAccount {
    pubkey: String,
    account: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    data: RawAccountData,
}

#[derive(Debug, Deserialize)]
struct RawAccountData {
    parsed: RawParsed,
}

#[derive(Debug, Deserialize)]
struct RawParsed {
    info: RawTokenInfo,
}

#[derive(Debug, Deserialize)]
struct RawTokenInfo {
    mint: String,
    #[serde(rename = "tokenAmount")]
    token_amount: RawTokenAmount,
}

#[derive(Debug, Deserialize)]
struct RawTokenAmount {
    amount: String,
    decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    /// None once the transaction is finalized.
    pub confirmations: Option<u64>,
    pub err: Option<Value>,
    pub confirmation_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    NotFound,
    Pending,
}

#[derive(Debug, Clone)]
pub struct TxCheckResult {
    pub signature: String,
    pub status: TxStatus,
    pub message: String,
    pub slot: u64,
    pub confirmations: u64,
}

fn classify_status(signature: &str, status: Option<SignatureStatus>) -> TxCheckResult {
    let Some(status) = status else {
        return TxCheckResult {
            signature: signature.to_string(),
            status: TxStatus::NotFound,
            message: "transaction not found (may still be processing)".to_string(),
            slot: 0,
            confirmations: 0,
        };
    };

    let confirmations = status.confirmations.unwrap_or(0);
    let confirmation_status = status.confirmation_status.as_deref().unwrap_or("");

    if let Some(err) = status.err {
        return TxCheckResult {
            signature: signature.to_string(),
            status: TxStatus::Failed,
            message: err.to_string(),
            slot: status.slot,
            confirmations,
        };
    }

    if confirmation_status == "processed" {
        return TxCheckResult {
            signature: signature.to_string(),
            status: TxStatus::Pending,
            message: "transaction processed, awaiting confirmation".to_string(),
            slot: status.slot,
            confirmations,
        };
    }

    TxCheckResult {
        signature: signature.to_string(),
        status: TxStatus::Success,
        message: format!("transaction confirmed ({})", confirmation_status),
        slot: status.slot,
        confirmations,
    }
}

/// Balances and amounts arrive as decimal strings. A parse failure on the
/// hot path must not propagate, so bad input reads as zero.
fn parse_amount(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_opens_after_five_failures() {
        let mut circuit = CircuitBreaker::default();
        for _ in 0..4 {
            circuit.record_failure();
            assert!(!circuit.is_open());
        }
        circuit.record_failure();
        assert!(circuit.is_open());
    }

    #[test]
    fn test_circuit_resets_on_success() {
        let mut circuit = CircuitBreaker::default();
        for _ in 0..5 {
            circuit.record_failure();
        }
        assert!(circuit.is_open());
        circuit.record_success();
        assert!(!circuit.is_open());
        assert_eq!(circuit.failures, 0);
    }

    #[test]
    fn test_circuit_auto_resets_after_quiet_period() {
        let mut circuit = CircuitBreaker::default();
        for _ in 0..5 {
            circuit.record_failure();
        }
        assert!(circuit.is_open());

        // Pretend the last failure happened 31 seconds ago.
        let Some(past) = Instant::now().checked_sub(Duration::from_secs(31)) else {
            return;
        };
        circuit.last_failure = Some(past);
        assert!(!circuit.is_open());
    }

    #[test]
    fn test_parse_amount_defaults_to_zero() {
        assert_eq!(parse_amount("123456"), 123456);
        assert_eq!(parse_amount(""), 0);
        assert_eq!(parse_amount("abc"), 0);
        assert_eq!(parse_amount("-5"), 0);
    }

    #[test]
    fn test_classify_status_not_found() {
        let result = classify_status("sig", None);
        assert_eq!(result.status, TxStatus::NotFound);
    }

    #[test]
    fn test_classify_status_failed_carries_error() {
        let status = SignatureStatus {
            slot: 100,
            confirmations: Some(1),
            err: Some(json!({"InstructionError": [0, "Custom"]})),
            confirmation_status: Some("confirmed".to_string()),
        };
        let result = classify_status("sig", Some(status));
        assert_eq!(result.status, TxStatus::Failed);
        assert!(result.message.contains("InstructionError"));
        assert_eq!(result.slot, 100);
    }

    #[test]
    fn test_classify_status_processed_is_pending() {
        let status = SignatureStatus {
            slot: 5,
            confirmations: Some(0),
            err: None,
            confirmation_status: Some("processed".to_string()),
        };
        assert_eq!(classify_status("sig", Some(status)).status, TxStatus::Pending);
    }

    #[test]
    fn test_classify_status_confirmed_is_success() {
        let status = SignatureStatus {
            slot: 5,
            confirmations: None,
            err: None,
            confirmation_status: Some("finalized".to_string()),
        };
        let result = classify_status("sig", Some(status));
        assert_eq!(result.status, TxStatus::Success);
        assert_eq!(result.confirmations, 0);
    }

    #[test]
    fn test_token_account_response_shape() {
        let raw = json!({
            "pubkey": "AccountPubkey111",
            "account": {
                "data": {
                    "parsed": {
                        "info": {
                            "mint": "Mint111",
                            "tokenAmount": {"amount": "250000", "decimals": 6}
                        }
                    }
                }
            }
        });
        let account: RawTokenAccount = serde_json::from_value(raw).unwrap();
        assert_eq!(account.account.data.parsed.info.mint, "Mint111");
        assert_eq!(
            parse_amount(&account.account.data.parsed.info.token_amount.amount),
            250000
        );
    }
}
