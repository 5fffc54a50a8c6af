/// Jupiter aggregator client for swap execution
///
/// Quotes and pre-built swap transactions come from the Jupiter swap API.
/// A small pool of HTTP/2 clients is rotated per request, as is the API
/// key list. Simulation mode intercepts both calls before any network
/// traffic so the rest of the pipeline can run against synthetic fills.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

/// Wrapped SOL mint address.
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

const CLIENT_POOL_SIZE: usize = 4;
const DEFAULT_MAX_PRIORITY_FEE_LAMPORTS: u64 = 1_250_000;

#[derive(Debug, Clone, Copy)]
struct Simulation {
    enabled: bool,
    multiplier: f64,
}

pub struct JupiterClient {
    base_url: String,
    slippage_bps: u32,
    clients: Vec<reqwest::Client>,
    client_idx: AtomicU32,
    api_keys: Vec<String>,
    key_idx: AtomicU32,
    /// Priority fee cap handed to the swap endpoint.
    max_lamports: AtomicU64,
    sim: RwLock<Simulation>,
}

/// Quote response from Jupiter. Amounts stay as decimal strings; the
/// executor parses them where it needs numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub in_amount: String,
    pub output_mint: String,
    pub out_amount: String,
    #[serde(default)]
    pub other_amount_threshold: String,
    #[serde(default)]
    pub swap_mode: String,
    #[serde(default)]
    pub slippage_bps: u32,
    #[serde(default)]
    pub price_impact_pct: String,
    #[serde(default)]
    pub route_plan: Vec<RoutePlanStep>,
    #[serde(default)]
    pub context_slot: u64,
    #[serde(default)]
    pub time_taken: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanStep {
    pub swap_info: SwapInfo,
    pub percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    pub amm_key: String,
    pub label: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub fee_amount: String,
    pub fee_mint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: u64,
    #[serde(default)]
    prioritization_fee_lamports: u64,
}

impl JupiterClient {
    pub fn new(
        base_url: String,
        slippage_bps: u32,
        timeout: Duration,
        api_keys: Vec<String>,
    ) -> Result<Self> {
        let mut clients = Vec::with_capacity(CLIENT_POOL_SIZE);
        for _ in 0..CLIENT_POOL_SIZE {
            clients.push(
                reqwest::Client::builder()
                    .pool_max_idle_per_host(20)
                    .pool_idle_timeout(Duration::from_secs(90))
                    .timeout(timeout)
                    .build()
                    .context("build jupiter http client")?,
            );
        }
        info!(pool_size = CLIENT_POOL_SIZE, "jupiter client pool initialized");

        let api_keys = if api_keys.is_empty() {
            vec!["public-key".to_string()]
        } else {
            api_keys
        };

        Ok(Self {
            base_url,
            slippage_bps,
            clients,
            client_idx: AtomicU32::new(0),
            api_keys,
            key_idx: AtomicU32::new(0),
            max_lamports: AtomicU64::new(DEFAULT_MAX_PRIORITY_FEE_LAMPORTS),
            sim: RwLock::new(Simulation {
                enabled: false,
                multiplier: 1.0,
            }),
        })
    }

    /// Runtime toggle for simulated quotes and swap transactions.
    pub fn set_simulation(&self, enabled: bool, multiplier: f64) {
        let mut sim = self.sim.write().unwrap();
        sim.enabled = enabled;
        sim.multiplier = multiplier;
        info!(enabled, multiplier, "jupiter simulation mode configured");
    }

    pub fn set_max_priority_fee(&self, lamports: u64) {
        self.max_lamports.store(lamports, Ordering::Relaxed);
    }

    fn next_client(&self) -> &reqwest::Client {
        let idx = self.client_idx.fetch_add(1, Ordering::Relaxed) as usize;
        &self.clients[idx % self.clients.len()]
    }

    fn next_api_key(&self) -> &str {
        let idx = self.key_idx.fetch_add(1, Ordering::Relaxed) as usize;
        &self.api_keys[idx % self.api_keys.len()]
    }

    fn simulation(&self) -> Simulation {
        *self.sim.read().unwrap()
    }

    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse> {
        let sim = self.simulation();
        if sim.enabled {
            return Ok(simulated_quote(input_mint, output_mint, amount, sim.multiplier));
        }

        let start = Instant::now();
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, input_mint, output_mint, amount, self.slippage_bps
        );

        let response = self
            .next_client()
            .get(&url)
            .header("Accept", "application/json")
            .header("x-api-key", self.next_api_key())
            .send()
            .await
            .context("jupiter quote request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("quote failed ({}): {}", status, body));
        }

        let quote: QuoteResponse = response.json().await.context("decode quote")?;
        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            out_amount = %quote.out_amount,
            "jupiter quote"
        );
        Ok(quote)
    }

    /// Chains quote + swap and returns the pre-built base64 transaction,
    /// priced at veryHigh priority with a lamport cap.
    pub async fn get_swap_transaction(
        &self,
        input_mint: &str,
        output_mint: &str,
        user_pubkey: &str,
        amount: u64,
    ) -> Result<String> {
        if self.simulation().enabled {
            return Ok(simulated_swap_transaction());
        }

        let start = Instant::now();
        let quote = self
            .get_quote(input_mint, output_mint, amount)
            .await
            .context("get quote")?;
        let quote_ms = start.elapsed().as_millis() as u64;

        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": user_pubkey,
            "wrapAndUnwrapSol": true,
            // Let Jupiter size compute units and skip its own account lookups.
            "dynamicComputeUnitLimit": true,
            "skipUserAccountsRpcCalls": true,
            "prioritizationFeeLamports": {
                "priorityLevelWithMaxLamports": {
                    "priorityLevel": "veryHigh",
                    "maxLamports": self.max_lamports.load(Ordering::Relaxed),
                    "global": false,
                }
            },
        });

        let response = self
            .next_client()
            .post(format!("{}/swap", self.base_url))
            .header("Accept", "application/json")
            .header("x-api-key", self.next_api_key())
            .json(&body)
            .send()
            .await
            .context("jupiter swap request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("swap failed ({}): {}", status, body));
        }

        let swap: SwapResponse = response.json().await.context("decode swap response")?;
        info!(
            quote_ms,
            total_ms = start.elapsed().as_millis() as u64,
            priority_fee = swap.prioritization_fee_lamports,
            last_valid_height = swap.last_valid_block_height,
            "jupiter swap tx"
        );

        Ok(swap.swap_transaction)
    }
}

/// Synthetic quote for simulation mode. Checking the value of held tokens
/// (input != SOL) applies the price multiplier; buying from SOL returns a
/// 1:1 fill.
fn simulated_quote(
    input_mint: &str,
    output_mint: &str,
    amount: u64,
    multiplier: f64,
) -> QuoteResponse {
    let out_amount = if input_mint != SOL_MINT {
        format!("{:.0}", amount as f64 * multiplier)
    } else {
        amount.to_string()
    };

    QuoteResponse {
        input_mint: input_mint.to_string(),
        in_amount: amount.to_string(),
        output_mint: output_mint.to_string(),
        out_amount,
        other_amount_threshold: String::new(),
        swap_mode: String::new(),
        slippage_bps: 0,
        price_impact_pct: "0.0".to_string(),
        route_plan: Vec::new(),
        context_slot: 0,
        time_taken: 0.0,
    }
}

/// A fixed, well-formed dummy wire transaction: one signature slot (0x01),
/// 64 zero bytes, then a two-byte message. The signer can locate the
/// signature slot and message without special-casing simulation.
fn simulated_swap_transaction() -> String {
    let mut tx = Vec::with_capacity(67);
    tx.push(1u8);
    tx.extend_from_slice(&[0u8; 64]);
    tx.extend_from_slice(&[0u8, 1u8]);
    base64::encode(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_client(multiplier: f64) -> JupiterClient {
        let client = JupiterClient::new(
            "https://api.jup.ag/swap/v1".to_string(),
            500,
            Duration::from_secs(10),
            vec![],
        )
        .unwrap();
        client.set_simulation(true, multiplier);
        client
    }

    #[tokio::test]
    async fn test_sim_quote_buy_side_is_one_to_one() {
        let client = sim_client(2.5);
        let quote = client.get_quote(SOL_MINT, "SomeMint", 1_000_000).await.unwrap();
        assert_eq!(quote.out_amount, "1000000");
    }

    #[tokio::test]
    async fn test_sim_quote_value_side_applies_multiplier() {
        let client = sim_client(2.5);
        let quote = client.get_quote("SomeMint", SOL_MINT, 1_000_000).await.unwrap();
        assert_eq!(quote.out_amount, "2500000");
    }

    #[tokio::test]
    async fn test_sim_multiplier_toggle_at_runtime() {
        let client = sim_client(1.0);
        let quote = client.get_quote("SomeMint", SOL_MINT, 100).await.unwrap();
        assert_eq!(quote.out_amount, "100");

        client.set_simulation(true, 3.0);
        let quote = client.get_quote("SomeMint", SOL_MINT, 100).await.unwrap();
        assert_eq!(quote.out_amount, "300");
    }

    #[tokio::test]
    async fn test_sim_swap_transaction_is_well_formed() {
        let client = sim_client(1.0);
        let tx = client
            .get_swap_transaction(SOL_MINT, "SomeMint", "user", 100)
            .await
            .unwrap();

        let bytes = base64::decode(tx).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..65], &[0u8; 64][..]);
        assert!(bytes.len() > 65);
    }

    #[test]
    fn test_api_key_rotation_round_robin() {
        let client = JupiterClient::new(
            "url".to_string(),
            500,
            Duration::from_secs(10),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        )
        .unwrap();

        let keys: Vec<&str> = (0..6).map(|_| client.next_api_key()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_empty_key_list_gets_fallback() {
        let client =
            JupiterClient::new("url".to_string(), 500, Duration::from_secs(10), vec![]).unwrap();
        assert_eq!(client.next_api_key(), "public-key");
    }
}
