/// Translation of raw RPC/aggregator errors into operator-readable text

/// Human-readable transaction error with a suggested remediation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxError {
    pub raw: String,
    pub message: &'static str,
    pub action: &'static str,
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Maps known error substrings to (message, action) pairs. Unknown errors
/// fall through with a generic message and the raw text preserved.
pub fn parse_tx_error(raw: &str) -> TxError {
    let lower = raw.to_lowercase();
    let contains = |needle: &str| lower.contains(&needle.to_lowercase());

    let (message, action) = if contains("no record of a prior credit") {
        ("❌ INSUFFICIENT BALANCE - Wallet has 0 SOL", "Fund wallet with SOL")
    } else if contains("insufficient funds") {
        ("❌ INSUFFICIENT BALANCE - Not enough SOL for trade + fees", "Add more SOL to wallet")
    } else if contains("insufficient lamports") {
        ("❌ INSUFFICIENT BALANCE - Not enough lamports", "Add more SOL to wallet")
    } else if contains("ExceededSlippage") {
        ("❌ SLIPPAGE EXCEEDED - Market moved against you", "Try again or increase slippage")
    } else if contains("slippage") {
        ("❌ SLIPPAGE TOO HIGH - Price moved too much", "Increase slippage_bps in config")
    } else if contains("blockhash not found") {
        ("❌ BLOCKHASH EXPIRED - Transaction took too long", "Retry immediately")
    } else if contains("block height exceeded") {
        ("❌ TRANSACTION EXPIRED - Blockhash too old", "Retry immediately")
    } else if contains("429") {
        ("⚠️ RATE LIMITED - Too many requests", "Wait and retry")
    } else if contains("rate limit") {
        ("⚠️ RATE LIMITED - RPC throttled", "Wait 1-2 seconds and retry")
    } else if contains("account not found") || contains("AccountNotFound") {
        ("❌ TOKEN ACCOUNT NOT FOUND - You may not own this token", "Check if you have token balance")
    } else if contains("compute budget exceeded") {
        ("❌ OUT OF COMPUTE - Transaction too complex", "Increase compute unit limit")
    } else if contains("custom program error") {
        ("❌ PROGRAM ERROR - DEX rejected the swap", "Check token liquidity")
    } else if contains("0x1") {
        ("❌ INSUFFICIENT FUNDS IN POOL", "Token may have low liquidity")
    } else if contains("connection refused") {
        ("❌ RPC CONNECTION FAILED", "Check internet connection")
    } else if contains("timeout") || contains("timed out") {
        ("⚠️ RPC TIMEOUT - Network slow", "Retry")
    } else if contains("simulation failed") {
        ("❌ SIMULATION FAILED - Transaction would fail on-chain", "Check logs for specific reason")
    } else {
        ("❌ TRANSACTION FAILED", "Check raw error")
    };

    TxError {
        raw: raw.to_string(),
        message,
        action,
    }
}

pub fn human_error(err: &anyhow::Error) -> String {
    parse_tx_error(&format!("{:#}", err)).message.to_string()
}

pub fn human_error_with_action(err: &anyhow::Error) -> String {
    let tx_err = parse_tx_error(&format!("{:#}", err));
    format!("{} → {}", tx_err.message, tx_err.action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translates_insufficient_funds() {
        let err = parse_tx_error("Transfer: insufficient funds for fee");
        assert!(err.message.contains("INSUFFICIENT BALANCE"));
        assert_eq!(err.action, "Add more SOL to wallet");
    }

    #[test]
    fn test_translates_blockhash_expired() {
        let err = parse_tx_error("RPC error -32002: Blockhash not found");
        assert!(err.message.contains("BLOCKHASH EXPIRED"));
        assert_eq!(err.action, "Retry immediately");
    }

    #[test]
    fn test_exceeded_slippage_beats_generic_slippage() {
        let err = parse_tx_error("Program log: ExceededSlippage threshold");
        assert!(err.message.contains("SLIPPAGE EXCEEDED"));
    }

    #[test]
    fn test_translates_rate_limit_status() {
        let err = parse_tx_error("http status 429: too many requests");
        assert!(err.message.contains("RATE LIMITED"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let err = parse_tx_error("INSUFFICIENT FUNDS detected");
        assert!(err.message.contains("INSUFFICIENT BALANCE"));
    }

    #[test]
    fn test_unknown_error_keeps_raw() {
        let err = parse_tx_error("some novel failure mode");
        assert_eq!(err.message, "❌ TRANSACTION FAILED");
        assert_eq!(err.raw, "some novel failure mode");
    }

    #[test]
    fn test_human_error_with_action_format() {
        let err = anyhow::anyhow!("simulation failed: InstructionError");
        let text = human_error_with_action(&err);
        assert!(text.contains("SIMULATION FAILED"));
        assert!(text.contains(" → "));
    }
}
