/// Regex classifier for free-form chat messages
///
/// Two shapes are recognized: "TOKEN is up 57%" entries and
/// "TOKEN 2.3X" / "TOKEN hit 2X" exits. Anything else is silently ignored.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Signal, SignalType};

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Za-z][A-Za-z0-9_$]{1,19})\s+is\s+up\s+(\d+(?:\.\d+)?)\s*%").unwrap()
});

static EXIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Za-z][A-Za-z0-9_$]{1,19})\s+(?:hit\s+)?(\d+(?:\.\d+)?)\s*x\b").unwrap()
});

// Solana mints render as 43-44 base58 characters.
static MINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[1-9A-HJ-NP-Za-km-z]{43,44}\b").unwrap());

// Words the token-name capture must never swallow ("hit 2X" etc).
const RESERVED_WORDS: &[&str] = &["hit", "up", "is", "ca"];

#[derive(Debug, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Extracts a signal from raw message text. Unparseable input yields
    /// `None`, never an error.
    pub fn parse(&self, text: &str, msg_id: i64) -> Option<Signal> {
        let mint = MINT_RE
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        if let Some(caps) = ENTRY_RE.captures(text) {
            let token_name = caps[1].to_uppercase();
            if !RESERVED_WORDS.contains(&token_name.to_lowercase().as_str()) {
                let value: f64 = caps[2].parse().ok()?;
                return Some(Signal {
                    token_name,
                    mint,
                    signal_type: SignalType::Other,
                    value,
                    unit: "%".to_string(),
                    msg_id,
                    timestamp: 0,
                });
            }
        }

        if let Some(caps) = EXIT_RE.captures(text) {
            let token_name = caps[1].to_uppercase();
            if !RESERVED_WORDS.contains(&token_name.to_lowercase().as_str()) {
                let value: f64 = caps[2].parse().ok()?;
                return Some(Signal {
                    token_name,
                    mint,
                    signal_type: SignalType::Other,
                    value,
                    unit: "X".to_string(),
                    msg_id,
                    timestamp: 0,
                });
            }
        }

        None
    }

    /// Tags the signal with its trading intent. Only entries at or above
    /// `min_entry` percent and exits at or above `take_profit` multiples
    /// are actionable; everything else stays `Other`.
    pub fn classify(&self, signal: &mut Signal, min_entry: f64, take_profit: f64) {
        signal.signal_type = if signal.unit == "%" && signal.value >= min_entry {
            SignalType::Entry
        } else if signal.unit == "X" && signal.value >= take_profit {
            SignalType::Exit
        } else {
            SignalType::Other
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_and_classify(text: &str) -> Option<Signal> {
        let parser = Parser::new();
        let mut sig = parser.parse(text, 1)?;
        parser.classify(&mut sig, 50.0, 2.0);
        Some(sig)
    }

    #[test]
    fn test_parse_entry() {
        let sig = parse_and_classify("🚀 BONK is up 57% in the last hour").unwrap();
        assert_eq!(sig.token_name, "BONK");
        assert_eq!(sig.value, 57.0);
        assert_eq!(sig.unit, "%");
        assert_eq!(sig.signal_type, SignalType::Entry);
        assert!(sig.mint.is_empty());
    }

    #[test]
    fn test_parse_entry_below_threshold_is_other() {
        let sig = parse_and_classify("FOO is up 30%").unwrap();
        assert_eq!(sig.signal_type, SignalType::Other);
        assert_eq!(sig.value, 30.0);
    }

    #[test]
    fn test_parse_exit_multiple() {
        let sig = parse_and_classify("BONK 2.3X 🎉").unwrap();
        assert_eq!(sig.token_name, "BONK");
        assert_eq!(sig.value, 2.3);
        assert_eq!(sig.unit, "X");
        assert_eq!(sig.signal_type, SignalType::Exit);
    }

    #[test]
    fn test_parse_exit_hit_phrasing() {
        let sig = parse_and_classify("BONK hit 2X").unwrap();
        assert_eq!(sig.token_name, "BONK");
        assert_eq!(sig.value, 2.0);
        assert_eq!(sig.signal_type, SignalType::Exit);
    }

    #[test]
    fn test_parse_exit_below_take_profit_is_other() {
        let sig = parse_and_classify("BONK 1.4X").unwrap();
        assert_eq!(sig.signal_type, SignalType::Other);
    }

    #[test]
    fn test_parse_garbage_returns_none() {
        let parser = Parser::new();
        assert!(parser.parse("gm everyone", 1).is_none());
        assert!(parser.parse("", 2).is_none());
        assert!(parser.parse("1000 holders milestone", 3).is_none());
    }

    #[test]
    fn test_parse_extracts_mint() {
        let text = "BONK is up 57% CA: DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
        let sig = parse_and_classify(text).unwrap();
        assert_eq!(sig.mint, "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263");
        assert_eq!(sig.token_name, "BONK");
    }

    #[test]
    fn test_parse_idempotent_roundtrip() {
        let parser = Parser::new();
        let texts = [
            "BONK is up 57%",
            "WIF 2.5X",
            "PEPE is up 120% CA: DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263",
        ];
        for text in texts {
            let first = parser.parse(text, 9).unwrap();
            let second = parser.parse(&first.signal_text(), 9).unwrap();
            assert_eq!(first, second, "roundtrip mismatch for {:?}", text);
        }
    }

    #[test]
    fn test_mint_only_message_not_a_signal() {
        let parser = Parser::new();
        // A bare contract address without a magnitude should not trade.
        let sig = parser.parse("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", 4);
        assert!(sig.is_none());
    }
}
