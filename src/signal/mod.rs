/// Signal types, parsing and ingress

pub mod parser;
pub mod server;

pub use parser::Parser;
pub use server::SignalServer;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Entry,
    Exit,
    Other,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Entry => "ENTRY",
            SignalType::Exit => "EXIT",
            SignalType::Other => "OTHER",
        }
    }
}

/// A parsed trading signal. Immutable once it leaves the ingress layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub token_name: String,
    /// Base58 mint address; empty when the message carried none.
    pub mint: String,
    pub signal_type: SignalType,
    pub value: f64,
    /// "%" for entry magnitudes, "X" for exit multiples.
    pub unit: String,
    pub msg_id: i64,
    pub timestamp: i64,
}

impl Signal {
    /// Canonical textual form. Feeding this back through the parser yields
    /// an equal signal (modulo classification inputs).
    pub fn signal_text(&self) -> String {
        let base = if self.unit == "%" {
            format!("{} is up {}%", self.token_name, self.value)
        } else {
            format!("{} {}X", self.token_name, self.value)
        };
        if self.mint.is_empty() {
            base
        } else {
            format!("{} CA: {}", base, self.mint)
        }
    }
}
