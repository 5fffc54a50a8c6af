/// Trade execution: aggregator client, positions, executor, latency metrics

pub mod executor;
pub mod jupiter_client;
pub mod metrics;
pub mod position;

pub use executor::FastExecutor;
pub use jupiter_client::{JupiterClient, QuoteResponse, SOL_MINT};
pub use metrics::{Metrics, TradeTimer};
pub use position::{Position, PositionSnapshot, PositionTracker};
