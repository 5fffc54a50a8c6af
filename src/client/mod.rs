/// Real-time subscription layer over the provider's Solana WebSocket

pub mod price_feed;
pub mod wallet_monitor;
pub mod websocket;

pub use price_feed::{PoolReserves, PriceFeed, PriceUpdate};
pub use wallet_monitor::{BalanceUpdate, TxConfirmation, WalletMonitor};
pub use websocket::WsClient;
