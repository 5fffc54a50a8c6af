use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::signal::Signal;

/// Bounded hand-off from the ingress server to the executor. The ingress
/// side never blocks: when the channel is full the signal is dropped.
#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: mpsc::Sender<Signal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Signal>) {
        let (tx, rx) = mpsc::channel(capacity);
        debug!(capacity, "signal bus initialized");
        (Self { tx }, rx)
    }

    /// Non-blocking publish. Returns false if the channel was full and the
    /// signal was dropped.
    pub fn publish(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                warn!(
                    token = %signal.token_name,
                    msg_id = signal.msg_id,
                    "signal channel full, dropping signal"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                warn!(
                    token = %signal.token_name,
                    msg_id = signal.msg_id,
                    "signal channel closed, dropping signal"
                );
                false
            }
        }
    }
}
