/// Message passing between ingress and executor

pub mod signal_bus;

pub use signal_bus::SignalBus;
