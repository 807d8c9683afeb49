//! Configuration models for the broker, its store backend and timeouts.

pub mod broker;

pub use broker::{BrokerConfig, StoreBackendConfig};
