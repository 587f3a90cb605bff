//! Infrastructure layer: stores, the inventory engine and its configuration.

pub mod config;
pub mod engine;
pub mod store;


pub use config::{ConfigError, EngineConfig, StoreConfig};
pub use engine::{AdjustmentOutcome, BatchOutcome, InventoryEngine, Reconciliation};
