//! Infrastructure layer: document stores, outbox relay, delivery, DLQ,
//! projections, sagas and configuration.

pub mod config;
pub mod delivery;
pub mod dlq;
pub mod outbox;
pub mod projections;
pub mod saga;
pub mod store;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, EventrailConfig};
pub use workers::WorkerHandle;
