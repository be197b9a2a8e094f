//! Transactional outbox: the record format and the relay that drains it.

pub mod record;
pub mod relay;

pub use record::{OutboxRecord, OutboxStatus};
pub use relay::{OutboxRelay, ProcessOutcome, RelayError, RelayHandle};
