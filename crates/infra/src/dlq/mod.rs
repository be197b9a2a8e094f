//! Dead-letter queue: entries, tier processors and the worker that drives them.
//!
//! ## Flow
//!
//! 1. The outbox relay writes a [`DlqEntry`] (tier resolved from the event
//!    type) and optionally fires a best-effort notify.
//! 2. [`DlqWorker`] sees the new entry on the DLQ change feed and dispatches
//!    it to the processor for its tier.
//! 3. The processor annotates the entry; entries are never deleted.

pub mod entry;
pub mod ledger;
pub mod notify;
pub mod processors;
pub mod records;
pub mod worker;

use thiserror::Error;

use eventrail_events::DlqTier;

use crate::store::StoreError;

pub use entry::{DlqEntry, DlqStatus, FailureKind};
pub use ledger::{DeliveredVia, DeliveryLedger, DeliveryLedgerEntry};
pub use notify::{DlqNotifier, HttpDlqNotifier, NotifyError, notify_in_background};
pub use processors::{ReviewRequiredProcessor, SafeAutoProcessor, SecurityBlockProcessor};
pub use records::{FrozenEntity, ReviewRequest, SecurityAlert, SecurityIncident, Severity};
pub use worker::{DlqWorker, SweepReport};

#[derive(Debug, Error)]
pub enum DlqError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("entry {dlq_id} is {found}, processor handles {expected}")]
    TierMismatch {
        dlq_id: String,
        expected: DlqTier,
        found: DlqTier,
    },
}
