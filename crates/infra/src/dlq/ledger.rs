//! Delivery ledger keyed by idempotency key.
//!
//! The relay records every successful delivery; the SAFE_AUTO processor
//! consults the ledger before replaying so a replay of an event that did get
//! through is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventrail_core::EventId;
use eventrail_events::EventEnvelope;

use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveredVia {
    Relay,
    Replay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLedgerEntry {
    pub idempotency_key: String,
    pub event_id: EventId,
    pub event_type: String,
    pub delivered_at: DateTime<Utc>,
    pub via: DeliveredVia,
}

#[derive(Clone)]
pub struct DeliveryLedger {
    store: Arc<dyn DocumentStore<DeliveryLedgerEntry>>,
}

impl DeliveryLedger {
    pub fn new(store: Arc<dyn DocumentStore<DeliveryLedgerEntry>>) -> Self {
        Self { store }
    }

    pub async fn contains(&self, idempotency_key: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(idempotency_key).await?.is_some())
    }

    /// Record a delivery. The first record for a key wins.
    pub async fn record(
        &self,
        envelope: &EventEnvelope,
        via: DeliveredVia,
    ) -> Result<(), StoreError> {
        let entry = DeliveryLedgerEntry {
            idempotency_key: envelope.idempotency_key().to_string(),
            event_id: envelope.event_id(),
            event_type: envelope.event_type().to_string(),
            delivered_at: Utc::now(),
            via,
        };
        self.store.create(envelope.idempotency_key(), entry).await?;
        Ok(())
    }
}

impl core::fmt::Debug for DeliveryLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeliveryLedger")
            .field("collection", &self.store.name())
            .finish()
    }
}
