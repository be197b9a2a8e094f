use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventrail_core::DlqId;
use eventrail_events::{DlqTier, EventEnvelope, Lane};

use crate::outbox::OutboxRecord;

/// Why a record was dead-lettered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stored envelope could not be deserialized. Never retried.
    Corruption,
    /// Every delivery attempt failed.
    DeliveryExhausted,
}

/// Processing annotation written by the tier processors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    /// Written by the relay, not yet picked up by a processor.
    Pending,
    AlreadyDelivered,
    Replayed,
    ReplayFailed,
    AwaitingReview,
    SecurityBlocked,
}

impl DlqStatus {
    pub fn is_processed(self) -> bool {
        !matches!(self, DlqStatus::Pending)
    }
}

/// Dead-letter entry, one per failed outbox document.
///
/// The original serialized envelope is kept byte-for-byte so a replay carries
/// the original idempotency key. Entries are never deleted; processors only
/// annotate `status`/`notes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEntry {
    dlq_id: DlqId,
    dlq_level: DlqTier,
    source_lane: Lane,
    source_collection: String,
    source_doc_id: String,
    event_type: String,
    envelope: String,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    aggregate_id: Option<String>,
    failure_kind: FailureKind,
    first_failed_at: DateTime<Utc>,
    attempt_count: u32,
    last_error: String,
    status: DlqStatus,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    notes: Vec<String>,
}

impl DlqEntry {
    /// Build an entry for a failed outbox document.
    ///
    /// `parsed` is the envelope when it could be deserialized; the tier is
    /// always taken from the record's event type so corrupt envelopes are
    /// still tiered.
    pub fn from_outbox(
        source_collection: &str,
        doc_id: &str,
        record: &OutboxRecord,
        parsed: Option<&EventEnvelope>,
        failure_kind: FailureKind,
        last_error: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            dlq_id: DlqId::for_source(source_collection, doc_id),
            dlq_level: DlqTier::for_event_type(&record.event_type),
            source_lane: record.lane,
            source_collection: source_collection.to_string(),
            source_doc_id: doc_id.to_string(),
            event_type: record.event_type.clone(),
            envelope: record.envelope.clone(),
            idempotency_key: parsed.map(|e| e.idempotency_key().to_string()),
            aggregate_id: parsed.map(|e| e.aggregate_id().to_string()),
            failure_kind,
            first_failed_at: record.first_failed_at.unwrap_or(now),
            attempt_count: record.attempt_count,
            last_error: last_error.into(),
            status: DlqStatus::Pending,
            updated_at: now,
            notes: Vec::new(),
        }
    }

    pub fn dlq_id(&self) -> &DlqId {
        &self.dlq_id
    }

    pub fn dlq_level(&self) -> DlqTier {
        self.dlq_level
    }

    pub fn source_lane(&self) -> Lane {
        self.source_lane
    }

    pub fn source_collection(&self) -> &str {
        &self.source_collection
    }

    pub fn source_doc_id(&self) -> &str {
        &self.source_doc_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The original serialized envelope, unmodified.
    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn failure_kind(&self) -> FailureKind {
        self.failure_kind
    }

    pub fn first_failed_at(&self) -> DateTime<Utc> {
        self.first_failed_at
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn status(&self) -> DlqStatus {
        self.status
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Record a processing outcome.
    pub fn annotate(&mut self, status: DlqStatus, note: impl Into<String>) {
        self.status = status;
        self.updated_at = Utc::now();
        self.notes.push(note.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventrail_core::{AggregateId, EventId, TraceId};

    #[test]
    fn corrupt_envelope_is_tiered_from_record_metadata() {
        let record = OutboxRecord::from_raw("{oops", "role.granted", Lane::Critical);
        let entry =
            DlqEntry::from_outbox("outbox", "doc-1", &record, None, FailureKind::Corruption, "bad");

        assert_eq!(entry.dlq_id().as_str(), "outbox__doc-1");
        assert_eq!(entry.dlq_level(), DlqTier::SecurityBlock);
        assert_eq!(entry.envelope(), "{oops");
        assert!(entry.idempotency_key().is_none());
        assert_eq!(entry.status(), DlqStatus::Pending);
    }

    #[test]
    fn parsed_envelope_contributes_idempotency_key() {
        let env = EventEnvelope::new(
            EventId::new(),
            AggregateId::parse("wallet-1").unwrap(),
            2,
            TraceId::parse("t").unwrap(),
            "wallet.debited",
            serde_json::json!({ "amount": 5 }),
        );
        let record = OutboxRecord::pending(&env).unwrap();
        let entry = DlqEntry::from_outbox(
            "outbox",
            "doc-2",
            &record,
            Some(&env),
            FailureKind::DeliveryExhausted,
            "timeout",
        );

        assert_eq!(entry.idempotency_key(), Some(env.idempotency_key()));
        assert_eq!(entry.aggregate_id(), Some("wallet-1"));
        assert_eq!(entry.envelope(), record.envelope);
    }
}
