use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use eventrail_core::{AggregateId, EventId, TraceId};

use crate::{DlqTier, Lane};

/// Envelope for an event, carrying identity, versioning and trace metadata.
///
/// This is the unit aggregates serialize into an outbox record and the unit
/// every downstream component consumes.
///
/// Notes:
/// - **Immutable**: fields are private and there are no setters; an envelope
///   is never mutated in transit.
/// - `aggregate_version` is monotonically increasing per aggregate.
/// - `trace_id` is assigned once upstream and never regenerated.
/// - `idempotency_key` is computed at construction and kept verbatim through
///   serialization, so a dead-letter replay carries the original key.
/// - `dlq_tier` is resolved from `event_type` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<E = JsonValue> {
    event_id: EventId,
    aggregate_id: AggregateId,

    /// Monotonically increasing version of the aggregate that emitted the event.
    aggregate_version: u64,

    trace_id: TraceId,
    event_type: String,
    payload: E,
    idempotency_key: String,
    lane: Lane,
    dlq_tier: DlqTier,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Compose the idempotency key for an event.
pub fn idempotency_key(event_id: &EventId, aggregate_id: &AggregateId, version: u64) -> String {
    format!("{event_id}:{aggregate_id}:{version}")
}

impl<E> EventEnvelope<E> {
    /// Build an envelope on the default lane.
    pub fn new(
        event_id: EventId,
        aggregate_id: AggregateId,
        aggregate_version: u64,
        trace_id: TraceId,
        event_type: impl Into<String>,
        payload: E,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            idempotency_key: idempotency_key(&event_id, &aggregate_id, aggregate_version),
            dlq_tier: DlqTier::for_event_type(&event_type),
            event_id,
            aggregate_id,
            aggregate_version,
            trace_id,
            event_type,
            payload,
            lane: Lane::default(),
            created_at: Utc::now(),
        }
    }

    /// Place the envelope on a lane. Only used while building, before the
    /// envelope is written to an outbox.
    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }

    /// Pin the creation time (tests, imports).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn aggregate_version(&self) -> u64 {
        self.aggregate_version
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn dlq_tier(&self) -> DlqTier {
        self.dlq_tier
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl<E> EventEnvelope<E>
where
    E: Serialize + serde::de::DeserializeOwned,
{
    /// Serialize for storage in an outbox record.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a stored envelope. Any failure is treated as corruption.
    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_types;

    fn sample() -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            AggregateId::parse("wallet-1").unwrap(),
            4,
            TraceId::parse("trace-1").unwrap(),
            event_types::WALLET_CREDITED,
            serde_json::json!({ "amount": 10 }),
        )
        .with_lane(Lane::Critical)
    }

    #[test]
    fn idempotency_key_combines_event_aggregate_and_version() {
        let env = sample();
        let expected = format!("{}:wallet-1:4", env.event_id());
        assert_eq!(env.idempotency_key(), expected);
    }

    #[test]
    fn tier_is_resolved_from_event_type() {
        assert_eq!(sample().dlq_tier(), DlqTier::ReviewRequired);
    }

    #[test]
    fn json_round_trip_keeps_identity_and_trace() {
        let env = sample();
        let raw = env.to_json().unwrap();
        assert!(raw.contains("\"idempotencyKey\""));
        assert!(raw.contains("\"lane\":\"CRITICAL\""));

        let back = EventEnvelope::<JsonValue>::from_json(&raw).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn stored_idempotency_key_is_kept_verbatim() {
        let env = sample();
        let mut doc: JsonValue = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        doc["idempotencyKey"] = JsonValue::String("legacy-key".into());

        let back = EventEnvelope::<JsonValue>::from_json(&doc.to_string()).unwrap();
        assert_eq!(back.idempotency_key(), "legacy-key");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(EventEnvelope::<JsonValue>::from_json("{not json").is_err());
        assert!(EventEnvelope::<JsonValue>::from_json("{\"eventId\":1}").is_err());
    }
}
