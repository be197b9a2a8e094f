use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventrail_events::{EnvelopeError, EventEnvelope, Lane};

/// Lifecycle of an outbox record. Terminal at `Delivered` and `Dlq`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Dlq,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

/// Durable outbox record written by an aggregate, mutated only by the relay.
///
/// `event_type` and `lane` duplicate what the envelope carries so a record
/// whose envelope no longer parses can still be tiered and routed to the DLQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub envelope: String,
    pub event_type: String,
    pub lane: Lane,
    pub status: OutboxStatus,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub first_failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// A fresh pending record for `envelope`.
    pub fn pending(envelope: &EventEnvelope) -> Result<Self, EnvelopeError> {
        Ok(Self::from_raw(
            envelope.to_json()?,
            envelope.event_type(),
            envelope.lane(),
        ))
    }

    /// A pending record around an already-serialized envelope.
    pub fn from_raw(envelope: impl Into<String>, event_type: impl Into<String>, lane: Lane) -> Self {
        Self {
            envelope: envelope.into(),
            event_type: event_type.into(),
            lane,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
            first_failed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn parse_envelope(&self) -> Result<EventEnvelope, EnvelopeError> {
        EventEnvelope::from_json(&self.envelope)
    }

    /// Record a delivery attempt and its outcome.
    pub(crate) fn record_attempt(&mut self, status: OutboxStatus, error: Option<String>) {
        let now = Utc::now();
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        if error.is_some() && self.first_failed_at.is_none() {
            self.first_failed_at = Some(now);
        }
        self.last_error = error;
        self.status = status;
    }
}
