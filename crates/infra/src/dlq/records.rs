//! Records written by the REVIEW_REQUIRED and SECURITY_BLOCK processors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use eventrail_core::DlqId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    AwaitingReview,
}

/// Operator review request for a REVIEW_REQUIRED entry.
///
/// Approving it is an operator action outside this workspace; the replay it
/// triggers must reuse `idempotency_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub review_id: String,
    pub dlq_id: DlqId,
    pub idempotency_key: Option<String>,
    pub event_type: String,
    pub requested_at: DateTime<Utc>,
    pub status: ReviewStatus,
}

/// Marker that blocks further writes to an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenEntity {
    pub aggregate_id: String,
    pub dlq_id: DlqId,
    pub reason: String,
    pub frozen_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    pub alert_id: String,
    pub severity: Severity,
    pub dlq_id: DlqId,
    pub event_type: String,
    pub aggregate_id: Option<String>,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// `autoReplayEnabled` of a security incident.
///
/// Always serializes as `false`, and a stored `true` fails to deserialize,
/// so no code path can produce an incident that allows automatic replay.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AutoReplayDisabled;

impl Serialize for AutoReplayDisabled {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(false)
    }
}

impl<'de> Deserialize<'de> for AutoReplayDisabled {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            return Err(serde::de::Error::custom(
                "security incidents never enable auto replay",
            ));
        }
        Ok(AutoReplayDisabled)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIncident {
    incident_id: String,
    dlq_id: DlqId,
    event_type: String,
    aggregate_id: Option<String>,
    idempotency_key: Option<String>,
    status: IncidentStatus,
    opened_at: DateTime<Utc>,
    auto_replay_enabled: AutoReplayDisabled,
}

impl SecurityIncident {
    pub fn open(
        dlq_id: DlqId,
        event_type: impl Into<String>,
        aggregate_id: Option<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            incident_id: format!("incident__{dlq_id}"),
            dlq_id,
            event_type: event_type.into(),
            aggregate_id,
            idempotency_key,
            status: IncidentStatus::Open,
            opened_at: Utc::now(),
            auto_replay_enabled: AutoReplayDisabled,
        }
    }

    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    pub fn dlq_id(&self) -> &DlqId {
        &self.dlq_id
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn status(&self) -> IncidentStatus {
        self.status
    }

    pub fn auto_replay_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_serializes_auto_replay_false() {
        let incident = SecurityIncident::open(
            DlqId::for_source("outbox", "d1"),
            "role.granted",
            Some("member-1".into()),
            None,
        );
        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["autoReplayEnabled"], serde_json::json!(false));
        assert!(!incident.auto_replay_enabled());
    }

    #[test]
    fn stored_incident_with_auto_replay_true_is_rejected() {
        let incident = SecurityIncident::open(
            DlqId::for_source("outbox", "d1"),
            "claims.updated",
            None,
            None,
        );
        let mut json = serde_json::to_value(&incident).unwrap();
        json["autoReplayEnabled"] = serde_json::json!(true);

        assert!(serde_json::from_value::<SecurityIncident>(json).is_err());
    }
}
