//! Saga state machine mechanics (no business rules).
//!
//! - Explicit, persisted state per saga instance
//! - Transitions are checked; terminal states never move again
//! - Compensation is a first-class terminal outcome, not an error
//!
//! Infra is responsible for persisting [`SagaState`] and running the side
//! effects between transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use eventrail_core::{EventId, SagaId, TraceId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    EligibilityCheck,
    Assigned,
    Compensated,
}

impl SagaStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Assigned | SagaStatus::Compensated)
    }

    /// Allowed edges:
    /// `pending → eligibility_check → assigned`, and any non-terminal state
    /// → `compensated`.
    pub fn can_transition_to(self, next: SagaStatus) -> bool {
        match (self, next) {
            (SagaStatus::Pending, SagaStatus::EligibilityCheck) => true,
            (SagaStatus::EligibilityCheck, SagaStatus::Assigned) => true,
            (from, SagaStatus::Compensated) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid saga transition {from:?} -> {to:?}")]
pub struct SagaTransitionError {
    pub from: SagaStatus,
    pub to: SagaStatus,
}

/// Persisted state of one saga instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaState {
    pub saga_id: SagaId,
    pub saga_type: String,
    /// Business key the saga was started for (e.g. a schedule item id).
    pub correlation_id: String,
    pub trace_id: TraceId,
    pub status: SagaStatus,
    pub current_step: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_member_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_reason: Option<String>,
    /// Id of the compensating event, fixed when compensation is recorded so
    /// that re-emitting it overwrites rather than duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_event_id: Option<EventId>,
}

impl SagaState {
    pub const STEP_STARTED: &'static str = "started";
    pub const STEP_RECEIVE_PROPOSAL: &'static str = "receive_proposal";
    pub const STEP_EVALUATE: &'static str = "evaluate";
    pub const STEP_COMPENSATE: &'static str = "compensate";

    pub fn new(
        saga_id: SagaId,
        saga_type: impl Into<String>,
        correlation_id: impl Into<String>,
        trace_id: TraceId,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            saga_type: saga_type.into(),
            correlation_id: correlation_id.into(),
            trace_id,
            status: SagaStatus::Pending,
            current_step: Self::STEP_STARTED.to_string(),
            created_at: now,
            updated_at: now,
            assigned_member_id: None,
            compensation_reason: None,
            compensation_event_id: None,
        }
    }

    fn transition(&mut self, to: SagaStatus, step: &str) -> Result<(), SagaTransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(SagaTransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.current_step = step.to_string();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `pending → eligibility_check`.
    pub fn receive_proposal(&mut self) -> Result<(), SagaTransitionError> {
        self.transition(SagaStatus::EligibilityCheck, Self::STEP_RECEIVE_PROPOSAL)
    }

    /// `eligibility_check → assigned`.
    pub fn assign(&mut self, member_id: impl Into<String>) -> Result<(), SagaTransitionError> {
        self.transition(SagaStatus::Assigned, Self::STEP_EVALUATE)?;
        self.assigned_member_id = Some(member_id.into());
        Ok(())
    }

    /// Any non-terminal state `→ compensated`.
    pub fn compensate(&mut self, reason: impl Into<String>) -> Result<(), SagaTransitionError> {
        self.transition(SagaStatus::Compensated, Self::STEP_COMPENSATE)?;
        self.compensation_reason = Some(reason.into());
        self.compensation_event_id = Some(EventId::new());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SagaState {
        SagaState::new(
            SagaId::derive("scheduling", "item-1"),
            "scheduling",
            "item-1",
            TraceId::parse("trace-1").unwrap(),
        )
    }

    #[test]
    fn happy_path_reaches_assigned() {
        let mut s = state();
        s.receive_proposal().unwrap();
        assert_eq!(s.status, SagaStatus::EligibilityCheck);
        s.assign("member-9").unwrap();
        assert_eq!(s.status, SagaStatus::Assigned);
        assert_eq!(s.assigned_member_id.as_deref(), Some("member-9"));
        assert!(s.is_terminal());
    }

    #[test]
    fn cannot_assign_before_eligibility_check() {
        let mut s = state();
        let err = s.assign("member-9").unwrap_err();
        assert_eq!(err.from, SagaStatus::Pending);
        assert_eq!(err.to, SagaStatus::Assigned);
    }

    #[test]
    fn terminal_states_never_move() {
        let mut s = state();
        s.compensate("no candidates").unwrap();
        let event_id = s.compensation_event_id;
        assert!(event_id.is_some());
        assert!(s.compensate("again").is_err());
        assert!(s.receive_proposal().is_err());
        assert_eq!(s.compensation_reason.as_deref(), Some("no candidates"));
        assert_eq!(s.compensation_event_id, event_id);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SagaStatus::EligibilityCheck).unwrap(),
            "\"eligibility_check\""
        );
    }
}
