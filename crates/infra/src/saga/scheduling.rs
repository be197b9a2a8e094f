//! Scheduling saga.
//!
//! Orchestrates the flow:
//! 1. Proposal submitted → accept proposal (`pending → eligibility_check`)
//! 2. Eligibility check → pick the first qualifying candidate
//! 3. Candidate confirmed → `assigned`
//!
//! Compensating action: no candidate, a rejected assignment or an
//! unreachable command side closes the proposal (`compensated`) and emits
//! `schedule.proposal.compensated` into the projection funnel. The saga does
//! not own the schedule item's stream, so the close is an annotation on the
//! item's view rather than a new version. Re-delivery of a compensated
//! trigger re-emits the close under the same event id.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use eventrail_core::{AggregateId, SagaId};
use eventrail_events::event_types::{SCHEDULE_PROPOSAL_COMPENSATED, SCHEDULE_PROPOSAL_SUBMITTED};
use eventrail_events::{EventEnvelope, EventHandler, Lane, Router, SagaState, SagaStatus, Selector, Subscription};

use super::{AssignmentOutcome, CandidateDirectory, SagaError, SchedulingCommands, SkillRequirement};
use crate::projections::ProjectionFunnel;
use crate::store::{CreateOutcome, DocumentStore};

pub const SAGA_TYPE: &str = "scheduling";

/// Payload of `schedule.proposal.submitted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSubmitted {
    pub schedule_item_id: String,
    pub proposal_id: String,
    #[serde(default)]
    pub required_skills: Vec<SkillRequirement>,
}

impl ProposalSubmitted {
    fn parse(envelope: &EventEnvelope) -> Result<Self, SagaError> {
        let proposal: Self = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SagaError::InvalidProposal(e.to_string()))?;
        if proposal.schedule_item_id.trim().is_empty() {
            return Err(SagaError::InvalidProposal("scheduleItemId is blank".into()));
        }
        Ok(proposal)
    }
}

pub struct SchedulingSaga {
    states: Arc<dyn DocumentStore<SagaState>>,
    commands: Arc<dyn SchedulingCommands>,
    candidates: Arc<dyn CandidateDirectory>,
    funnel: Arc<ProjectionFunnel>,
}

impl SchedulingSaga {
    pub fn new(
        states: Arc<dyn DocumentStore<SagaState>>,
        commands: Arc<dyn SchedulingCommands>,
        candidates: Arc<dyn CandidateDirectory>,
        funnel: Arc<ProjectionFunnel>,
    ) -> Self {
        Self {
            states,
            commands,
            candidates,
            funnel,
        }
    }

    pub fn saga_id(schedule_item_id: &str) -> SagaId {
        SagaId::derive(SAGA_TYPE, schedule_item_id)
    }

    /// Subscribe the saga to proposal submissions on every lane.
    pub fn register(self: &Arc<Self>, router: &Router) -> Subscription {
        router.register_subscriber(SCHEDULE_PROPOSAL_SUBMITTED, Selector::Any, self.clone())
    }

    /// Run the saga for a submitted proposal.
    ///
    /// Re-delivery of the same trigger returns the stored state untouched.
    pub async fn start(&self, envelope: &EventEnvelope) -> Result<SagaState, SagaError> {
        if envelope.event_type() != SCHEDULE_PROPOSAL_SUBMITTED {
            return Err(SagaError::UnexpectedEventType(envelope.event_type().to_string()));
        }
        let proposal = ProposalSubmitted::parse(envelope)?;
        let saga_id = Self::saga_id(&proposal.schedule_item_id);

        let fresh = SagaState::new(
            saga_id.clone(),
            SAGA_TYPE,
            proposal.schedule_item_id.clone(),
            envelope.trace_id().clone(),
        );
        let mut state = match self.states.create(saga_id.as_str(), fresh).await? {
            CreateOutcome::Created(state) => state,
            CreateOutcome::Existing(state) => {
                info!(saga_id = %saga_id, status = ?state.status, "saga already started; ignoring trigger");
                if state.status == SagaStatus::Compensated {
                    self.emit_compensation(&state, envelope, &proposal).await?;
                }
                return Ok(state);
            }
        };
        info!(
            saga_id = %saga_id,
            trace_id = %envelope.trace_id(),
            proposal_id = %proposal.proposal_id,
            "scheduling saga started"
        );

        let trace_id = envelope.trace_id();
        if let Err(err) = self
            .commands
            .accept_proposal(&proposal.schedule_item_id, &proposal.proposal_id, trace_id)
            .await
        {
            let reason = format!("accept proposal failed: {err}");
            return self.compensate(state, envelope, &proposal, reason).await;
        }
        state.receive_proposal()?;
        self.persist(&state).await?;

        let candidates = self
            .candidates
            .eligible_candidates(&proposal.required_skills)
            .await?;
        let Some(candidate) = candidates
            .iter()
            .find(|c| c.satisfies_all(&proposal.required_skills))
        else {
            let reason = unmet_reason(&proposal.required_skills, &candidates);
            return self.compensate(state, envelope, &proposal, reason).await;
        };

        match self
            .commands
            .assign(&proposal.schedule_item_id, &candidate.member_id, trace_id)
            .await
        {
            Ok(AssignmentOutcome::Confirmed) => {
                state.assign(candidate.member_id.clone())?;
                self.persist(&state).await?;
                info!(
                    saga_id = %saga_id,
                    trace_id = %trace_id,
                    member_id = %candidate.member_id,
                    "schedule item assigned"
                );
                Ok(state)
            }
            Ok(AssignmentOutcome::Rejected { reason }) => {
                self.compensate(state, envelope, &proposal, reason).await
            }
            Err(err) => {
                let reason = format!("assignment command failed: {err}");
                self.compensate(state, envelope, &proposal, reason).await
            }
        }
    }

    async fn persist(&self, state: &SagaState) -> Result<(), SagaError> {
        self.states.upsert(state.saga_id.as_str(), state.clone()).await?;
        Ok(())
    }

    async fn compensate(
        &self,
        mut state: SagaState,
        trigger: &EventEnvelope,
        proposal: &ProposalSubmitted,
        reason: String,
    ) -> Result<SagaState, SagaError> {
        state.compensate(reason.clone())?;
        self.persist(&state).await?;
        warn!(
            saga_id = %state.saga_id,
            trace_id = %state.trace_id,
            reason = %reason,
            "scheduling saga compensated"
        );

        self.emit_compensation(&state, trigger, proposal).await?;
        Ok(state)
    }

    async fn emit_compensation(
        &self,
        state: &SagaState,
        trigger: &EventEnvelope,
        proposal: &ProposalSubmitted,
    ) -> Result<(), SagaError> {
        let aggregate_id = AggregateId::parse(proposal.schedule_item_id.as_str())
            .map_err(|e| SagaError::InvalidProposal(e.to_string()))?;
        // Carries the trigger's version for the audit trail; the schedule
        // item view is annotated, not version-guarded.
        let compensated = EventEnvelope::new(
            state.compensation_event_id.unwrap_or_default(),
            aggregate_id,
            trigger.aggregate_version(),
            state.trace_id.clone(),
            SCHEDULE_PROPOSAL_COMPENSATED,
            json!({
                "scheduleItemId": proposal.schedule_item_id,
                "proposalId": proposal.proposal_id,
                "sagaId": state.saga_id.as_str(),
                "closeReason": state.compensation_reason.as_deref().unwrap_or_default(),
            }),
        )
        .with_lane(trigger.lane());
        self.funnel.apply(&compensated, compensated.lane()).await?;
        Ok(())
    }
}

/// Reason naming the requirements no eligible candidate meets. When each
/// requirement is met by someone but nobody meets all of them, every
/// requirement is listed.
fn unmet_reason(requirements: &[SkillRequirement], candidates: &[super::Candidate]) -> String {
    let mut unmet: Vec<String> = requirements
        .iter()
        .filter(|r| !candidates.iter().any(|c| c.eligible && c.satisfies(r)))
        .map(ToString::to_string)
        .collect();
    if unmet.is_empty() {
        unmet = requirements.iter().map(ToString::to_string).collect();
    }
    if unmet.is_empty() {
        return "no eligible candidate".to_string();
    }
    format!("no eligible candidate meets {}", unmet.join(", "))
}

#[async_trait]
impl EventHandler for SchedulingSaga {
    fn name(&self) -> &str {
        "scheduling-saga"
    }

    async fn handle(&self, envelope: &EventEnvelope, _lane: Lane) -> anyhow::Result<()> {
        self.start(envelope).await?;
        Ok(())
    }
}
