//! Saga infrastructure: persistence and command execution.
//!
//! The state machine itself lives in `eventrail_events::saga`; this module
//! persists it and runs the side effects between transitions.

pub mod candidates;
pub mod commands;
pub mod scheduling;

use async_trait::async_trait;
use thiserror::Error;

use eventrail_core::TraceId;
use eventrail_events::SagaTransitionError;

use crate::projections::ProjectionError;
use crate::store::StoreError;

pub use candidates::{Candidate, CandidateDirectory, ProjectionCandidateDirectory, SkillRequirement, SkillTier};
pub use commands::HttpSchedulingCommands;
pub use scheduling::{ProposalSubmitted, SchedulingSaga};

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("unexpected trigger event type: {0}")]
    UnexpectedEventType(String),

    #[error("invalid proposal payload: {0}")]
    InvalidProposal(String),

    #[error(transparent)]
    Transition(#[from] SagaTransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Failure to reach the scheduling command side.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command transport failed: {0}")]
    Transport(String),

    #[error("command timed out")]
    Timeout,
}

/// Result of an assignment command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Confirmed,
    Rejected { reason: String },
}

/// Command side of the scheduling context, as seen by the saga.
#[async_trait]
pub trait SchedulingCommands: Send + Sync {
    async fn accept_proposal(
        &self,
        schedule_item_id: &str,
        proposal_id: &str,
        trace_id: &TraceId,
    ) -> Result<(), CommandError>;

    async fn assign(
        &self,
        schedule_item_id: &str,
        member_id: &str,
        trace_id: &TraceId,
    ) -> Result<AssignmentOutcome, CommandError>;
}
