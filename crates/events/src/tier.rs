//! Dead-letter tiers and the event-type → tier classification.

use serde::{Deserialize, Serialize};

use crate::event_types as et;

/// Recovery policy applied when an event ends up in the dead-letter queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqTier {
    /// Idempotent events; replayed automatically.
    SafeAuto,
    /// Financial or irreversible events; a human must approve a replay.
    ReviewRequired,
    /// Security-sensitive events; never replayed, the aggregate is frozen.
    SecurityBlock,
}

/// How a tier was resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Classification {
    Mapped(DlqTier),
    /// The event type is not in the table; the default tier applies.
    Defaulted(DlqTier),
}

impl Classification {
    pub fn tier(self) -> DlqTier {
        match self {
            Classification::Mapped(t) | Classification::Defaulted(t) => t,
        }
    }

    pub fn is_defaulted(self) -> bool {
        matches!(self, Classification::Defaulted(_))
    }
}

impl DlqTier {
    /// Tier applied to event types missing from the table.
    pub const DEFAULT: DlqTier = DlqTier::SafeAuto;

    /// Resolve the tier for an event type.
    ///
    /// Only the event type is consulted; payload contents never influence
    /// the tier.
    pub fn classify(event_type: &str) -> Classification {
        match event_type {
            et::WALLET_CREDITED
            | et::WALLET_DEBITED
            | et::WALLET_TRANSFER_COMPLETED
            | et::SCHEDULE_ASSIGNMENT_CONFIRMED => Classification::Mapped(DlqTier::ReviewRequired),

            et::ROLE_GRANTED | et::ROLE_REVOKED | et::CLAIMS_UPDATED | et::POLICY_CHANGED => {
                Classification::Mapped(DlqTier::SecurityBlock)
            }

            et::SCHEDULE_PROPOSAL_COMPENSATED
            | et::SCHEDULE_PROPOSAL_SUBMITTED
            | et::SCHEDULE_PROPOSAL_ACCEPTED
            | et::SCHEDULE_ITEM_CREATED
            | et::SKILL_XP_AWARDED
            | et::SKILL_TIER_GRANTED
            | et::MEMBER_ELIGIBILITY_CHANGED
            | et::MEMBER_JOINED
            | et::MEMBER_LEFT => Classification::Mapped(DlqTier::SafeAuto),

            // TODO: revisit once product confirms whether unknown types should
            // default to REVIEW_REQUIRED instead.
            _ => Classification::Defaulted(Self::DEFAULT),
        }
    }

    /// Shorthand for `classify(event_type).tier()`.
    pub fn for_event_type(event_type: &str) -> DlqTier {
        Self::classify(event_type).tier()
    }

    /// Whether entries of this tier may ever be replayed without a human.
    pub fn allows_auto_replay(self) -> bool {
        matches!(self, DlqTier::SafeAuto)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DlqTier::SafeAuto => "SAFE_AUTO",
            DlqTier::ReviewRequired => "REVIEW_REQUIRED",
            DlqTier::SecurityBlock => "SECURITY_BLOCK",
        }
    }
}

impl core::fmt::Display for DlqTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
