//! Catalog of event types known to the backbone.
//!
//! Types are namespaced `context.entity.verb`. Aggregates outside this
//! workspace may emit other types; those fall through to the explicit
//! default branches of the tier and projection tables.

// Wallet (financial).
pub const WALLET_CREDITED: &str = "wallet.credited";
pub const WALLET_DEBITED: &str = "wallet.debited";
pub const WALLET_TRANSFER_COMPLETED: &str = "wallet.transfer.completed";

// Roles, claims and policy (security).
pub const ROLE_GRANTED: &str = "role.granted";
pub const ROLE_REVOKED: &str = "role.revoked";
pub const CLAIMS_UPDATED: &str = "claims.updated";
pub const POLICY_CHANGED: &str = "policy.changed";

// Skill XP.
pub const SKILL_XP_AWARDED: &str = "skill.xp.awarded";
pub const SKILL_TIER_GRANTED: &str = "skill.tier.granted";
pub const MEMBER_ELIGIBILITY_CHANGED: &str = "member.eligibility.changed";

// Scheduling.
pub const SCHEDULE_ITEM_CREATED: &str = "schedule.item.created";
pub const SCHEDULE_PROPOSAL_SUBMITTED: &str = "schedule.proposal.submitted";
pub const SCHEDULE_PROPOSAL_ACCEPTED: &str = "schedule.proposal.accepted";
pub const SCHEDULE_PROPOSAL_COMPENSATED: &str = "schedule.proposal.compensated";
pub const SCHEDULE_ASSIGNMENT_CONFIRMED: &str = "schedule.assignment.confirmed";

// Lifecycle.
pub const MEMBER_JOINED: &str = "member.joined";
pub const MEMBER_LEFT: &str = "member.left";
