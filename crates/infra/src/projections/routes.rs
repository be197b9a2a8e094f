//! Static projection route table: which views an event type feeds.

use eventrail_events::Lane;
use eventrail_events::event_types::*;

pub const WALLET_BALANCES: &str = "wallet_balances";
pub const MEMBER_ACCESS: &str = "member_access";
pub const MEMBER_SKILLS: &str = "member_skills";
pub const ELIGIBLE_CANDIDATES: &str = "eligible_candidates";
pub const SCHEDULE_ITEMS: &str = "schedule_items";
pub const MEMBERS: &str = "members";
pub const AUDIT_LOG: &str = "audit_log";

/// How a route writes into its view.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Keyed by aggregate id; accepted only for a strictly newer version.
    VersionGuarded,
    /// Keyed by event id; a redelivery overwrites the same document.
    KeyedByEventId,
    /// Keyed by aggregate id, written by a party that does not own the
    /// aggregate's stream. Fields are merged without a version check and
    /// `last_processed_version` is left untouched.
    Annotation,
}

/// One (view, lane, write mode) target for an event type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ViewRoute {
    pub view: &'static str,
    /// Lane whose SLA applies to this write.
    pub lane: Lane,
    pub mode: WriteMode,
}

const fn guarded(view: &'static str, lane: Lane) -> ViewRoute {
    ViewRoute {
        view,
        lane,
        mode: WriteMode::VersionGuarded,
    }
}

const fn annotation(view: &'static str, lane: Lane) -> ViewRoute {
    ViewRoute {
        view,
        lane,
        mode: WriteMode::Annotation,
    }
}

const AUDIT: ViewRoute = ViewRoute {
    view: AUDIT_LOG,
    lane: Lane::Background,
    mode: WriteMode::KeyedByEventId,
};

const WALLET: &[ViewRoute] = &[guarded(WALLET_BALANCES, Lane::Critical), AUDIT];
const ACCESS: &[ViewRoute] = &[guarded(MEMBER_ACCESS, Lane::Critical), AUDIT];
const SKILL_XP: &[ViewRoute] = &[guarded(MEMBER_SKILLS, Lane::Standard)];
const SKILL_TIER: &[ViewRoute] = &[
    guarded(MEMBER_SKILLS, Lane::Standard),
    guarded(ELIGIBLE_CANDIDATES, Lane::Standard),
];
const ELIGIBILITY: &[ViewRoute] = &[guarded(ELIGIBLE_CANDIDATES, Lane::Standard)];
const SCHEDULE: &[ViewRoute] = &[guarded(SCHEDULE_ITEMS, Lane::Standard)];
const COMPENSATION: &[ViewRoute] = &[annotation(SCHEDULE_ITEMS, Lane::Standard), AUDIT];
const ASSIGNMENT: &[ViewRoute] = &[guarded(SCHEDULE_ITEMS, Lane::Critical), AUDIT];
const MEMBERSHIP: &[ViewRoute] = &[
    guarded(MEMBERS, Lane::Background),
    guarded(ELIGIBLE_CANDIDATES, Lane::Background),
];

/// Views fed by `event_type`. Unknown types map to nothing.
pub fn routes_for(event_type: &str) -> &'static [ViewRoute] {
    match event_type {
        WALLET_CREDITED | WALLET_DEBITED | WALLET_TRANSFER_COMPLETED => WALLET,
        ROLE_GRANTED | ROLE_REVOKED | CLAIMS_UPDATED | POLICY_CHANGED => ACCESS,
        SKILL_XP_AWARDED => SKILL_XP,
        SKILL_TIER_GRANTED => SKILL_TIER,
        MEMBER_ELIGIBILITY_CHANGED => ELIGIBILITY,
        SCHEDULE_ITEM_CREATED | SCHEDULE_PROPOSAL_SUBMITTED | SCHEDULE_PROPOSAL_ACCEPTED => SCHEDULE,
        SCHEDULE_PROPOSAL_COMPENSATED => COMPENSATION,
        SCHEDULE_ASSIGNMENT_CONFIRMED => ASSIGNMENT,
        MEMBER_JOINED | MEMBER_LEFT => MEMBERSHIP,
        _ => &[],
    }
}
