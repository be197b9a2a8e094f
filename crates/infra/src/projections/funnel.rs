//! Projection funnel: the single writer for every read-model view.
//!
//! Each envelope is fanned out to the views listed in the route table.
//! Version-guarded views keep only strictly newer versions per aggregate, so
//! duplicates and out-of-order arrivals are dropped here rather than
//! upstream. Audit views are keyed by event id and simply overwrite.
//! Annotations merge fields into an aggregate's document without claiming a
//! version on its stream.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use eventrail_events::event_types::{MEMBER_JOINED, MEMBER_LEFT, SKILL_TIER_GRANTED};
use eventrail_events::{EventEnvelope, EventHandler, Lane, VersionCheck, version_guard_allows};

use super::routes::{ViewRoute, WriteMode, routes_for};
use super::view_store::{ProjectionViewRecord, ViewStore};
use crate::config::SlaThresholds;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to one view for one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Discarded by the version guard.
    Stale { last_processed_version: u64 },
    /// Audit record written under the event id.
    Recorded,
    /// Fields merged without touching the stored version.
    Annotated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub writes: Vec<(&'static str, WriteOutcome)>,
}

impl ApplyReport {
    pub fn is_unmapped(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn outcome(&self, view: &str) -> Option<&WriteOutcome> {
        self.writes.iter().find(|(v, _)| *v == view).map(|(_, o)| o)
    }
}

pub struct ProjectionFunnel {
    views: Arc<dyn ViewStore>,
    sla: SlaThresholds,
}

impl ProjectionFunnel {
    pub fn new(views: Arc<dyn ViewStore>) -> Self {
        Self {
            views,
            sla: SlaThresholds::default(),
        }
    }

    pub fn with_sla(mut self, sla: SlaThresholds) -> Self {
        self.sla = sla;
        self
    }

    pub fn views(&self) -> &Arc<dyn ViewStore> {
        &self.views
    }

    /// Apply `envelope` to every view its event type feeds.
    pub async fn apply(&self, envelope: &EventEnvelope, lane: Lane) -> Result<ApplyReport, ProjectionError> {
        let routes = routes_for(envelope.event_type());
        if routes.is_empty() {
            warn!(
                event_id = %envelope.event_id(),
                trace_id = %envelope.trace_id(),
                event_type = envelope.event_type(),
                lane = %lane,
                "no projection mapping for event type"
            );
            return Ok(ApplyReport::default());
        }

        let fields = project_fields(envelope);
        let mut report = ApplyReport::default();
        for route in routes {
            let started = Instant::now();
            let outcome = match route.mode {
                WriteMode::VersionGuarded => self.write_guarded(route, envelope, &fields).await?,
                WriteMode::KeyedByEventId => self.write_audit(route, envelope, lane).await?,
                WriteMode::Annotation => self.write_annotation(route, envelope, &fields).await?,
            };
            self.check_sla(route, envelope, started);
            report.writes.push((route.view, outcome));
        }
        Ok(report)
    }

    async fn write_guarded(
        &self,
        route: &ViewRoute,
        envelope: &EventEnvelope,
        fields: &Map<String, JsonValue>,
    ) -> Result<WriteOutcome, ProjectionError> {
        let key = envelope.aggregate_id().as_str();
        let existing = self.views.read(route.view, key).await?;

        let check = VersionCheck {
            event_version: envelope.aggregate_version(),
            view_last_processed_version: existing.as_ref().map(|r| r.last_processed_version),
        };
        if !version_guard_allows(check) {
            let last_processed_version = check.view_last_processed_version.unwrap_or_default();
            info!(
                view = route.view,
                aggregate_id = key,
                event_id = %envelope.event_id(),
                trace_id = %envelope.trace_id(),
                event_version = envelope.aggregate_version(),
                last_processed_version,
                "stale event discarded by version guard"
            );
            return Ok(WriteOutcome::Stale { last_processed_version });
        }

        let mut merged = existing.map(|r| r.fields).unwrap_or_default();
        merge_fields(&mut merged, fields.clone());
        let record = ProjectionViewRecord {
            fields: merged,
            last_processed_version: envelope.aggregate_version(),
            trace_id: envelope.trace_id().clone(),
            last_event_id: envelope.event_id(),
            updated_at: Utc::now(),
        };
        self.views.write(route.view, key, record).await?;
        debug!(view = route.view, aggregate_id = key, version = envelope.aggregate_version(), "view updated");
        Ok(WriteOutcome::Applied)
    }

    async fn write_annotation(
        &self,
        route: &ViewRoute,
        envelope: &EventEnvelope,
        fields: &Map<String, JsonValue>,
    ) -> Result<WriteOutcome, ProjectionError> {
        let key = envelope.aggregate_id().as_str();
        let record = match self.views.read(route.view, key).await? {
            Some(mut existing) => {
                merge_fields(&mut existing.fields, fields.clone());
                existing.updated_at = Utc::now();
                existing
            }
            // Version 0 keeps the aggregate's own first event acceptable.
            None => ProjectionViewRecord {
                fields: fields.clone(),
                last_processed_version: 0,
                trace_id: envelope.trace_id().clone(),
                last_event_id: envelope.event_id(),
                updated_at: Utc::now(),
            },
        };
        self.views.write(route.view, key, record).await?;
        debug!(view = route.view, aggregate_id = key, event_id = %envelope.event_id(), "view annotated");
        Ok(WriteOutcome::Annotated)
    }

    async fn write_audit(
        &self,
        route: &ViewRoute,
        envelope: &EventEnvelope,
        lane: Lane,
    ) -> Result<WriteOutcome, ProjectionError> {
        let mut fields = Map::new();
        fields.insert("eventType".into(), json!(envelope.event_type()));
        fields.insert("aggregateId".into(), json!(envelope.aggregate_id().as_str()));
        fields.insert("aggregateVersion".into(), json!(envelope.aggregate_version()));
        fields.insert("idempotencyKey".into(), json!(envelope.idempotency_key()));
        fields.insert("lane".into(), json!(lane.as_str()));
        fields.insert("payload".into(), envelope.payload().clone());

        let record = ProjectionViewRecord {
            fields,
            last_processed_version: envelope.aggregate_version(),
            trace_id: envelope.trace_id().clone(),
            last_event_id: envelope.event_id(),
            updated_at: Utc::now(),
        };
        self.views
            .write(route.view, &envelope.event_id().to_string(), record)
            .await?;
        Ok(WriteOutcome::Recorded)
    }

    fn check_sla(&self, route: &ViewRoute, envelope: &EventEnvelope, started: Instant) {
        let elapsed = started.elapsed();
        let threshold = self.sla.for_lane(route.lane);
        if elapsed > threshold {
            warn!(
                view = route.view,
                lane = %route.lane,
                event_id = %envelope.event_id(),
                trace_id = %envelope.trace_id(),
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "projection write exceeded lane SLA"
            );
        }
    }
}

#[async_trait]
impl EventHandler for ProjectionFunnel {
    fn name(&self) -> &str {
        "projection-funnel"
    }

    async fn handle(&self, envelope: &EventEnvelope, lane: Lane) -> anyhow::Result<()> {
        self.apply(envelope, lane).await?;
        Ok(())
    }
}

/// Fields an envelope contributes to its version-guarded views.
fn project_fields(envelope: &EventEnvelope) -> Map<String, JsonValue> {
    let payload = envelope.payload();
    match envelope.event_type() {
        SKILL_TIER_GRANTED => {
            let tag = payload.get("tagSlug").and_then(JsonValue::as_str);
            let tier = payload.get("tier").cloned();
            match (tag, tier) {
                (Some(tag), Some(tier)) => {
                    let mut skills = Map::new();
                    skills.insert(tag.to_string(), tier);
                    let mut fields = payload_object(payload);
                    fields.insert("skills".into(), JsonValue::Object(skills));
                    fields
                }
                _ => payload_object(payload),
            }
        }
        MEMBER_JOINED => {
            let mut fields = payload_object(payload);
            fields.insert("active".into(), json!(true));
            fields
        }
        MEMBER_LEFT => {
            let mut fields = payload_object(payload);
            fields.insert("active".into(), json!(false));
            fields.insert("eligible".into(), json!(false));
            fields
        }
        _ => payload_object(payload),
    }
}

fn payload_object(payload: &JsonValue) -> Map<String, JsonValue> {
    match payload {
        JsonValue::Object(map) => map.clone(),
        JsonValue::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other.clone());
            map
        }
    }
}

/// Shallow merge; nested objects are merged one level deep.
fn merge_fields(target: &mut Map<String, JsonValue>, incoming: Map<String, JsonValue>) {
    for (key, value) in incoming {
        match value {
            JsonValue::Object(inner) => {
                let slot = target
                    .entry(key)
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                if let JsonValue::Object(existing) = slot {
                    existing.extend(inner);
                } else {
                    *slot = JsonValue::Object(inner);
                }
            }
            other => {
                target.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventrail_core::{AggregateId, EventId, TraceId};
    use eventrail_events::event_types::*;

    use proptest::prelude::*;

    use super::*;
    use crate::projections::routes::{AUDIT_LOG, ELIGIBLE_CANDIDATES, MEMBER_SKILLS, SCHEDULE_ITEMS, WALLET_BALANCES};
    use crate::projections::InMemoryViewStore;

    fn envelope(aggregate: &str, version: u64, event_type: &str, payload: JsonValue) -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            AggregateId::parse(aggregate).unwrap(),
            version,
            TraceId::parse(format!("trace-{version}")).unwrap(),
            event_type,
            payload,
        )
    }

    fn funnel() -> (Arc<InMemoryViewStore>, ProjectionFunnel) {
        let views = Arc::new(InMemoryViewStore::new());
        (views.clone(), ProjectionFunnel::new(views))
    }

    #[tokio::test]
    async fn older_version_after_newer_is_discarded() {
        let (views, funnel) = funnel();
        let v5 = envelope("A", 5, WALLET_CREDITED, json!({ "balance": 500 }));
        let v3 = envelope("A", 3, WALLET_CREDITED, json!({ "balance": 300 }));

        funnel.apply(&v5, Lane::Critical).await.unwrap();
        let report = funnel.apply(&v3, Lane::Critical).await.unwrap();

        assert_eq!(
            report.outcome(WALLET_BALANCES),
            Some(&WriteOutcome::Stale { last_processed_version: 5 })
        );
        let view = views.read(WALLET_BALANCES, "A").await.unwrap().unwrap();
        assert_eq!(view.field("balance"), Some(&json!(500)));
        assert_eq!(view.last_processed_version, 5);
        assert_eq!(view.last_event_id, v5.event_id());
        assert_eq!(view.trace_id, *v5.trace_id());
    }

    #[tokio::test]
    async fn redelivery_of_same_version_is_a_no_op() {
        let (views, funnel) = funnel();
        let env = envelope("A", 2, WALLET_DEBITED, json!({ "balance": 10 }));

        funnel.apply(&env, Lane::Critical).await.unwrap();
        let before = views.read(WALLET_BALANCES, "A").await.unwrap();
        let report = funnel.apply(&env, Lane::Critical).await.unwrap();

        assert!(matches!(report.outcome(WALLET_BALANCES), Some(WriteOutcome::Stale { .. })));
        assert_eq!(views.read(WALLET_BALANCES, "A").await.unwrap(), before);
    }

    #[tokio::test]
    async fn annotation_merges_without_claiming_a_version() {
        let (views, funnel) = funnel();
        let accepted = envelope("item-9", 5, SCHEDULE_PROPOSAL_ACCEPTED, json!({ "status": "accepted" }));
        let closed = envelope("item-9", 4, SCHEDULE_PROPOSAL_COMPENSATED, json!({ "closeReason": "no crew" }));
        let next = envelope("item-9", 6, SCHEDULE_ITEM_CREATED, json!({ "title": "reopened" }));

        funnel.apply(&accepted, Lane::Standard).await.unwrap();
        let report = funnel.apply(&closed, Lane::Standard).await.unwrap();
        assert_eq!(report.outcome(SCHEDULE_ITEMS), Some(&WriteOutcome::Annotated));

        let view = views.read(SCHEDULE_ITEMS, "item-9").await.unwrap().unwrap();
        assert_eq!(view.field("closeReason"), Some(&json!("no crew")));
        assert_eq!(view.field("status"), Some(&json!("accepted")));
        assert_eq!(view.last_processed_version, 5);
        assert_eq!(view.last_event_id, accepted.event_id());

        let report = funnel.apply(&next, Lane::Standard).await.unwrap();
        assert_eq!(report.outcome(SCHEDULE_ITEMS), Some(&WriteOutcome::Applied));
        let view = views.read(SCHEDULE_ITEMS, "item-9").await.unwrap().unwrap();
        assert_eq!(view.last_processed_version, 6);
        assert_eq!(view.field("closeReason"), Some(&json!("no crew")));
    }

    #[tokio::test]
    async fn annotation_before_first_event_leaves_the_stream_open() {
        let (views, funnel) = funnel();
        let closed = envelope("item-8", 3, SCHEDULE_PROPOSAL_COMPENSATED, json!({ "closeReason": "none" }));
        let first = envelope("item-8", 1, SCHEDULE_ITEM_CREATED, json!({ "title": "shift" }));

        funnel.apply(&closed, Lane::Standard).await.unwrap();
        let report = funnel.apply(&first, Lane::Standard).await.unwrap();

        assert_eq!(report.outcome(SCHEDULE_ITEMS), Some(&WriteOutcome::Applied));
        let view = views.read(SCHEDULE_ITEMS, "item-8").await.unwrap().unwrap();
        assert_eq!(view.last_processed_version, 1);
        assert_eq!(view.field("closeReason"), Some(&json!("none")));
    }

    #[tokio::test]
    async fn audit_log_is_keyed_by_event_id() {
        let (views, funnel) = funnel();
        let env = envelope("A", 1, ROLE_GRANTED, json!({ "role": "admin" }));

        funnel.apply(&env, Lane::Critical).await.unwrap();
        let report = funnel.apply(&env, Lane::Critical).await.unwrap();

        assert_eq!(report.outcome(AUDIT_LOG), Some(&WriteOutcome::Recorded));
        let audit = views.list(AUDIT_LOG).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].0, env.event_id().to_string());
        assert_eq!(audit[0].1.field("idempotencyKey"), Some(&json!(env.idempotency_key())));
    }

    #[tokio::test]
    async fn unmapped_event_type_writes_nothing() {
        let (views, funnel) = funnel();
        let env = envelope("A", 1, "billing.invoice.sent", json!({}));

        let report = funnel.apply(&env, Lane::Standard).await.unwrap();

        assert!(report.is_unmapped());
        assert!(views.list(AUDIT_LOG).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn skill_tiers_accumulate_per_member() {
        let (views, funnel) = funnel();
        funnel
            .apply(
                &envelope("m1", 1, SKILL_TIER_GRANTED, json!({ "tagSlug": "rust", "tier": "expert" })),
                Lane::Standard,
            )
            .await
            .unwrap();
        funnel
            .apply(
                &envelope("m1", 2, SKILL_TIER_GRANTED, json!({ "tagSlug": "sql", "tier": "novice" })),
                Lane::Standard,
            )
            .await
            .unwrap();

        for view in [MEMBER_SKILLS, ELIGIBLE_CANDIDATES] {
            let record = views.read(view, "m1").await.unwrap().unwrap();
            assert_eq!(
                record.field("skills"),
                Some(&json!({ "rust": "expert", "sql": "novice" })),
                "{view}"
            );
        }
    }

    #[tokio::test]
    async fn sla_breach_does_not_block_the_write() {
        let views = Arc::new(InMemoryViewStore::new());
        let funnel = ProjectionFunnel::new(views.clone()).with_sla(SlaThresholds {
            critical: Duration::ZERO,
            standard: Duration::ZERO,
            background: Duration::ZERO,
        });

        let report = funnel
            .apply(&envelope("A", 1, WALLET_CREDITED, json!({ "balance": 1 })), Lane::Critical)
            .await
            .unwrap();

        assert_eq!(report.outcome(WALLET_BALANCES), Some(&WriteOutcome::Applied));
    }

    #[tokio::test]
    async fn funnel_is_a_router_subscriber() {
        let (views, funnel) = funnel();
        let router = eventrail_events::Router::new();
        router.register_subscriber("*", eventrail_events::Selector::Any, Arc::new(funnel));

        let report = router
            .route_event(envelope("m9", 1, MEMBER_JOINED, json!({ "memberId": "m9" })), Lane::Background)
            .await;

        assert_eq!(report.succeeded, 1);
        let member = views.read(crate::projections::routes::MEMBERS, "m9").await.unwrap().unwrap();
        assert_eq!(member.field("active"), Some(&json!(true)));
    }

    proptest! {
        #[test]
        fn any_arrival_order_converges_on_the_newest_version(
            order in Just((1u64..=12).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let record = rt.block_on(async {
                let (views, funnel) = funnel();
                for version in &order {
                    let env = envelope("A", *version, WALLET_CREDITED, json!({ "balance": version }));
                    funnel.apply(&env, Lane::Critical).await.unwrap();
                }
                views.read(WALLET_BALANCES, "A").await.unwrap().unwrap()
            });

            prop_assert_eq!(record.last_processed_version, 12);
            prop_assert_eq!(record.field("balance"), Some(&json!(12)));
        }
    }

    #[test]
    fn nested_objects_merge_one_level() {
        let mut target = Map::new();
        merge_fields(&mut target, json!({ "skills": { "a": 1 }, "x": 1 }).as_object().unwrap().clone());
        merge_fields(&mut target, json!({ "skills": { "b": 2 }, "x": 2 }).as_object().unwrap().clone());

        assert_eq!(JsonValue::Object(target), json!({ "skills": { "a": 1, "b": 2 }, "x": 2 }));
    }
}
