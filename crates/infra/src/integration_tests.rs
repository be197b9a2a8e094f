//! Integration tests for the full delivery pipeline.
//!
//! Tests: Outbox → Relay → Router → { ProjectionFunnel, SchedulingSaga } → DLQ
//!
//! Verifies:
//! - Outbox records reach their views through the running relay
//! - A proposal submitted through the outbox drives the saga to a terminal state
//! - Dead-lettered events replay with their original idempotency key
//! - Security-tier entries are frozen and never redelivered

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};

    use eventrail_core::{AggregateId, EventId, TraceId};
    use eventrail_events::event_types::*;
    use eventrail_events::{EventEnvelope, Lane, Router, SagaState, SagaStatus, Selector};

    use crate::config::{RelayConfig, ReplayConfig};
    use crate::delivery::{Deliver, DeliveryError, RouterDelivery};
    use crate::dlq::{
        DeliveryLedger, DeliveryLedgerEntry, DlqEntry, DlqStatus, DlqWorker, FrozenEntity, ReviewRequest,
        ReviewRequiredProcessor, SafeAutoProcessor, SecurityAlert, SecurityBlockProcessor, SecurityIncident,
    };
    use crate::outbox::{OutboxRecord, OutboxRelay, OutboxStatus};
    use crate::projections::routes::{SCHEDULE_ITEMS, WALLET_BALANCES};
    use crate::projections::{InMemoryViewStore, ProjectionFunnel, ViewStore};
    use crate::saga::{AssignmentOutcome, CommandError, ProjectionCandidateDirectory, SchedulingCommands, SchedulingSaga};
    use crate::store::{DocumentStore, InMemoryCollection};

    struct AlwaysConfirm;

    #[async_trait]
    impl SchedulingCommands for AlwaysConfirm {
        async fn accept_proposal(&self, _item: &str, _proposal: &str, _trace: &TraceId) -> Result<(), CommandError> {
            Ok(())
        }

        async fn assign(&self, _item: &str, _member: &str, _trace: &TraceId) -> Result<AssignmentOutcome, CommandError> {
            Ok(AssignmentOutcome::Confirmed)
        }
    }

    /// Fails the first `fail_first` calls, then forwards to the router.
    struct Outage {
        fail_first: usize,
        calls: AtomicUsize,
        inner: RouterDelivery,
    }

    #[async_trait]
    impl Deliver for Outage {
        async fn deliver(&self, lane: Lane, envelope: EventEnvelope) -> Result<(), DeliveryError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(DeliveryError::Transport("router unreachable".into()));
            }
            self.inner.deliver(lane, envelope).await
        }
    }

    struct Pipeline {
        outbox: Arc<InMemoryCollection<OutboxRecord>>,
        dlq: Arc<InMemoryCollection<DlqEntry>>,
        ledger: Arc<InMemoryCollection<DeliveryLedgerEntry>>,
        sagas: Arc<InMemoryCollection<SagaState>>,
        views: Arc<InMemoryViewStore>,
        router: Router,
    }

    fn pipeline() -> Pipeline {
        let views = Arc::new(InMemoryViewStore::new());
        let funnel = Arc::new(ProjectionFunnel::new(views.clone()));
        let sagas = Arc::new(InMemoryCollection::new("sagas"));
        let router = Router::new();

        router.register_subscriber("*", Selector::Any, funnel.clone());
        let saga = Arc::new(SchedulingSaga::new(
            sagas.clone(),
            Arc::new(AlwaysConfirm),
            Arc::new(ProjectionCandidateDirectory::new(views.clone())),
            funnel,
        ));
        saga.register(&router);

        Pipeline {
            outbox: Arc::new(InMemoryCollection::new("outbox")),
            dlq: Arc::new(InMemoryCollection::new("dlq")),
            ledger: Arc::new(InMemoryCollection::new("delivery_ledger")),
            sagas,
            views,
            router,
        }
    }

    fn fast_retries() -> RelayConfig {
        RelayConfig {
            max_attempts: 3,
            backoff: vec![Duration::from_millis(5)],
        }
    }

    fn envelope(aggregate: &str, version: u64, event_type: &str, payload: JsonValue) -> EventEnvelope {
        EventEnvelope::new(
            EventId::new(),
            AggregateId::parse(aggregate).unwrap(),
            version,
            TraceId::parse("trace-int").unwrap(),
            event_type,
            payload,
        )
    }

    async fn until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn enqueue(outbox: &InMemoryCollection<OutboxRecord>, key: &str, env: &EventEnvelope) {
        outbox.upsert(key, OutboxRecord::pending(env).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn outbox_event_reaches_its_view() {
        let p = pipeline();
        let handle = OutboxRelay::new("outbox", p.outbox.clone(), p.dlq.clone(), Arc::new(RouterDelivery::new(p.router.clone())))
            .with_ledger(DeliveryLedger::new(p.ledger.clone()))
            .with_config(fast_retries())
            .start();

        let env = envelope("wallet-7", 1, WALLET_CREDITED, json!({ "balance": 70 })).with_lane(Lane::Critical);
        enqueue(&p.outbox, "o1", &env).await;

        let views = p.views.clone();
        until(|| {
            let views = views.clone();
            async move { views.read(WALLET_BALANCES, "wallet-7").await.unwrap().is_some() }
        })
        .await;
        handle.shutdown().await;

        let view = p.views.read(WALLET_BALANCES, "wallet-7").await.unwrap().unwrap();
        assert_eq!(view.trace_id, *env.trace_id());
        assert_eq!(p.outbox.get("o1").await.unwrap().unwrap().status, OutboxStatus::Delivered);
        assert!(p.ledger.get(env.idempotency_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn proposal_through_outbox_compensates_without_candidates() {
        let p = pipeline();
        let handle = OutboxRelay::new("outbox", p.outbox.clone(), p.dlq.clone(), Arc::new(RouterDelivery::new(p.router.clone())))
            .with_config(fast_retries())
            .start();

        let trigger = envelope(
            "item-9",
            2,
            SCHEDULE_PROPOSAL_SUBMITTED,
            json!({
                "scheduleItemId": "item-9",
                "proposalId": "p-9",
                "requiredSkills": [{ "tagSlug": "welding", "minimumTier": "expert" }],
            }),
        );
        enqueue(&p.outbox, "o-prop", &trigger).await;

        let sagas = p.sagas.clone();
        until(|| {
            let sagas = sagas.clone();
            async move {
                sagas
                    .get("scheduling__item-9")
                    .await
                    .unwrap()
                    .is_some_and(|s| s.is_terminal())
            }
        })
        .await;
        handle.shutdown().await;

        let state = p.sagas.get("scheduling__item-9").await.unwrap().unwrap();
        assert_eq!(state.status, SagaStatus::Compensated);
        assert!(state.compensation_reason.as_deref().unwrap().contains("welding>=expert"));

        let item = p.views.read(SCHEDULE_ITEMS, "item-9").await.unwrap().unwrap();
        assert_eq!(item.last_processed_version, trigger.aggregate_version());
        assert_eq!(item.field("closeReason"), Some(&json!(state.compensation_reason.clone().unwrap())));
        assert_eq!(item.trace_id, *trigger.trace_id());
    }

    #[tokio::test]
    async fn dead_lettered_safe_event_replays_with_original_key() {
        let p = pipeline();
        let deliver = Arc::new(Outage {
            fail_first: 3,
            calls: AtomicUsize::new(0),
            inner: RouterDelivery::new(p.router.clone()),
        });
        let ledger = DeliveryLedger::new(p.ledger.clone());

        let relay = OutboxRelay::new("outbox", p.outbox.clone(), p.dlq.clone(), deliver.clone())
            .with_ledger(DeliveryLedger::new(p.ledger.clone()))
            .with_config(fast_retries());
        let env = envelope("m-3", 1, MEMBER_JOINED, json!({ "memberId": "m-3" }));
        enqueue(&p.outbox, "o-join", &env).await;
        for _ in 0..3 {
            relay.process_record("o-join").await.unwrap();
        }
        assert_eq!(p.outbox.get("o-join").await.unwrap().unwrap().status, OutboxStatus::Dlq);

        let worker = DlqWorker::new(
            p.dlq.clone(),
            SafeAutoProcessor::new(
                p.dlq.clone(),
                ledger,
                deliver.clone(),
                ReplayConfig {
                    max_attempts: 3,
                    backoff: Duration::from_millis(1),
                },
            ),
            ReviewRequiredProcessor::new(p.dlq.clone(), Arc::new(InMemoryCollection::<ReviewRequest>::new("reviews"))),
            SecurityBlockProcessor::new(
                p.dlq.clone(),
                Arc::new(InMemoryCollection::<FrozenEntity>::new("frozen")),
                Arc::new(InMemoryCollection::<SecurityAlert>::new("alerts")),
                Arc::new(InMemoryCollection::<SecurityIncident>::new("incidents")),
            ),
        );
        assert_eq!(worker.process_pending().await.unwrap().processed, 1);

        let entry = p.dlq.get("outbox__o-join").await.unwrap().unwrap();
        assert_eq!(entry.status(), DlqStatus::Replayed);
        assert_eq!(entry.idempotency_key(), Some(env.idempotency_key()));
        let recorded = p.ledger.get(env.idempotency_key()).await.unwrap().unwrap();
        assert_eq!(recorded.event_id, env.event_id());
        assert!(p.views.read(crate::projections::routes::MEMBERS, "m-3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn security_event_is_frozen_not_redelivered() {
        let p = pipeline();
        let deliver = Arc::new(Outage {
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
            inner: RouterDelivery::new(p.router.clone()),
        });
        let frozen = Arc::new(InMemoryCollection::<FrozenEntity>::new("frozen"));
        let incidents = Arc::new(InMemoryCollection::<SecurityIncident>::new("incidents"));

        let relay = OutboxRelay::new("outbox", p.outbox.clone(), p.dlq.clone(), deliver.clone()).with_config(fast_retries());
        enqueue(&p.outbox, "o-role", &envelope("user-1", 4, ROLE_GRANTED, json!({ "role": "admin" }))).await;
        for _ in 0..3 {
            relay.process_record("o-role").await.unwrap();
        }
        let calls_before = deliver.calls.load(Ordering::SeqCst);

        let worker = DlqWorker::new(
            p.dlq.clone(),
            SafeAutoProcessor::new(p.dlq.clone(), DeliveryLedger::new(p.ledger.clone()), deliver.clone(), ReplayConfig::default()),
            ReviewRequiredProcessor::new(p.dlq.clone(), Arc::new(InMemoryCollection::<ReviewRequest>::new("reviews"))),
            SecurityBlockProcessor::new(
                p.dlq.clone(),
                frozen.clone(),
                Arc::new(InMemoryCollection::<SecurityAlert>::new("alerts")),
                incidents.clone(),
            ),
        );
        worker.process_pending().await.unwrap();

        assert_eq!(deliver.calls.load(Ordering::SeqCst), calls_before);
        assert_eq!(
            p.dlq.get("outbox__o-role").await.unwrap().unwrap().status(),
            DlqStatus::SecurityBlocked
        );
        assert!(frozen.get("user-1").await.unwrap().is_some());
        assert!(!incidents.list().await.unwrap()[0].1.auto_replay_enabled());
    }
}
