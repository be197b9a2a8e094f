//! Single-process host for the relay, router, projections, saga and DLQ.
//!
//! Stores are in-memory here; a deployment swaps in durable
//! `DocumentStore`/`ViewStore` implementations with the same wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use eventrail_events::{Router, SagaState, Selector};
use eventrail_infra::EventrailConfig;
use eventrail_infra::delivery::{Deliver, HttpLaneDelivery, RouterDelivery};
use eventrail_infra::dlq::{
    DeliveryLedger, DeliveryLedgerEntry, DlqEntry, DlqWorker, FrozenEntity, HttpDlqNotifier, ReviewRequest,
    ReviewRequiredProcessor, SafeAutoProcessor, SecurityAlert, SecurityBlockProcessor, SecurityIncident,
};
use eventrail_infra::outbox::{OutboxRecord, OutboxRelay};
use eventrail_infra::projections::{InMemoryViewStore, ProjectionFunnel};
use eventrail_infra::saga::{HttpSchedulingCommands, ProjectionCandidateDirectory, SchedulingSaga};
use eventrail_infra::store::InMemoryCollection;

const LANE_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eventrail_observability::init();

    let config = EventrailConfig::from_env().context("loading configuration")?;
    let client = reqwest::Client::new();

    let outbox = Arc::new(InMemoryCollection::<OutboxRecord>::new("outbox"));
    let dlq = Arc::new(InMemoryCollection::<DlqEntry>::new("dlq"));
    let ledger = Arc::new(InMemoryCollection::<DeliveryLedgerEntry>::new("delivery_ledger"));
    let views = Arc::new(InMemoryViewStore::new());

    let router = Router::new();
    let funnel = Arc::new(ProjectionFunnel::new(views.clone()).with_sla(config.sla));
    router.register_subscriber("*", Selector::Any, funnel.clone());

    match &config.scheduling {
        Some(gateway) => {
            let saga = Arc::new(SchedulingSaga::new(
                Arc::new(InMemoryCollection::<SagaState>::new("sagas")),
                Arc::new(HttpSchedulingCommands::new(client.clone(), gateway.url.clone(), gateway.timeout)),
                Arc::new(ProjectionCandidateDirectory::new(views.clone())),
                funnel.clone(),
            ));
            saga.register(&router);
            info!(gateway = %gateway.url, "scheduling saga registered");
        }
        None => info!("EVENTRAIL_SCHEDULING_URL not set; scheduling saga disabled"),
    }

    let deliver: Arc<dyn Deliver> = if config.lane_endpoints.is_empty() {
        Arc::new(RouterDelivery::new(router.clone()))
    } else {
        let remote = config
            .lane_endpoints
            .iter()
            .fold(HttpLaneDelivery::new(client.clone(), LANE_DELIVERY_TIMEOUT), |d, (lane, url)| {
                d.with_endpoint(*lane, url.clone())
            });
        info!(lanes = config.lane_endpoints.len(), "delivering to remote lane endpoints");
        Arc::new(remote)
    };

    let mut relay = OutboxRelay::new("outbox", outbox.clone(), dlq.clone(), deliver.clone())
        .with_ledger(DeliveryLedger::new(ledger.clone()))
        .with_config(config.relay.clone());
    if let Some(notify) = &config.dlq_notify {
        let notifier = HttpDlqNotifier::new(client.clone(), notify.url.clone(), notify.timeout);
        relay = relay.with_notifier(Arc::new(notifier), notify.timeout);
    }

    let dlq_worker = DlqWorker::new(
        dlq.clone(),
        SafeAutoProcessor::new(dlq.clone(), DeliveryLedger::new(ledger.clone()), deliver, config.replay.clone()),
        ReviewRequiredProcessor::new(dlq.clone(), Arc::new(InMemoryCollection::<ReviewRequest>::new("dlq_reviews"))),
        SecurityBlockProcessor::new(
            dlq.clone(),
            Arc::new(InMemoryCollection::<FrozenEntity>::new("frozen_entities")),
            Arc::new(InMemoryCollection::<SecurityAlert>::new("security_alerts")),
            Arc::new(InMemoryCollection::<SecurityIncident>::new("security_incidents")),
        ),
    );

    let relay_handle = relay.start();
    let dlq_handle = dlq_worker.start();
    info!(
        max_attempts = config.relay.max_attempts,
        subscribers = router.subscriber_count(),
        "eventrail worker running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested; draining in-flight work");

    relay_handle.shutdown().await;
    dlq_handle.shutdown().await;
    info!("eventrail worker stopped");
    Ok(())
}
