//! Tier-specific dead-letter processors.
//!
//! | tier | processor | replays? |
//! |------|-----------|----------|
//! | SAFE_AUTO | [`SafeAutoProcessor`] | yes, bounded, ledger-guarded |
//! | REVIEW_REQUIRED | [`ReviewRequiredProcessor`] | never automatically |
//! | SECURITY_BLOCK | [`SecurityBlockProcessor`] | never; holds no delivery handle |

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use eventrail_events::{DlqTier, EventEnvelope};

use super::records::{FrozenEntity, ReviewRequest, ReviewStatus, SecurityAlert, SecurityIncident, Severity};
use super::{DeliveredVia, DeliveryLedger, DlqEntry, DlqError, DlqStatus};
use crate::config::ReplayConfig;
use crate::delivery::Deliver;
use crate::store::DocumentStore;

fn ensure_tier(entry: &DlqEntry, expected: DlqTier) -> Result<(), DlqError> {
    if entry.dlq_level() != expected {
        return Err(DlqError::TierMismatch {
            dlq_id: entry.dlq_id().to_string(),
            expected,
            found: entry.dlq_level(),
        });
    }
    Ok(())
}

async fn save(
    dlq: &Arc<dyn DocumentStore<DlqEntry>>,
    mut entry: DlqEntry,
    status: DlqStatus,
    note: impl Into<String>,
) -> Result<DlqStatus, DlqError> {
    entry.annotate(status, note);
    let id = entry.dlq_id().to_string();
    dlq.upsert(&id, entry).await?;
    Ok(status)
}

/// Replays idempotent events automatically.
pub struct SafeAutoProcessor {
    dlq: Arc<dyn DocumentStore<DlqEntry>>,
    ledger: DeliveryLedger,
    deliver: Arc<dyn Deliver>,
    config: ReplayConfig,
}

impl SafeAutoProcessor {
    pub fn new(
        dlq: Arc<dyn DocumentStore<DlqEntry>>,
        ledger: DeliveryLedger,
        deliver: Arc<dyn Deliver>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            dlq,
            ledger,
            deliver,
            config,
        }
    }

    pub async fn process(&self, entry: DlqEntry) -> Result<DlqStatus, DlqError> {
        ensure_tier(&entry, DlqTier::SafeAuto)?;
        if entry.status().is_processed() {
            return Ok(entry.status());
        }

        if let Some(key) = entry.idempotency_key() {
            if self.ledger.contains(key).await? {
                info!(dlq_id = %entry.dlq_id(), idempotency_key = key, "already delivered; replay skipped");
                return save(&self.dlq, entry, DlqStatus::AlreadyDelivered, "ledger hit").await;
            }
        }

        // The preserved bytes are replayed as-is so the idempotency key survives.
        let envelope = match EventEnvelope::from_json(entry.envelope()) {
            Ok(env) => env,
            Err(err) => {
                warn!(dlq_id = %entry.dlq_id(), error = %err, "dead-lettered envelope is corrupt; cannot replay");
                return save(&self.dlq, entry, DlqStatus::ReplayFailed, format!("corrupt envelope: {err}"))
                    .await;
            }
        };

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.deliver.deliver(envelope.lane(), envelope.clone()).await {
                Ok(()) => {
                    self.ledger.record(&envelope, DeliveredVia::Replay).await?;
                    info!(
                        dlq_id = %entry.dlq_id(),
                        event_id = %envelope.event_id(),
                        trace_id = %envelope.trace_id(),
                        attempt,
                        "dead-lettered event replayed"
                    );
                    return save(&self.dlq, entry, DlqStatus::Replayed, format!("replayed on attempt {attempt}"))
                        .await;
                }
                Err(err) => {
                    warn!(dlq_id = %entry.dlq_id(), attempt, error = %err, "replay attempt failed");
                    last_error = err.to_string();
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.backoff).await;
                    }
                }
            }
        }

        error!(dlq_id = %entry.dlq_id(), error = %last_error, "replay exhausted");
        save(&self.dlq, entry, DlqStatus::ReplayFailed, format!("replay exhausted: {last_error}")).await
    }
}

/// Parks financial / irreversible events for a human.
pub struct ReviewRequiredProcessor {
    dlq: Arc<dyn DocumentStore<DlqEntry>>,
    reviews: Arc<dyn DocumentStore<ReviewRequest>>,
}

impl ReviewRequiredProcessor {
    pub fn new(
        dlq: Arc<dyn DocumentStore<DlqEntry>>,
        reviews: Arc<dyn DocumentStore<ReviewRequest>>,
    ) -> Self {
        Self { dlq, reviews }
    }

    pub async fn process(&self, entry: DlqEntry) -> Result<DlqStatus, DlqError> {
        ensure_tier(&entry, DlqTier::ReviewRequired)?;
        if entry.status().is_processed() {
            return Ok(entry.status());
        }

        let request = ReviewRequest {
            review_id: entry.dlq_id().to_string(),
            dlq_id: entry.dlq_id().clone(),
            idempotency_key: entry.idempotency_key().map(str::to_string),
            event_type: entry.event_type().to_string(),
            requested_at: Utc::now(),
            status: ReviewStatus::AwaitingReview,
        };
        self.reviews.create(&request.review_id, request.clone()).await?;

        warn!(
            dlq_id = %entry.dlq_id(),
            event_type = entry.event_type(),
            "dead-lettered event awaiting operator review"
        );
        save(&self.dlq, entry, DlqStatus::AwaitingReview, format!("review {}", request.review_id)).await
    }
}

/// Freezes the aggregate and escalates. There is no replay path.
pub struct SecurityBlockProcessor {
    dlq: Arc<dyn DocumentStore<DlqEntry>>,
    frozen: Arc<dyn DocumentStore<FrozenEntity>>,
    alerts: Arc<dyn DocumentStore<SecurityAlert>>,
    incidents: Arc<dyn DocumentStore<SecurityIncident>>,
}

impl SecurityBlockProcessor {
    pub fn new(
        dlq: Arc<dyn DocumentStore<DlqEntry>>,
        frozen: Arc<dyn DocumentStore<FrozenEntity>>,
        alerts: Arc<dyn DocumentStore<SecurityAlert>>,
        incidents: Arc<dyn DocumentStore<SecurityIncident>>,
    ) -> Self {
        Self {
            dlq,
            frozen,
            alerts,
            incidents,
        }
    }

    pub async fn process(&self, entry: DlqEntry) -> Result<DlqStatus, DlqError> {
        ensure_tier(&entry, DlqTier::SecurityBlock)?;
        if entry.status().is_processed() {
            return Ok(entry.status());
        }

        let now = Utc::now();
        let reason = format!("{} dead-lettered: {}", entry.event_type(), entry.last_error());

        match entry.aggregate_id() {
            Some(aggregate_id) => {
                let marker = FrozenEntity {
                    aggregate_id: aggregate_id.to_string(),
                    dlq_id: entry.dlq_id().clone(),
                    reason: reason.clone(),
                    frozen_at: now,
                };
                self.frozen.create(aggregate_id, marker).await?;
            }
            None => warn!(dlq_id = %entry.dlq_id(), "aggregate unknown (corrupt envelope); nothing to freeze"),
        }

        let alert = SecurityAlert {
            alert_id: format!("alert__{}", entry.dlq_id()),
            severity: Severity::Critical,
            dlq_id: entry.dlq_id().clone(),
            event_type: entry.event_type().to_string(),
            aggregate_id: entry.aggregate_id().map(str::to_string),
            message: reason,
            raised_at: now,
        };
        self.alerts.create(&alert.alert_id, alert.clone()).await?;

        let incident = SecurityIncident::open(
            entry.dlq_id().clone(),
            entry.event_type(),
            entry.aggregate_id().map(str::to_string),
            entry.idempotency_key().map(str::to_string),
        );
        self.incidents.create(incident.incident_id(), incident.clone()).await?;

        error!(
            dlq_id = %entry.dlq_id(),
            event_type = entry.event_type(),
            aggregate_id = entry.aggregate_id().unwrap_or("unknown"),
            incident_id = incident.incident_id(),
            "security event dead-lettered; aggregate frozen"
        );
        save(&self.dlq, entry, DlqStatus::SecurityBlocked, format!("incident {}", incident.incident_id())).await
    }
}
