//! Outbox relay worker.
//!
//! Watches one outbox collection and moves every pending record to either
//! `delivered` or `dlq`. Each change notification triggers at most one
//! delivery attempt; a failed attempt writes the record back as `pending`
//! (after the backoff), and that write is the trigger for the next attempt.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use eventrail_core::DlqId;
use eventrail_events::{DlqTier, EventEnvelope};

use super::{OutboxRecord, OutboxStatus};
use crate::config::RelayConfig;
use crate::delivery::Deliver;
use crate::dlq::{DeliveredVia, DeliveryLedger, DlqEntry, DlqNotifier, FailureKind, notify_in_background};
use crate::store::{Change, DocumentStore, StoreError};
use crate::workers::WorkerHandle;

/// Handle returned by [`OutboxRelay::start`].
pub type RelayHandle = WorkerHandle;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a single `process_record` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Delivered { attempts: u32 },
    /// Delivery failed; the record was written back as pending.
    RetryScheduled { attempt: u32 },
    DeadLettered {
        dlq_id: DlqId,
        tier: DlqTier,
        failure: FailureKind,
    },
    /// The record was already terminal.
    NotPending(OutboxStatus),
    Missing,
    /// Another task holds the record.
    InFlight,
}

pub struct OutboxRelay {
    source: String,
    outbox: Arc<dyn DocumentStore<OutboxRecord>>,
    dlq: Arc<dyn DocumentStore<DlqEntry>>,
    deliver: Arc<dyn Deliver>,
    ledger: Option<DeliveryLedger>,
    notifier: Option<(Arc<dyn DlqNotifier>, Duration)>,
    config: RelayConfig,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the in-flight claim on drop.
struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

impl OutboxRelay {
    pub fn new(
        source: impl Into<String>,
        outbox: Arc<dyn DocumentStore<OutboxRecord>>,
        dlq: Arc<dyn DocumentStore<DlqEntry>>,
        deliver: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            source: source.into(),
            outbox,
            dlq,
            deliver,
            ledger: None,
            notifier: None,
            config: RelayConfig::default(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Record successful deliveries so DLQ replay can detect duplicates.
    pub fn with_ledger(mut self, ledger: DeliveryLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Fire a best-effort notify (bounded by `timeout`) after each DLQ write.
    pub fn with_notifier(mut self, notifier: Arc<dyn DlqNotifier>, timeout: Duration) -> Self {
        self.notifier = Some((notifier, timeout));
        self
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn claim(&self, key: &str) -> Option<Claim<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(key.to_string()) {
            return None;
        }
        Some(Claim {
            set: &self.in_flight,
            key: key.to_string(),
        })
    }

    /// Run one delivery attempt for the record under `key`.
    pub async fn process_record(&self, key: &str) -> Result<ProcessOutcome, RelayError> {
        let Some(claim) = self.claim(key) else {
            debug!(source = %self.source, doc_id = key, "record already in flight");
            return Ok(ProcessOutcome::InFlight);
        };

        let Some(mut record) = self.outbox.get(key).await? else {
            return Ok(ProcessOutcome::Missing);
        };
        if !record.is_pending() {
            return Ok(ProcessOutcome::NotPending(record.status));
        }

        let envelope = match record.parse_envelope() {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    source = %self.source,
                    doc_id = key,
                    event_type = %record.event_type,
                    error = %err,
                    "outbox envelope is corrupt; dead-lettering without delivery"
                );
                record.status = OutboxStatus::Dlq;
                record.last_error = Some(err.to_string());
                if record.first_failed_at.is_none() {
                    record.first_failed_at = Some(chrono::Utc::now());
                }
                return self
                    .dead_letter(key, record, None, FailureKind::Corruption)
                    .await;
            }
        };

        match self.deliver.deliver(envelope.lane(), envelope.clone()).await {
            Ok(()) => {
                record.record_attempt(OutboxStatus::Delivered, None);
                let attempts = record.attempt_count;
                self.outbox.upsert(key, record).await?;
                if let Some(ledger) = &self.ledger {
                    ledger.record(&envelope, DeliveredVia::Relay).await?;
                }
                info!(
                    event_id = %envelope.event_id(),
                    trace_id = %envelope.trace_id(),
                    lane = %envelope.lane(),
                    event_type = envelope.event_type(),
                    attempts,
                    "outbox event delivered"
                );
                Ok(ProcessOutcome::Delivered { attempts })
            }
            Err(err) => {
                let attempt = record.attempt_count + 1;
                if attempt < self.config.max_attempts {
                    let backoff = self.config.backoff_for_attempt(attempt);
                    warn!(
                        event_id = %envelope.event_id(),
                        trace_id = %envelope.trace_id(),
                        lane = %envelope.lane(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "delivery failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;

                    // The pending write below re-triggers this record, so the
                    // claim has to be gone before it lands.
                    drop(claim);
                    record.record_attempt(OutboxStatus::Pending, Some(err.to_string()));
                    self.outbox.upsert(key, record).await?;
                    Ok(ProcessOutcome::RetryScheduled { attempt })
                } else {
                    error!(
                        event_id = %envelope.event_id(),
                        trace_id = %envelope.trace_id(),
                        lane = %envelope.lane(),
                        attempt,
                        error = %err,
                        "delivery attempts exhausted"
                    );
                    record.record_attempt(OutboxStatus::Dlq, Some(err.to_string()));
                    self.dead_letter(key, record, Some(&envelope), FailureKind::DeliveryExhausted)
                        .await
                }
            }
        }
    }

    /// Write the DLQ entry, then mark the outbox record terminal.
    async fn dead_letter(
        &self,
        key: &str,
        record: OutboxRecord,
        parsed: Option<&EventEnvelope>,
        failure: FailureKind,
    ) -> Result<ProcessOutcome, RelayError> {
        let classification = DlqTier::classify(&record.event_type);
        if classification.is_defaulted() {
            warn!(
                event_type = %record.event_type,
                tier = %classification.tier(),
                "event type has no tier mapping; using default"
            );
        }

        let last_error = record.last_error.clone().unwrap_or_default();
        let entry = DlqEntry::from_outbox(&self.source, key, &record, parsed, failure, last_error);
        let dlq_id = entry.dlq_id().clone();
        let tier = entry.dlq_level();

        // Insert-if-absent keeps processor annotations if this runs twice.
        let entry = self.dlq.create(dlq_id.as_str(), entry).await?.into_inner();
        self.outbox.upsert(key, record).await?;

        error!(
            dlq_id = %dlq_id,
            tier = %tier,
            event_type = entry.event_type(),
            lane = %entry.source_lane(),
            attempt_count = entry.attempt_count(),
            "outbox record dead-lettered"
        );

        if let Some((notifier, bound)) = &self.notifier {
            notify_in_background(notifier.clone(), entry, *bound);
        }

        Ok(ProcessOutcome::DeadLettered {
            dlq_id,
            tier,
            failure,
        })
    }

    fn spawn_process(self: &Arc<Self>, tasks: &mut JoinSet<()>, key: String) {
        let relay = self.clone();
        tasks.spawn(async move {
            match relay.process_record(&key).await {
                Ok(outcome) => debug!(doc_id = %key, ?outcome, "outbox record processed"),
                Err(err) => error!(source = %relay.source, doc_id = %key, error = %err, "outbox processing failed"),
            }
        });
    }

    async fn scan_pending(self: &Arc<Self>, tasks: &mut JoinSet<()>) {
        match self.outbox.list().await {
            Ok(records) => {
                for (key, record) in records {
                    if record.is_pending() {
                        self.spawn_process(tasks, key);
                    }
                }
            }
            Err(err) => error!(source = %self.source, error = %err, "pending scan failed"),
        }
    }

    /// Spawn the relay loop.
    ///
    /// The change feed is subscribed before the pending scan so no write
    /// falls between them. The feed is not reconnected: if it closes the
    /// worker logs and exits.
    pub fn start(self) -> RelayHandle {
        let relay = Arc::new(self);
        let mut feed = relay.outbox.watch();

        WorkerHandle::spawn("outbox-relay", move |shutdown| async move {
            let mut tasks = JoinSet::new();
            relay.scan_pending(&mut tasks).await;
            info!(source = %relay.source, "outbox relay started");

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    change = feed.recv() => match change {
                        Ok(Change { key, document, .. }) if document.is_pending() => {
                            relay.spawn_process(&mut tasks, key);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(source = %relay.source, skipped, "outbox feed lagged; rescanning");
                            relay.scan_pending(&mut tasks).await;
                        }
                        Err(RecvError::Closed) => {
                            error!(source = %relay.source, "outbox change feed closed; relay stopping");
                            break;
                        }
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(err) = joined {
                            error!(source = %relay.source, error = %err, "outbox task aborted");
                        }
                    }
                }
            }

            // In-flight attempts run to completion.
            while tasks.join_next().await.is_some() {}
            info!(source = %relay.source, "outbox relay stopped");
        })
    }
}
