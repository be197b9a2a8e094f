use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use eventrail_events::DlqTier;

use super::{DlqEntry, DlqError, DlqStatus, ReviewRequiredProcessor, SafeAutoProcessor, SecurityBlockProcessor};
use crate::store::{Change, ChangeKind, DocumentStore};
use crate::workers::WorkerHandle;

/// Outcome of one sweep over pending entries.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
}

/// Dispatches new dead-letter entries to their tier processor.
pub struct DlqWorker {
    dlq: Arc<dyn DocumentStore<DlqEntry>>,
    safe_auto: SafeAutoProcessor,
    review: ReviewRequiredProcessor,
    security: SecurityBlockProcessor,
}

impl DlqWorker {
    pub fn new(
        dlq: Arc<dyn DocumentStore<DlqEntry>>,
        safe_auto: SafeAutoProcessor,
        review: ReviewRequiredProcessor,
        security: SecurityBlockProcessor,
    ) -> Self {
        Self {
            dlq,
            safe_auto,
            review,
            security,
        }
    }

    /// Run one entry through the processor of its tier.
    pub async fn dispatch(&self, entry: DlqEntry) -> Result<DlqStatus, DlqError> {
        match entry.dlq_level() {
            DlqTier::SafeAuto => self.safe_auto.process(entry).await,
            DlqTier::ReviewRequired => self.review.process(entry).await,
            DlqTier::SecurityBlock => self.security.process(entry).await,
        }
    }

    /// Process every entry still marked pending (startup sweep).
    ///
    /// A failing entry is logged and left pending; the sweep moves on.
    pub async fn process_pending(&self) -> Result<SweepReport, DlqError> {
        let mut report = SweepReport::default();
        for (_, entry) in self.dlq.list().await? {
            if entry.status() != DlqStatus::Pending {
                continue;
            }
            let dlq_id = entry.dlq_id().clone();
            match self.dispatch(entry).await {
                Ok(_) => report.processed += 1,
                Err(err) => {
                    error!(dlq_id = %dlq_id, error = %err, "dlq processing failed during sweep");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Spawn the worker: sweep pending entries, then follow the change feed.
    pub fn start(self) -> WorkerHandle {
        let worker = Arc::new(self);
        let mut feed = worker.dlq.watch();
        WorkerHandle::spawn("dlq-worker", move |shutdown| async move {
            match worker.process_pending().await {
                Ok(report) => info!(processed = report.processed, failed = report.failed, "dlq startup sweep done"),
                Err(err) => error!(error = %err, "dlq startup sweep failed"),
            }

            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    change = feed.recv() => match change {
                        Ok(Change { kind: ChangeKind::Added, document, .. })
                            if document.status() == DlqStatus::Pending =>
                        {
                            let worker = worker.clone();
                            tasks.spawn(async move {
                                let dlq_id = document.dlq_id().clone();
                                if let Err(err) = worker.dispatch(document).await {
                                    error!(dlq_id = %dlq_id, error = %err, "dlq processing failed");
                                }
                            });
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "dlq feed lagged; sweeping pending entries");
                            match worker.process_pending().await {
                                Ok(report) if report.failed > 0 => {
                                    warn!(failed = report.failed, "dlq sweep left failing entries pending");
                                }
                                Ok(_) => {}
                                Err(err) => error!(error = %err, "dlq sweep failed"),
                            }
                        }
                        Err(RecvError::Closed) => {
                            error!("dlq change feed closed; worker stopping");
                            break;
                        }
                    },
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                }
            }

            while tasks.join_next().await.is_some() {}
            info!("dlq worker stopped");
        })
    }
}
