//! Best-effort direct notification of the DLQ processors.
//!
//! The persisted entry is the source of truth and already triggers the
//! processors through the change feed. The notify only shortens latency:
//! it runs detached, is bounded by a timeout, and its failure is logged and
//! dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::DlqEntry;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notify transport error: {0}")]
    Transport(String),

    #[error("notify endpoint answered {0}")]
    Status(u16),
}

#[async_trait]
pub trait DlqNotifier: Send + Sync {
    async fn notify(&self, entry: &DlqEntry) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyBody<'a> {
    dlq_id: &'a str,
    dlq_level: eventrail_events::DlqTier,
    source_lane: eventrail_events::Lane,
    event_type: &'a str,
}

/// POSTs a small JSON body to the processor endpoint.
#[derive(Debug, Clone)]
pub struct HttpDlqNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpDlqNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DlqNotifier for HttpDlqNotifier {
    async fn notify(&self, entry: &DlqEntry) -> Result<(), NotifyError> {
        let body = NotifyBody {
            dlq_id: entry.dlq_id().as_str(),
            dlq_level: entry.dlq_level(),
            source_lane: entry.source_lane(),
            event_type: entry.event_type(),
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fire the notify on a detached task, bounded by `bound`.
///
/// Returns immediately; the caller's primary write is never affected.
pub fn notify_in_background(
    notifier: Arc<dyn DlqNotifier>,
    entry: DlqEntry,
    bound: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let dlq_id = entry.dlq_id().clone();
        match tokio::time::timeout(bound, notifier.notify(&entry)).await {
            Ok(Ok(())) => debug!(dlq_id = %dlq_id, "dlq processor notified"),
            Ok(Err(err)) => warn!(dlq_id = %dlq_id, error = %err, "dlq notify failed (ignored)"),
            Err(_) => warn!(dlq_id = %dlq_id, bound_ms = bound.as_millis() as u64, "dlq notify timed out (ignored)"),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dlq::FailureKind;
    use crate::outbox::OutboxRecord;
    use eventrail_events::Lane;

    struct Hanging(Arc<AtomicUsize>);

    #[async_trait]
    impl DlqNotifier for Hanging {
        async fn notify(&self, _entry: &DlqEntry) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_notifier_is_cut_off_by_the_bound() {
        let calls = Arc::new(AtomicUsize::new(0));
        let record = OutboxRecord::from_raw("{}", "member.joined", Lane::Standard);
        let entry =
            DlqEntry::from_outbox("outbox", "d", &record, None, FailureKind::Corruption, "x");

        let handle = notify_in_background(
            Arc::new(Hanging(calls.clone())),
            entry,
            Duration::from_millis(100),
        );

        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
