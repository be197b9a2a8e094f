//! HTTP client for the scheduling command gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eventrail_core::TraceId;

use super::{AssignmentOutcome, CommandError, SchedulingCommands};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptBody<'a> {
    proposal_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignBody<'a> {
    member_id: &'a str,
}

/// Gateway answer to an assignment command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AssignReply {
    Confirmed,
    Rejected {
        #[serde(default)]
        reason: String,
    },
}

impl From<AssignReply> for AssignmentOutcome {
    fn from(reply: AssignReply) -> Self {
        match reply {
            AssignReply::Confirmed => AssignmentOutcome::Confirmed,
            AssignReply::Rejected { reason } => AssignmentOutcome::Rejected { reason },
        }
    }
}

/// Sends saga commands to `{base}/schedule-items/{id}/...`, forwarding the
/// trace id.
#[derive(Debug, Clone)]
pub struct HttpSchedulingCommands {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSchedulingCommands {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Path segments are percent-encoded, so an id cannot escape its segment.
    fn url(&self, schedule_item_id: &str, action: &str) -> Result<reqwest::Url, CommandError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| CommandError::Transport(format!("invalid gateway url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| CommandError::Transport(format!("gateway url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["schedule-items", schedule_item_id, action]);
        Ok(url)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        url: reqwest::Url,
        trace_id: &TraceId,
        body: &B,
    ) -> Result<reqwest::Response, CommandError> {
        self.client
            .post(url)
            .timeout(self.timeout)
            .header("x-trace-id", trace_id.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CommandError::Timeout
                } else {
                    CommandError::Transport(e.to_string())
                }
            })
    }
}

#[async_trait]
impl SchedulingCommands for HttpSchedulingCommands {
    async fn accept_proposal(
        &self,
        schedule_item_id: &str,
        proposal_id: &str,
        trace_id: &TraceId,
    ) -> Result<(), CommandError> {
        let url = self.url(schedule_item_id, "accept-proposal")?;
        let response = self.post(url.clone(), trace_id, &AcceptBody { proposal_id }).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Transport(format!("{url} answered {status}")));
        }
        Ok(())
    }

    async fn assign(
        &self,
        schedule_item_id: &str,
        member_id: &str,
        trace_id: &TraceId,
    ) -> Result<AssignmentOutcome, CommandError> {
        let url = self.url(schedule_item_id, "assign")?;
        let response = self.post(url.clone(), trace_id, &AssignBody { member_id }).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Transport(format!("{url} answered {status}")));
        }
        let reply: AssignReply = response
            .json()
            .await
            .map_err(|e| CommandError::Transport(format!("unreadable assign reply: {e}")))?;
        Ok(reply.into())
    }
}
