//! Delivery functions handed to the outbox relay.
//!
//! The relay only knows `deliver(lane, envelope)`. A failure here is the
//! *only* thing that drives its retry/dead-letter logic; subscriber failures
//! inside the router are isolated and never surface as delivery failures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use eventrail_events::{EventEnvelope, Lane, Router};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no endpoint configured for lane {0}")]
    NoEndpoint(Lane),
}

impl DeliveryError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, lane: Lane, envelope: EventEnvelope) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<D> Deliver for Arc<D>
where
    D: Deliver + ?Sized,
{
    async fn deliver(&self, lane: Lane, envelope: EventEnvelope) -> Result<(), DeliveryError> {
        (**self).deliver(lane, envelope).await
    }
}

/// In-process delivery straight into a [`Router`].
///
/// `route_event` isolates subscriber failures, so this never fails.
#[derive(Debug, Clone)]
pub struct RouterDelivery {
    router: Router,
}

impl RouterDelivery {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Deliver for RouterDelivery {
    async fn deliver(&self, lane: Lane, envelope: EventEnvelope) -> Result<(), DeliveryError> {
        let event_id = envelope.event_id();
        let report = self.router.route_event(envelope, lane).await;
        debug!(
            event_id = %event_id,
            lane = %lane,
            matched = report.matched,
            failed = report.failed,
            "routed"
        );
        Ok(())
    }
}

/// Delivery over HTTP to the process hosting each lane.
#[derive(Debug, Clone)]
pub struct HttpLaneDelivery {
    client: reqwest::Client,
    endpoints: HashMap<Lane, String>,
    timeout: Duration,
}

impl HttpLaneDelivery {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            endpoints: HashMap::new(),
            timeout,
        }
    }

    pub fn with_endpoint(mut self, lane: Lane, url: impl Into<String>) -> Self {
        self.endpoints.insert(lane, url.into());
        self
    }
}

#[async_trait]
impl Deliver for HttpLaneDelivery {
    async fn deliver(&self, lane: Lane, envelope: EventEnvelope) -> Result<(), DeliveryError> {
        let url = self
            .endpoints
            .get(&lane)
            .ok_or(DeliveryError::NoEndpoint(lane))?;

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("x-trace-id", envelope.trace_id().as_str())
            .header("idempotency-key", envelope.idempotency_key())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::rejected(format!("{url} answered {status}")));
        }
        Ok(())
    }
}

/// Adapter turning an async closure into a [`Deliver`] implementation.
pub struct FnDeliver<F>(F);

pub fn deliver_fn<F, Fut>(f: F) -> FnDeliver<F>
where
    F: Fn(Lane, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
{
    FnDeliver(f)
}

#[async_trait]
impl<F, Fut> Deliver for FnDeliver<F>
where
    F: Fn(Lane, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
{
    async fn deliver(&self, lane: Lane, envelope: EventEnvelope) -> Result<(), DeliveryError> {
        (self.0)(lane, envelope).await
    }
}
