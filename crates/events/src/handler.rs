use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{EventEnvelope, Lane};

/// A subscriber registered with the [`Router`](crate::Router).
///
/// Handlers must be idempotent: the outbox relay delivers at-least-once and
/// dead-letter replays re-deliver the same envelope. Failures are reported
/// through the returned error and stay local to the handler; the router logs
/// them and carries on with the other subscribers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, envelope: &EventEnvelope, lane: Lane) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a handler.
///
/// ```ignore
/// router.register_subscriber("*", Selector::Any, handler_fn("audit", |env, _lane| async move {
///     tracing::info!(event_id = %env.event_id(), "seen");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope, Lane) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope, Lane) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &EventEnvelope, lane: Lane) -> anyhow::Result<()> {
        (self.f)(envelope.clone(), lane).await
    }
}
