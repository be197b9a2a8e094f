//! Integration Event Router (IER).
//!
//! The router owns a registry of `{event_type, lane, handler}` entries and
//! fans each routed envelope out to every matching handler.
//!
//! - **Explicit instance**: there is no process-wide registry. Construct one
//!   `Router` per process and hand an `Arc<Router>` to every registrant.
//! - **Exact-or-wildcard matching** on both event type and lane.
//! - **Isolate-on-failure fan-out**: matching handlers run concurrently as
//!   separate tokio tasks; an error or panic in one is logged and counted
//!   but never affects the others or the caller.
//! - **No ordering**: nothing is promised about the order in which
//!   subscribers observe the same event. Repeated deliveries of one event
//!   are reconciled by the version guard at each projection.
//! - **Lane is a routing key**, not a queue discipline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::{EventEnvelope, EventHandler, Lane};

/// Exact value or wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector<T> {
    Any,
    Only(T),
}

impl<T: PartialEq> Selector<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Selector::Any => true,
            Selector::Only(v) => v == value,
        }
    }
}

impl From<&str> for Selector<String> {
    fn from(value: &str) -> Self {
        if value == "*" {
            Selector::Any
        } else {
            Selector::Only(value.to_string())
        }
    }
}

impl From<String> for Selector<String> {
    fn from(value: String) -> Self {
        Selector::from(value.as_str())
    }
}

impl From<Lane> for Selector<Lane> {
    fn from(value: Lane) -> Self {
        Selector::Only(value)
    }
}

struct Registration {
    id: u64,
    event_type: Selector<String>,
    lane: Selector<Lane>,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: RwLock<Vec<Registration>>,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        let mut entries = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|r| r.id != id);
        entries.len() != before
    }
}

/// Handle returned by [`Router::register_subscriber`].
///
/// Dropping the handle leaves the subscriber registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the subscriber. Returns `false` if it was already gone or the
    /// router no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Lane-aware event router with an owned subscriber registry.
#[derive(Debug, Default, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type (or `"*"`) on a lane (or any).
    pub fn register_subscriber(
        &self,
        event_type: impl Into<Selector<String>>,
        lane: impl Into<Selector<Lane>>,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            id,
            event_type: event_type.into(),
            lane: lane.into(),
            handler,
        };

        debug!(
            subscriber = registration.handler.name(),
            event_type = ?registration.event_type,
            lane = ?registration.lane,
            "subscriber registered"
        );

        let mut entries = match self.registry.entries.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(registration);

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        match self.registry.entries.read() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn matching(&self, event_type: &str, lane: Lane) -> Vec<Arc<dyn EventHandler>> {
        let entries = match self.registry.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let event_type = event_type.to_string();
        entries
            .iter()
            .filter(|r| r.event_type.matches(&event_type) && r.lane.matches(&lane))
            .map(|r| r.handler.clone())
            .collect()
    }

    /// Fan an envelope out to every matching subscriber and wait for all of
    /// them. Subscriber failures are logged and counted, never returned.
    pub async fn route_event(&self, envelope: EventEnvelope, lane: Lane) -> RouteReport {
        let handlers = self.matching(envelope.event_type(), lane);
        let mut report = RouteReport {
            matched: handlers.len(),
            ..RouteReport::default()
        };

        if handlers.is_empty() {
            warn!(
                event_id = %envelope.event_id(),
                event_type = envelope.event_type(),
                lane = %lane,
                "no subscriber for event; acknowledged as no-op"
            );
            return report;
        }

        let envelope = Arc::new(envelope);
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let envelope = envelope.clone();
            tasks.spawn(async move {
                let result = handler.handle(&envelope, lane).await;
                (handler.name().to_string(), result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((subscriber, Err(err))) => {
                    report.failed += 1;
                    warn!(
                        subscriber = %subscriber,
                        event_id = %envelope.event_id(),
                        trace_id = %envelope.trace_id(),
                        event_type = envelope.event_type(),
                        lane = %lane,
                        error = %err,
                        "subscriber failed"
                    );
                }
                Err(join_err) => {
                    report.failed += 1;
                    error!(
                        event_id = %envelope.event_id(),
                        trace_id = %envelope.trace_id(),
                        event_type = envelope.event_type(),
                        lane = %lane,
                        error = %join_err,
                        "subscriber task aborted"
                    );
                }
            }
        }

        report
    }
}
