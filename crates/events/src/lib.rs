//! Event mechanics: envelopes, lanes, dead-letter tiers, the version guard,
//! the integration event router and saga state.
//!
//! Nothing here touches storage; infra wires these pieces to collections.

pub mod envelope;
pub mod event_types;
pub mod handler;
pub mod lane;
pub mod router;
pub mod saga;
pub mod tier;
pub mod version_guard;

pub use envelope::{EnvelopeError, EventEnvelope, idempotency_key};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use lane::Lane;
pub use router::{RouteReport, Router, Selector, Subscription};
pub use saga::{SagaState, SagaStatus, SagaTransitionError};
pub use tier::{Classification, DlqTier};
pub use version_guard::{VersionCheck, version_guard_allows};
