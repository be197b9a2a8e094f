//! Read-model projections.
//!
//! All projections go through [`ProjectionFunnel`]. Views are:
//! - **Version-guarded**: one document per aggregate, strictly increasing versions
//! - **Audit**: one document per event, overwritten on redelivery
//! - **Disposable**: rebuildable by replaying the outbox

pub mod funnel;
pub mod routes;
pub mod view_store;

pub use funnel::{ApplyReport, ProjectionError, ProjectionFunnel, WriteOutcome};
pub use routes::{ViewRoute, WriteMode, routes_for};
pub use view_store::{InMemoryViewStore, ProjectionViewRecord, ViewStore};
