//! `eventrail-core`: identifiers and error primitives shared by every crate.
//!
//! This crate carries no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, DlqId, EventId, SagaId, TraceId};
