//! `stockroom-core`: shared foundation for the inventory control workspace.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the per-request tenant/actor context, the domain error and the
//! optimistic concurrency expectation used by every store write.

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use context::RequestContext;
pub use error::{DomainError, DomainResult};
pub use id::{ProductId, ReservationId, TenantId, UserId};
