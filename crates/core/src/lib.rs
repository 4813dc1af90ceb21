//! `provigate-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion, execute, reconstitute};
pub use context::ExecutionContext;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CorrelationId, TenantId, UserId};
