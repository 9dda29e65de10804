//! `stockledger-core` - domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error taxonomy, and the aggregate/versioning traits.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EventId, HoldId, LedgerEntryId, OperatorId, Sku, SnapshotId};
pub use value_object::ValueObject;
