//! Infrastructure layer: stores, mutation pipeline, outbox, snapshots, replay and
//! background jobs.

pub mod config;
pub mod event_store;
pub mod inbound;
pub mod jobs;
pub mod mutation;
pub mod outbox;
pub mod replay;
pub mod retention;
pub mod snapshots;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, StockConfig};
pub use event_store::{EventStore, StoredEvent, UncommittedEvent};
pub use inbound::{InboundError, InboundHandler, InboundMessage};
pub use mutation::{MutationContext, MutationError, MutationOutcome, MutationService};
pub use replay::{ReplayEngine, ReplayError};
pub use snapshots::{
    SnapshotError, SnapshotRetention, SnapshotService, Traceability, TraceabilitySource,
};
pub use store::{
    InMemoryStockStore, LedgerStore, OutboxEvent, OutboxStore, PostgresStockStore, SnapshotStore,
    StockCommit, StockStore, StoreError,
};
