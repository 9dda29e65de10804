//! Storage boundary for stock records, ledger, outbox and snapshots.
//!
//! The write path is a single operation, [`StockStore::commit`]: the updated record,
//! its ledger entry, its stream events and one outbox row per event are persisted
//! together or not at all. The record write is a compare-and-swap on `version`.
//!
//! All traits are synchronous and `Send + Sync`; `Arc<S>` implements each of them so
//! one store instance can be shared by the mutation service and the background jobs.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_core::{AggregateRoot, EventId, ExpectedVersion, Sku};
use stockledger_events::EventEnvelope;
use stockledger_inventory::{LedgerEntry, Snapshot, SnapshotType, StockRecord};

use crate::event_store::{StoredEvent, UncommittedEvent};

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Truncate to the microsecond resolution every backend can store, so a value
/// reads back exactly as written.
pub fn storage_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::microseconds(1)).unwrap_or(at)
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The record's version moved since it was loaded.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The commit is internally inconsistent (wrong SKU, version jump, no events).
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One accepted mutation, ready to persist.
#[derive(Debug, Clone)]
pub struct StockCommit {
    /// The record after the mutation.
    pub record: StockRecord,
    /// Version the record had when it was loaded.
    pub expected_version: ExpectedVersion,
    pub ledger_entry: LedgerEntry,
    /// Specialised events first, `StockLevelChanged` last. Each becomes a stream
    /// row and an outbox row.
    pub events: Vec<UncommittedEvent>,
}

impl StockCommit {
    /// Checks that every backend applies before writing anything.
    pub fn validate(&self) -> Result<(), StoreError> {
        let sku = self.record.sku();
        if self.events.is_empty() {
            return Err(StoreError::InvalidCommit(format!(
                "commit for {sku} carries no events"
            )));
        }
        if let Some(e) = self.events.iter().find(|e| &e.sku != sku) {
            return Err(StoreError::InvalidCommit(format!(
                "event {} targets {}, commit is for {sku}",
                e.event_id, e.sku
            )));
        }
        if &self.ledger_entry.sku != sku {
            return Err(StoreError::InvalidCommit(format!(
                "ledger entry targets {}, commit is for {sku}",
                self.ledger_entry.sku
            )));
        }
        if let ExpectedVersion::Exact(expected) = self.expected_version {
            if self.record.version() != expected + 1 {
                return Err(StoreError::InvalidCommit(format!(
                    "record version {} does not follow expected version {expected}",
                    self.record.version()
                )));
            }
        }
        Ok(())
    }
}

/// Integration event awaiting (or past) publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Shared with the stream event it mirrors.
    pub id: EventId,
    pub aggregate_id: Sku,
    pub event_type: String,
    pub sequence_number: u64,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn pending(event: &StoredEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: event.event_id,
            aggregate_id: event.sku.clone(),
            event_type: event.event_type.clone(),
            sequence_number: event.sequence_number,
            occurred_at: event.occurred_at,
            payload: event.payload.clone(),
            created_at,
            published: false,
            published_at: None,
        }
    }

    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.id,
            self.aggregate_id.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

pub trait StockStore: Send + Sync {
    fn load(&self, sku: &Sku) -> Result<Option<StockRecord>, StoreError>;

    /// Persist a mutation atomically. Returns the stream events with their
    /// assigned sequence numbers.
    fn commit(&self, commit: StockCommit) -> Result<Vec<StoredEvent>, StoreError>;

    fn list_skus(&self) -> Result<Vec<Sku>, StoreError>;
}

pub trait LedgerStore: Send + Sync {
    /// Entries for `sku` with `from <= timestamp < to`, oldest first.
    fn entries(
        &self,
        sku: &Sku,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Delete entries older than `cutoff`. Returns the number removed.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub trait OutboxStore: Send + Sync {
    /// Oldest unpublished events first (`created_at`, then insertion order).
    fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Flip an event to published. Already-published events are left as they are.
    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete events published before `cutoff`. Unpublished events are never purged.
    fn purge_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    fn unpublished_count(&self) -> Result<u64, StoreError>;
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Snapshot with the greatest `snapshot_timestamp` strictly before `before`.
    fn latest_before(&self, sku: &Sku, before: DateTime<Utc>) -> Result<Option<Snapshot>, StoreError>;

    /// Snapshots for `sku` with `from <= snapshot_timestamp <= to`, oldest first.
    fn list(
        &self,
        sku: &Sku,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError>;

    /// Whether a snapshot of `snapshot_type` is already stamped on `day` (UTC).
    fn exists_on(&self, sku: &Sku, snapshot_type: SnapshotType, day: NaiveDate) -> Result<bool, StoreError>;

    /// Delete snapshots of `snapshot_type` stamped before `cutoff`.
    fn purge(&self, snapshot_type: SnapshotType, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn load(&self, sku: &Sku) -> Result<Option<StockRecord>, StoreError> {
        (**self).load(sku)
    }

    fn commit(&self, commit: StockCommit) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).commit(commit)
    }

    fn list_skus(&self) -> Result<Vec<Sku>, StoreError> {
        (**self).list_skus()
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn entries(
        &self,
        sku: &Sku,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries(sku, from, to)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_before(cutoff)
    }
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        (**self).fetch_unpublished(limit)
    }

    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).mark_published(id, at)
    }

    fn purge_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_published_before(cutoff)
    }

    fn unpublished_count(&self) -> Result<u64, StoreError> {
        (**self).unpublished_count()
    }
}

impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        (**self).save(snapshot)
    }

    fn latest_before(&self, sku: &Sku, before: DateTime<Utc>) -> Result<Option<Snapshot>, StoreError> {
        (**self).latest_before(sku, before)
    }

    fn list(
        &self,
        sku: &Sku,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        (**self).list(sku, from, to)
    }

    fn exists_on(&self, sku: &Sku, snapshot_type: SnapshotType, day: NaiveDate) -> Result<bool, StoreError> {
        (**self).exists_on(sku, snapshot_type, day)
    }

    fn purge(&self, snapshot_type: SnapshotType, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge(snapshot_type, cutoff)
    }
}
