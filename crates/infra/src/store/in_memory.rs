use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};

use stockledger_core::{AggregateRoot, EventId, Sku};
use stockledger_inventory::{LedgerEntry, Snapshot, SnapshotType, StockRecord};

use super::{
    LedgerStore, OutboxEvent, OutboxStore, SnapshotStore, StockCommit, StockStore, StoreError,
};
use crate::event_store::{EventStore, StoredEvent};

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<Sku, StockRecord>,
    streams: HashMap<Sku, Vec<StoredEvent>>,
    ledger: Vec<LedgerEntry>,
    /// Insertion order is the outbox tie-break.
    outbox: Vec<OutboxEvent>,
    snapshots: Vec<Snapshot>,
}

/// In-memory stock store: records, stream, ledger, outbox and snapshots behind one lock.
///
/// Intended for tests/dev. A commit holds the write lock for its whole duration, so it
/// is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    tables: RwLock<Tables>,
    fail_next_commit: AtomicBool,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a storage error after it has passed the
    /// version check, as a crashed transaction would.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

impl StockStore for InMemoryStockStore {
    fn load(&self, sku: &Sku) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.read()?.records.get(sku).cloned())
    }

    fn commit(&self, commit: StockCommit) -> Result<Vec<StoredEvent>, StoreError> {
        commit.validate()?;
        let sku = commit.record.sku().clone();

        let mut tables = self.write()?;

        let current = tables.records.get(&sku).map(|r| r.version()).unwrap_or(0);
        if !commit.expected_version.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "{sku}: expected {:?}, found {current}",
                commit.expected_version
            )));
        }

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Storage(format!("{sku}: injected commit failure")));
        }

        // Nothing below can fail, so the unit lands whole.
        let created_at = commit.ledger_entry.timestamp;
        let stream = tables.streams.entry(sku.clone()).or_default();
        let mut next = stream.last().map(|e| e.sequence_number).unwrap_or(0) + 1;
        let mut stored = Vec::with_capacity(commit.events.len());
        for event in commit.events {
            let event = event.into_stored(next);
            next += 1;
            stream.push(event.clone());
            stored.push(event);
        }

        tables
            .outbox
            .extend(stored.iter().map(|e| OutboxEvent::pending(e, created_at)));
        tables.ledger.push(commit.ledger_entry);
        tables.records.insert(sku, commit.record);

        Ok(stored)
    }

    fn list_skus(&self) -> Result<Vec<Sku>, StoreError> {
        let mut skus: Vec<Sku> = self.read()?.records.keys().cloned().collect();
        skus.sort();
        Ok(skus)
    }
}

impl EventStore for InMemoryStockStore {
    fn load_stream(&self, sku: &Sku) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.read()?.streams.get(sku).cloned().unwrap_or_default())
    }

    fn load_window(
        &self,
        sku: &Sku,
        after_sequence: u64,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let tables = self.read()?;
        let mut window: Vec<StoredEvent> = tables
            .streams
            .get(sku)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence_number > after_sequence)
                    .filter(|e| e.occurred_at <= until)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        window.sort_by_key(|e| (e.occurred_at, e.sequence_number));
        Ok(window)
    }
}

impl LedgerStore for InMemoryStockStore {
    fn entries(
        &self,
        sku: &Sku,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let tables = self.read()?;
        let mut entries: Vec<LedgerEntry> = tables
            .ledger
            .iter()
            .filter(|e| &e.sku == sku)
            .filter(|e| from.is_none_or(|from| e.timestamp >= from))
            .filter(|e| to.is_none_or(|to| e.timestamp < to))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let before = tables.ledger.len();
        tables.ledger.retain(|e| e.timestamp >= cutoff);
        Ok((before - tables.ledger.len()) as u64)
    }
}

impl OutboxStore for InMemoryStockStore {
    fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let tables = self.read()?;
        let mut pending: Vec<&OutboxEvent> = tables.outbox.iter().filter(|e| !e.published).collect();
        // Stable sort keeps insertion order within equal timestamps.
        pending.sort_by_key(|e| e.created_at);
        Ok(pending.into_iter().take(limit).cloned().collect())
    }

    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let event = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::Storage(format!("outbox event {id} not found")))?;
        if !event.published {
            event.published = true;
            event.published_at = Some(at);
        }
        Ok(())
    }

    fn purge_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let before = tables.outbox.len();
        tables
            .outbox
            .retain(|e| !(e.published && e.published_at.is_some_and(|at| at < cutoff)));
        Ok((before - tables.outbox.len()) as u64)
    }

    fn unpublished_count(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.outbox.iter().filter(|e| !e.published).count() as u64)
    }
}

impl SnapshotStore for InMemoryStockStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        // Snapshots are immutable; re-saving an id is a no-op.
        if !tables.snapshots.iter().any(|s| s.id == snapshot.id) {
            tables.snapshots.push(snapshot.clone());
        }
        Ok(())
    }

    fn latest_before(&self, sku: &Sku, before: DateTime<Utc>) -> Result<Option<Snapshot>, StoreError> {
        Ok(self
            .read()?
            .snapshots
            .iter()
            .filter(|s| &s.sku == sku && s.snapshot_timestamp < before)
            .max_by_key(|s| s.snapshot_timestamp)
            .cloned())
    }

    fn list(
        &self,
        sku: &Sku,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let mut found: Vec<Snapshot> = self
            .read()?
            .snapshots
            .iter()
            .filter(|s| &s.sku == sku && s.snapshot_timestamp >= from && s.snapshot_timestamp <= to)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.snapshot_timestamp);
        Ok(found)
    }

    fn exists_on(&self, sku: &Sku, snapshot_type: SnapshotType, day: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.read()?.snapshots.iter().any(|s| {
            &s.sku == sku && s.snapshot_type == snapshot_type && s.snapshot_timestamp.date_naive() == day
        }))
    }

    fn purge(&self, snapshot_type: SnapshotType, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let before = tables.snapshots.len();
        tables
            .snapshots
            .retain(|s| !(s.snapshot_type == snapshot_type && s.snapshot_timestamp < cutoff));
        Ok((before - tables.snapshots.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::{Duration, TimeZone};
    use stockledger_core::{Aggregate, ExpectedVersion, OperatorId, SnapshotId};
    use stockledger_inventory::{SnapshotBuilder, SnapshotReason, StockCommand};

    fn sku() -> Sku {
        Sku::parse("SKU-1").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap()
    }

    fn commit_for(record: &StockRecord, command: StockCommand, at: DateTime<Utc>) -> StockCommit {
        let expected = ExpectedVersion::Exact(record.version());
        let mut next = record.clone();
        let change = next.execute(&command, at).unwrap();
        StockCommit {
            ledger_entry: LedgerEntry::record(
                next.sku().clone(),
                &change,
                None,
                None,
                OperatorId::system(),
            ),
            events: change
                .events
                .iter()
                .map(|e| UncommittedEvent::from_typed(e).unwrap())
                .collect(),
            record: next,
            expected_version: expected,
        }
    }

    #[test]
    fn commit_writes_every_table_and_sequences_the_stream() {
        let store = InMemoryStockStore::new();
        let empty = StockRecord::new(sku());

        let first = store
            .commit(commit_for(&empty, StockCommand::Create { initial_quantity: 10 }, t0()))
            .unwrap();
        let record = store.load(&sku()).unwrap().unwrap();
        let second = store
            .commit(commit_for(&record, StockCommand::Allocate { quantity: 4 }, t0()))
            .unwrap();

        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1]);
        assert_eq!(second.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![2]);
        assert_eq!(store.load(&sku()).unwrap().unwrap().version(), 2);
        assert_eq!(store.entries(&sku(), None, None).unwrap().len(), 2);
        assert_eq!(store.unpublished_count().unwrap(), 2);
        assert_eq!(store.load_stream(&sku()).unwrap().len(), 2);
    }

    #[test]
    fn stale_version_is_a_concurrency_error() {
        let store = InMemoryStockStore::new();
        let empty = StockRecord::new(sku());
        store
            .commit(commit_for(&empty, StockCommand::Create { initial_quantity: 5 }, t0()))
            .unwrap();

        let err = store
            .commit(commit_for(&empty, StockCommand::Create { initial_quantity: 5 }, t0()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[test]
    fn injected_failure_writes_nothing() {
        let store = InMemoryStockStore::new();
        store.fail_next_commit();

        let err = store
            .commit(commit_for(
                &StockRecord::new(sku()),
                StockCommand::Receive { quantity: 3 },
                t0(),
            ))
            .unwrap_err();

        assert!(matches!(err, StoreError::Storage(_)));
        assert!(store.load(&sku()).unwrap().is_none());
        assert!(store.load_stream(&sku()).unwrap().is_empty());
        assert!(store.entries(&sku(), None, None).unwrap().is_empty());
        assert_eq!(store.unpublished_count().unwrap(), 0);
    }

    #[test]
    fn outbox_purge_keeps_unpublished_events() {
        let store = InMemoryStockStore::new();
        let stored = store
            .commit(commit_for(
                &StockRecord::new(sku()),
                StockCommand::Create { initial_quantity: 1 },
                t0(),
            ))
            .unwrap();
        let record = store.load(&sku()).unwrap().unwrap();
        store
            .commit(commit_for(&record, StockCommand::Receive { quantity: 1 }, t0()))
            .unwrap();

        store.mark_published(stored[0].event_id, t0()).unwrap();
        let purged = store.purge_published_before(t0() + Duration::days(1)).unwrap();

        assert_eq!(purged, 1);
        assert_eq!(store.unpublished_count().unwrap(), 1);
        assert_eq!(store.fetch_unpublished(10).unwrap().len(), 1);
    }

    #[test]
    fn latest_before_is_strict() {
        let store = InMemoryStockStore::new();
        let snapshot = SnapshotBuilder::new(sku()).build(
            SnapshotId::new(),
            t0(),
            SnapshotType::Daily,
            SnapshotReason::Scheduled,
            OperatorId::system(),
            t0(),
        );
        store.save(&snapshot).unwrap();
        store.save(&snapshot).unwrap();

        assert!(store.latest_before(&sku(), t0()).unwrap().is_none());
        assert_eq!(
            store.latest_before(&sku(), t0() + Duration::seconds(1)).unwrap(),
            Some(snapshot)
        );
        assert_eq!(store.list(&sku(), t0(), t0()).unwrap().len(), 1);
        assert!(store.exists_on(&sku(), SnapshotType::Daily, t0().date_naive()).unwrap());
    }

    #[test]
    fn window_starts_after_a_sequence_number_and_stops_at_a_time() {
        let store = InMemoryStockStore::new();
        let empty = StockRecord::new(sku());
        store
            .commit(commit_for(&empty, StockCommand::Create { initial_quantity: 10 }, t0()))
            .unwrap();
        let record = store.load(&sku()).unwrap().unwrap();
        let late = t0() + Duration::hours(2);
        store
            .commit(commit_for(&record, StockCommand::Receive { quantity: 5 }, late))
            .unwrap();

        let sequences = |after, until| -> Vec<u64> {
            store
                .load_window(&sku(), after, until)
                .unwrap()
                .iter()
                .map(|e| e.sequence_number)
                .collect()
        };

        assert_eq!(sequences(0, late), vec![1, 2]);
        assert_eq!(sequences(1, late), vec![2]);
        assert_eq!(sequences(0, t0() + Duration::hours(1)), vec![1]);
        assert!(sequences(2, late).is_empty());
    }
}
