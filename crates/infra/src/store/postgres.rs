//! Postgres-backed stock store.
//!
//! One transaction per commit: the record CAS, the stream rows, the outbox rows and
//! the ledger entry either all land or none do.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Two writers raced on a record insert or a stream position |
//! | Database (check constraint violation) | `23514` | `InvalidCommit` | Negative quantity or sequence number reached the database |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Sync access
//!
//! The store traits are synchronous. Trait methods drive the async queries with
//! `Handle::block_on` on the runtime handle given at construction, so they must be
//! called from threads that are not themselves runtime workers (scheduler threads,
//! `spawn_blocking`, plain `std::thread`s).

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use stockledger_core::{AggregateRoot, EventId, ExpectedVersion, LedgerEntryId, OperatorId, Sku};
use stockledger_inventory::{LedgerEntry, Snapshot, SnapshotType, StockRecord, StockState};

use super::{LedgerStore, OutboxEvent, OutboxStore, SnapshotStore, StockCommit, StockStore, StoreError};
use crate::event_store::{EventStore, StoredEvent};
use crate::jobs::{JobRecord, JobRecordStore, JobStoreError};

/// Schema for every table the store touches. Idempotent.
pub const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    pub async fn fetch_record(&self, sku: &Sku) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT sku, state, version, last_updated
            FROM stock_records
            WHERE sku = $1
            "#,
        )
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_record", e))?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Persist one mutation in a single transaction.
    ///
    /// 1. CAS on the record (`INSERT .. ON CONFLICT DO NOTHING` for a new record,
    ///    `UPDATE .. WHERE version = expected` otherwise); zero rows is a conflict
    /// 2. Append stream events after the current stream head
    /// 3. Insert one outbox row per event
    /// 4. Insert the ledger entry
    #[instrument(
        skip(self, commit),
        fields(
            sku = %commit.record.sku(),
            version = commit.record.version(),
            event_count = commit.events.len()
        ),
        err
    )]
    pub async fn commit_unit(&self, commit: StockCommit) -> Result<Vec<StoredEvent>, StoreError> {
        commit.validate()?;
        let record = &commit.record;
        let sku = record.sku().clone();
        let state = serde_json::to_value(record.state())
            .map_err(|e| StoreError::Serialization(format!("stock state: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let written = match commit.expected_version {
            ExpectedVersion::Exact(0) => sqlx::query(
                r#"
                INSERT INTO stock_records (sku, state, quantity_on_hand, quantity_allocated, version, last_updated)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (sku) DO NOTHING
                "#,
            )
            .bind(sku.as_str())
            .bind(&state)
            .bind(record.quantity_on_hand())
            .bind(record.quantity_allocated())
            .bind(to_i64(record.version())?)
            .bind(record.last_updated())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_record", e))?,
            ExpectedVersion::Exact(expected) => sqlx::query(
                r#"
                UPDATE stock_records
                SET state = $2, quantity_on_hand = $3, quantity_allocated = $4,
                    version = $5, last_updated = $6
                WHERE sku = $1 AND version = $7
                "#,
            )
            .bind(sku.as_str())
            .bind(&state)
            .bind(record.quantity_on_hand())
            .bind(record.quantity_allocated())
            .bind(to_i64(record.version())?)
            .bind(record.last_updated())
            .bind(to_i64(expected)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_record", e))?,
            ExpectedVersion::Any => sqlx::query(
                r#"
                INSERT INTO stock_records (sku, state, quantity_on_hand, quantity_allocated, version, last_updated)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (sku) DO UPDATE
                SET state = EXCLUDED.state,
                    quantity_on_hand = EXCLUDED.quantity_on_hand,
                    quantity_allocated = EXCLUDED.quantity_allocated,
                    version = EXCLUDED.version,
                    last_updated = EXCLUDED.last_updated
                "#,
            )
            .bind(sku.as_str())
            .bind(&state)
            .bind(record.quantity_on_hand())
            .bind(record.quantity_allocated())
            .bind(to_i64(record.version())?)
            .bind(record.last_updated())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_record", e))?,
        };

        if written.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "{sku}: expected {:?}, record moved",
                commit.expected_version
            )));
        }

        let head: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sequence_number), 0) AS head FROM stock_events WHERE sku = $1",
        )
        .bind(sku.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("stream_head", e))
        .and_then(|row| column(&row, "head"))?;

        let created_at = commit.ledger_entry.timestamp;
        let mut next = head as u64 + 1;
        let mut stored = Vec::with_capacity(commit.events.len());
        for event in commit.events {
            let event = event.into_stored(next);
            next += 1;

            sqlx::query(
                r#"
                INSERT INTO stock_events (
                    event_id, sku, sequence_number, event_type, event_version, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.sku.as_str())
            .bind(to_i64(event.sequence_number)?)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_event", e))?;

            let outbox = OutboxEvent::pending(&event, created_at);
            sqlx::query(
                r#"
                INSERT INTO outbox_events (
                    id, aggregate_id, event_type, sequence_number, occurred_at, payload, created_at, published
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
                "#,
            )
            .bind(outbox.id.as_uuid())
            .bind(outbox.aggregate_id.as_str())
            .bind(&outbox.event_type)
            .bind(to_i64(outbox.sequence_number)?)
            .bind(outbox.occurred_at)
            .bind(&outbox.payload)
            .bind(outbox.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_outbox", e))?;

            stored.push(event);
        }

        let entry = &commit.ledger_entry;
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, sku, timestamp, quantity_change, change_type, source_reference, reason, operator_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.sku.as_str())
        .bind(entry.timestamp)
        .bind(entry.quantity_change)
        .bind(entry.change_type.as_str())
        .bind(entry.source_reference.as_deref())
        .bind(entry.reason.as_deref())
        .bind(entry.operator_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(stored)
    }

    pub async fn fetch_skus(&self) -> Result<Vec<Sku>, StoreError> {
        let rows = sqlx::query("SELECT sku FROM stock_records ORDER BY sku")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_skus", e))?;

        rows.iter().map(|row| sku_column(row, "sku")).collect()
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    pub async fn fetch_stream(&self, sku: &Sku) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, sku, sequence_number, event_type, event_version, occurred_at, payload
            FROM stock_events
            WHERE sku = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(sku.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_stream", e))?;

        rows.iter().map(event_from_row).collect()
    }

    #[instrument(skip(self), fields(sku = %sku), err)]
    pub async fn fetch_window(
        &self,
        sku: &Sku,
        after_sequence: u64,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, sku, sequence_number, event_type, event_version, occurred_at, payload
            FROM stock_events
            WHERE sku = $1
              AND sequence_number > $2
              AND occurred_at <= $3
            ORDER BY occurred_at ASC, sequence_number ASC
            "#,
        )
        .bind(sku.as_str())
        .bind(to_i64(after_sequence)?)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_window", e))?;

        rows.iter().map(event_from_row).collect()
    }

    pub async fn fetch_ledger(
        &self,
        sku: &Sku,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sku, timestamp, quantity_change, change_type, source_reference, reason, operator_id
            FROM ledger_entries
            WHERE sku = $1
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp < $3)
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(sku.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_ledger", e))?;

        rows.iter().map(ledger_from_row).collect()
    }

    pub async fn purge_ledger(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM ledger_entries WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_ledger", e))?;
        Ok(done.rows_affected())
    }

    pub async fn fetch_outbox(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, sequence_number, occurred_at, payload,
                   created_at, published, published_at
            FROM outbox_events
            WHERE published = FALSE
            ORDER BY created_at ASC, position ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_outbox", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    pub async fn mark_outbox_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE outbox_events
            SET published = TRUE, published_at = COALESCE(published_at, $2)
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_outbox_published", e))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::Storage(format!("outbox event {id} not found")));
        }
        Ok(())
    }

    pub async fn purge_outbox(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM outbox_events WHERE published = TRUE AND published_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_outbox", e))?;
        Ok(done.rows_affected())
    }

    pub async fn count_unpublished(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS pending FROM outbox_events WHERE published = FALSE")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_unpublished", e))?;
        let pending: i64 = column(&row, "pending")?;
        Ok(pending as u64)
    }

    #[instrument(skip(self, snapshot), fields(sku = %snapshot.sku, snapshot_type = %snapshot.snapshot_type), err)]
    pub async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let body = serde_json::to_value(snapshot)
            .map_err(|e| StoreError::Serialization(format!("snapshot: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (
                id, sku, snapshot_timestamp, snapshot_type, reason,
                quantity_on_hand, quantity_allocated, body, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.sku.as_str())
        .bind(snapshot.snapshot_timestamp)
        .bind(snapshot.snapshot_type.as_str())
        .bind(snapshot.reason.as_str())
        .bind(snapshot.quantity_on_hand)
        .bind(snapshot.quantity_allocated)
        .bind(&body)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_snapshot", e))?;

        Ok(())
    }

    pub async fn fetch_latest_snapshot(
        &self,
        sku: &Sku,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT body FROM snapshots
            WHERE sku = $1 AND snapshot_timestamp < $2
            ORDER BY snapshot_timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(sku.as_str())
        .bind(before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_latest_snapshot", e))?;

        row.map(|row| snapshot_from_row(&row)).transpose()
    }

    pub async fn fetch_snapshots(
        &self,
        sku: &Sku,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM snapshots
            WHERE sku = $1 AND snapshot_timestamp >= $2 AND snapshot_timestamp <= $3
            ORDER BY snapshot_timestamp ASC
            "#,
        )
        .bind(sku.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_snapshots", e))?;

        rows.iter().map(snapshot_from_row).collect()
    }

    pub async fn snapshot_exists(
        &self,
        sku: &Sku,
        snapshot_type: SnapshotType,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM snapshots
                WHERE sku = $1 AND snapshot_type = $2
                  AND snapshot_timestamp >= $3 AND snapshot_timestamp < $4
            ) AS found
            "#,
        )
        .bind(sku.as_str())
        .bind(snapshot_type.as_str())
        .bind(start)
        .bind(start + Duration::days(1))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot_exists", e))?;

        column(&row, "found")
    }

    pub async fn purge_snapshots(
        &self,
        snapshot_type: SnapshotType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM snapshots WHERE snapshot_type = $1 AND snapshot_timestamp < $2")
            .bind(snapshot_type.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_snapshots", e))?;
        Ok(done.rows_affected())
    }

    pub async fn fetch_job(&self, name: &str) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT name, last_run_at, last_status, last_error, runs, failures
            FROM scheduled_jobs
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_job", e))?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    pub async fn upsert_job(&self, record: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (name, last_run_at, last_status, last_error, runs, failures)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE
            SET last_run_at = EXCLUDED.last_run_at,
                last_status = EXCLUDED.last_status,
                last_error = EXCLUDED.last_error,
                runs = EXCLUDED.runs,
                failures = EXCLUDED.failures
            "#,
        )
        .bind(&record.name)
        .bind(record.last_run_at)
        .bind(record.last_status.as_str())
        .bind(record.last_error.as_deref())
        .bind(to_i64(record.runs)?)
        .bind(to_i64(record.failures)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_job", e))?;

        Ok(())
    }

    pub async fn fetch_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, last_run_at, last_status, last_error, runs, failures
            FROM scheduled_jobs
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }
}

impl StockStore for PostgresStockStore {
    fn load(&self, sku: &Sku) -> Result<Option<StockRecord>, StoreError> {
        self.handle.block_on(self.fetch_record(sku))
    }

    fn commit(&self, commit: StockCommit) -> Result<Vec<StoredEvent>, StoreError> {
        self.handle.block_on(self.commit_unit(commit))
    }

    fn list_skus(&self) -> Result<Vec<Sku>, StoreError> {
        self.handle.block_on(self.fetch_skus())
    }
}

impl EventStore for PostgresStockStore {
    fn load_stream(&self, sku: &Sku) -> Result<Vec<StoredEvent>, StoreError> {
        self.handle.block_on(self.fetch_stream(sku))
    }

    fn load_window(
        &self,
        sku: &Sku,
        after_sequence: u64,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.handle.block_on(self.fetch_window(sku, after_sequence, until))
    }
}

impl LedgerStore for PostgresStockStore {
    fn entries(
        &self,
        sku: &Sku,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.handle.block_on(self.fetch_ledger(sku, from, to))
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.handle.block_on(self.purge_ledger(cutoff))
    }
}

impl OutboxStore for PostgresStockStore {
    fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        self.handle.block_on(self.fetch_outbox(limit))
    }

    fn mark_published(&self, id: EventId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.handle.block_on(self.mark_outbox_published(id, at))
    }

    fn purge_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.handle.block_on(self.purge_outbox(cutoff))
    }

    fn unpublished_count(&self) -> Result<u64, StoreError> {
        self.handle.block_on(self.count_unpublished())
    }
}

impl SnapshotStore for PostgresStockStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.handle.block_on(self.insert_snapshot(snapshot))
    }

    fn latest_before(&self, sku: &Sku, before: DateTime<Utc>) -> Result<Option<Snapshot>, StoreError> {
        self.handle.block_on(self.fetch_latest_snapshot(sku, before))
    }

    fn list(
        &self,
        sku: &Sku,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        self.handle.block_on(self.fetch_snapshots(sku, from, to))
    }

    fn exists_on(&self, sku: &Sku, snapshot_type: SnapshotType, day: NaiveDate) -> Result<bool, StoreError> {
        self.handle.block_on(self.snapshot_exists(sku, snapshot_type, day))
    }

    fn purge(&self, snapshot_type: SnapshotType, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.handle.block_on(self.purge_snapshots(snapshot_type, cutoff))
    }
}

impl JobRecordStore for PostgresStockStore {
    fn load(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError> {
        self.handle
            .block_on(self.fetch_job(name))
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        self.handle
            .block_on(self.upsert_job(record))
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        self.handle
            .block_on(self.fetch_jobs())
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} does not fit in BIGINT")))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("failed to read {name}: {e}")))
}

fn sku_column(row: &PgRow, name: &str) -> Result<Sku, StoreError> {
    let raw: String = column(row, name)?;
    Sku::parse(&raw).map_err(|e| StoreError::Serialization(format!("stored sku {raw:?}: {e}")))
}

fn record_from_row(row: &PgRow) -> Result<StockRecord, StoreError> {
    let state: serde_json::Value = column(row, "state")?;
    let state: StockState = serde_json::from_value(state)
        .map_err(|e| StoreError::Serialization(format!("stock state: {e}")))?;
    let version: i64 = column(row, "version")?;

    Ok(StockRecord::restore(
        sku_column(row, "sku")?,
        state,
        version as u64,
        column(row, "last_updated")?,
    ))
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent, StoreError> {
    let sequence_number: i64 = column(row, "sequence_number")?;
    let event_version: i32 = column(row, "event_version")?;

    Ok(StoredEvent {
        event_id: EventId::from_uuid(column(row, "event_id")?),
        sku: sku_column(row, "sku")?,
        sequence_number: sequence_number as u64,
        event_type: column(row, "event_type")?,
        event_version: event_version as u32,
        occurred_at: column(row, "occurred_at")?,
        payload: column(row, "payload")?,
    })
}

fn ledger_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let change_type: String = column(row, "change_type")?;
    let operator: String = column(row, "operator_id")?;

    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(column(row, "id")?),
        sku: sku_column(row, "sku")?,
        timestamp: column(row, "timestamp")?,
        quantity_change: column(row, "quantity_change")?,
        change_type: change_type
            .parse()
            .map_err(|e| StoreError::Serialization(format!("change type: {e}")))?,
        source_reference: column(row, "source_reference")?,
        reason: column(row, "reason")?,
        operator_id: OperatorId::new(operator),
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEvent, StoreError> {
    let sequence_number: i64 = column(row, "sequence_number")?;

    Ok(OutboxEvent {
        id: EventId::from_uuid(column(row, "id")?),
        aggregate_id: sku_column(row, "aggregate_id")?,
        event_type: column(row, "event_type")?,
        sequence_number: sequence_number as u64,
        occurred_at: column(row, "occurred_at")?,
        payload: column(row, "payload")?,
        created_at: column(row, "created_at")?,
        published: column(row, "published")?,
        published_at: column(row, "published_at")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, StoreError> {
    let body: serde_json::Value = column(row, "body")?;
    serde_json::from_value(body).map_err(|e| StoreError::Serialization(format!("snapshot: {e}")))
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let status: String = column(row, "last_status")?;
    let runs: i64 = column(row, "runs")?;
    let failures: i64 = column(row, "failures")?;

    Ok(JobRecord {
        name: column(row, "name")?,
        last_run_at: column(row, "last_run_at")?,
        last_status: status.parse().map_err(StoreError::Serialization)?,
        last_error: column(row, "last_error")?,
        runs: runs as u64,
        failures: failures as u64,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Concurrency(msg),
                Some("23514") => StoreError::InvalidCommit(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
