//! Scheduled and on-demand snapshot materialisation, plus retention.
//!
//! Every snapshot is produced by replaying the event stream up to its timestamp,
//! never by copying the live record. Scheduled snapshots are stamped at the last
//! microsecond of the day they close, so activity after midnight stays out of
//! them however late the job runs.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use stockledger_core::{OperatorId, Sku, SnapshotId};
use stockledger_inventory::{LotBatch, Snapshot, SnapshotReason, SnapshotType};

use crate::event_store::EventStore;
use crate::jobs::{JobError, Schedule, ScheduledJob};
use crate::replay::{reconstruct, ReplayError};
use crate::store::{storage_precision, SnapshotStore, StockStore, StoreError};

/// Lot / batch and serial-number detail for one snapshot.
pub type Traceability = (Vec<LotBatch>, Vec<String>);

/// Supplies lot/batch and serial-number detail for a snapshot. The stock record
/// itself does not track either.
pub trait TraceabilitySource: Send + Sync {
    fn traceability(&self, sku: &Sku, at: DateTime<Utc>) -> Result<Traceability, StoreError>;
}

/// No lot or serial tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTraceability;

impl TraceabilitySource for NoTraceability {
    fn traceability(&self, _sku: &Sku, _at: DateTime<Utc>) -> Result<Traceability, StoreError> {
        Ok((Vec::new(), Vec::new()))
    }
}

/// How long each snapshot type is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRetention {
    pub daily: Duration,
    pub month_end: Duration,
    pub quarter_end: Duration,
    pub year_end: Duration,
    pub ad_hoc: Duration,
}

impl Default for SnapshotRetention {
    fn default() -> Self {
        Self {
            daily: Duration::days(90),
            month_end: Duration::days(1095),
            quarter_end: Duration::days(2555),
            year_end: Duration::days(3650),
            ad_hoc: Duration::days(365),
        }
    }
}

impl SnapshotRetention {
    pub fn for_type(&self, snapshot_type: SnapshotType) -> Duration {
        match snapshot_type {
            SnapshotType::Daily => self.daily,
            SnapshotType::MonthEnd => self.month_end,
            SnapshotType::QuarterEnd => self.quarter_end,
            SnapshotType::YearEnd => self.year_end,
            SnapshotType::AdHoc => self.ad_hoc,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no stock record for {0}")]
    NotFound(Sku),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotRunReport {
    pub created: usize,
    /// Already had a snapshot of this type for the day, or no history by its close.
    pub skipped: usize,
    pub failed: usize,
}

/// Last representable instant of `day` at storage precision.
pub(crate) fn close_of_day(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_micro_opt(23, 59, 59, 999_999).map(|t| t.and_utc())
}

pub struct SnapshotService<S> {
    store: S,
    traceability: Arc<dyn TraceabilitySource>,
    retention: SnapshotRetention,
    created_by: OperatorId,
}

impl<S> SnapshotService<S>
where
    S: StockStore + SnapshotStore + EventStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            traceability: Arc::new(NoTraceability),
            retention: SnapshotRetention::default(),
            created_by: OperatorId::system(),
        }
    }

    pub fn with_traceability<T: TraceabilitySource + 'static>(mut self, source: T) -> Self {
        self.traceability = Arc::new(source);
        self
    }

    pub fn with_retention(mut self, retention: SnapshotRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> &SnapshotRetention {
        &self.retention
    }

    /// Capture and persist the state of `sku` as of `at`. Each capture is a
    /// distinct snapshot with its own id.
    #[instrument(skip(self, created_by), fields(sku = %sku, reason = reason.as_str()), err)]
    pub fn capture_ad_hoc(
        &self,
        sku: &Sku,
        reason: SnapshotReason,
        created_by: OperatorId,
        at: DateTime<Utc>,
    ) -> Result<Snapshot, SnapshotError> {
        if self.store.load(sku)?.is_none() {
            return Err(SnapshotError::NotFound(sku.clone()));
        }
        let at = storage_precision(at);
        let snapshot = Snapshot {
            id: SnapshotId::new(),
            ..self.materialise(sku, SnapshotType::AdHoc, reason, created_by, at)?
        };
        self.store.save(&snapshot)?;
        Ok(snapshot)
    }

    /// One DAILY snapshot per SKU for the day that closed before `now`. Safe to
    /// re-run.
    pub fn run_daily(&self, now: DateTime<Utc>) -> Result<SnapshotRunReport, StoreError> {
        let Some(closed) = now.date_naive().pred_opt() else {
            return Ok(SnapshotRunReport::default());
        };
        self.run_for_types(&[SnapshotType::Daily], SnapshotReason::Scheduled, closed)
    }

    /// Period-end snapshots for the period that closed yesterday: MONTH_END after
    /// the last day of a month, plus QUARTER_END and YEAR_END when those close too.
    pub fn run_period_end(&self, now: DateTime<Utc>) -> Result<SnapshotRunReport, StoreError> {
        let Some(closed) = now.date_naive().pred_opt() else {
            return Ok(SnapshotRunReport::default());
        };
        let due = SnapshotType::period_ends_on(closed);
        if due.is_empty() {
            return Ok(SnapshotRunReport::default());
        }
        self.run_for_types(&due, SnapshotReason::PeriodClose, closed)
    }

    /// Delete snapshots past their type's retention. Returns the number removed.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0;
        for snapshot_type in SnapshotType::ALL {
            let cutoff = now - self.retention.for_type(snapshot_type);
            let purged = self.store.purge(snapshot_type, cutoff)?;
            if purged > 0 {
                info!(
                    snapshot_type = %snapshot_type,
                    purged,
                    cutoff = %cutoff,
                    "snapshots pruned"
                );
            }
            removed += purged;
        }
        Ok(removed)
    }

    fn run_for_types(
        &self,
        types: &[SnapshotType],
        reason: SnapshotReason,
        day: NaiveDate,
    ) -> Result<SnapshotRunReport, StoreError> {
        let mut report = SnapshotRunReport::default();
        let Some(boundary) = close_of_day(day) else {
            return Ok(report);
        };

        for sku in self.store.list_skus()? {
            for &snapshot_type in types {
                match self.snapshot_one(&sku, snapshot_type, reason, day, boundary) {
                    Ok(true) => report.created += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        error!(
                            sku = %sku,
                            snapshot_type = %snapshot_type,
                            day = %day,
                            error = %e,
                            "snapshot failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            types = ?types,
            day = %day,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "snapshot run finished"
        );
        Ok(report)
    }

    fn snapshot_one(
        &self,
        sku: &Sku,
        snapshot_type: SnapshotType,
        reason: SnapshotReason,
        day: NaiveDate,
        boundary: DateTime<Utc>,
    ) -> Result<bool, SnapshotError> {
        if self.store.exists_on(sku, snapshot_type, day)? {
            return Ok(false);
        }
        let snapshot =
            self.materialise(sku, snapshot_type, reason, self.created_by.clone(), boundary)?;
        if snapshot.last_sequence_number == 0 {
            debug!(sku = %sku, day = %day, "no history by close of day");
            return Ok(false);
        }
        self.store.save(&snapshot)?;
        Ok(true)
    }

    fn materialise(
        &self,
        sku: &Sku,
        snapshot_type: SnapshotType,
        reason: SnapshotReason,
        created_by: OperatorId,
        at: DateTime<Utc>,
    ) -> Result<Snapshot, SnapshotError> {
        let snapshot =
            reconstruct(&self.store, &self.store, sku, at, snapshot_type, reason, created_by)?;
        let (lots, serials) = self.traceability.traceability(sku, at)?;
        Ok(snapshot.with_traceability(lots, serials))
    }
}

pub struct DailySnapshotJob<S> {
    service: Arc<SnapshotService<S>>,
    hour: u32,
}

impl<S> DailySnapshotJob<S> {
    pub fn new(service: Arc<SnapshotService<S>>, hour: u32) -> Self {
        Self { service, hour }
    }
}

impl<S> ScheduledJob for DailySnapshotJob<S>
where
    S: StockStore + SnapshotStore + EventStore,
{
    fn name(&self) -> &str {
        "daily-snapshots"
    }

    fn schedule(&self) -> Schedule {
        Schedule::DailyAt { hour: self.hour }
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let report = self.service.run_daily(now)?;
        summarise(report)
    }
}

pub struct PeriodEndSnapshotJob<S> {
    service: Arc<SnapshotService<S>>,
    hour: u32,
}

impl<S> PeriodEndSnapshotJob<S> {
    pub fn new(service: Arc<SnapshotService<S>>, hour: u32) -> Self {
        Self { service, hour }
    }
}

impl<S> ScheduledJob for PeriodEndSnapshotJob<S>
where
    S: StockStore + SnapshotStore + EventStore,
{
    fn name(&self) -> &str {
        "period-end-snapshots"
    }

    fn schedule(&self) -> Schedule {
        Schedule::DailyAt { hour: self.hour }
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let report = self.service.run_period_end(now)?;
        summarise(report)
    }
}

pub struct SnapshotRetentionJob<S> {
    service: Arc<SnapshotService<S>>,
    hour: u32,
}

impl<S> SnapshotRetentionJob<S> {
    pub fn new(service: Arc<SnapshotService<S>>, hour: u32) -> Self {
        Self { service, hour }
    }
}

impl<S> ScheduledJob for SnapshotRetentionJob<S>
where
    S: StockStore + SnapshotStore + EventStore,
{
    fn name(&self) -> &str {
        "snapshot-retention"
    }

    fn schedule(&self) -> Schedule {
        Schedule::DailyAt { hour: self.hour }
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let removed = self.service.prune(now)?;
        Ok(format!("removed {removed} snapshots"))
    }
}

/// A run with per-SKU failures counts as failed so the job record shows it.
fn summarise(report: SnapshotRunReport) -> Result<String, JobError> {
    let summary = format!(
        "created {}, skipped {}, failed {}",
        report.created, report.skipped, report.failed
    );
    if report.failed > 0 {
        return Err(JobError::Other(summary));
    }
    Ok(summary)
}
