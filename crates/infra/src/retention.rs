//! Housekeeping jobs: ledger and outbox retention, hold expiry.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use stockledger_core::DomainError;

use crate::jobs::{JobError, Schedule, ScheduledJob};
use crate::mutation::{MutationContext, MutationError, MutationService};
use crate::store::{LedgerStore, OutboxStore, StockStore};

pub const DEFAULT_LEDGER_RETENTION_DAYS: i64 = 730;
pub const DEFAULT_OUTBOX_RETENTION_DAYS: i64 = 7;

/// Deletes ledger entries older than the retention window.
pub struct LedgerRetentionJob<L> {
    ledger: L,
    retention: Duration,
    hour: u32,
}

impl<L> LedgerRetentionJob<L> {
    pub fn new(ledger: L, retention: Duration, hour: u32) -> Self {
        Self { ledger, retention, hour }
    }
}

impl<L: LedgerStore> ScheduledJob for LedgerRetentionJob<L> {
    fn name(&self) -> &str {
        "ledger-retention"
    }

    fn schedule(&self) -> Schedule {
        Schedule::DailyAt { hour: self.hour }
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let cutoff = now - self.retention;
        let purged = self.ledger.purge_before(cutoff)?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "ledger entries purged");
        }
        Ok(format!("purged {purged} ledger entries"))
    }
}

/// Deletes outbox events published longer ago than the retention window.
/// Unpublished events are never touched.
pub struct OutboxRetentionJob<O> {
    outbox: O,
    retention: Duration,
    hour: u32,
}

impl<O> OutboxRetentionJob<O> {
    pub fn new(outbox: O, retention: Duration, hour: u32) -> Self {
        Self { outbox, retention, hour }
    }
}

impl<O: OutboxStore> ScheduledJob for OutboxRetentionJob<O> {
    fn name(&self) -> &str {
        "outbox-retention"
    }

    fn schedule(&self) -> Schedule {
        Schedule::DailyAt { hour: self.hour }
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let cutoff = now - self.retention;
        let purged = self.outbox.purge_published_before(cutoff)?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "published outbox events purged");
        }
        Ok(format!("purged {purged} outbox events"))
    }
}

/// Releases holds whose `expires_at` has passed, through the mutation service so
/// each release is ledgered and published like any other.
pub struct HoldExpiryJob<S> {
    service: Arc<MutationService<S>>,
    interval: StdDuration,
}

impl<S> HoldExpiryJob<S> {
    pub fn new(service: Arc<MutationService<S>>, interval: StdDuration) -> Self {
        Self { service, interval }
    }
}

impl<S: StockStore> HoldExpiryJob<S> {
    /// Release every hold expired at `now`. Returns `(released, failed)`.
    pub fn release_expired(&self, now: DateTime<Utc>) -> Result<(usize, usize), JobError> {
        let mut released = 0;
        let mut failed = 0;

        for sku in self.service.store().list_skus()? {
            let Some(record) = self.service.get(&sku)? else {
                continue;
            };
            for hold_id in record.expired_holds(now) {
                let ctx = MutationContext::system().with_reason("hold expired").at(now);
                match self.service.release_hold(&sku, hold_id, &ctx) {
                    Ok(_) => released += 1,
                    // Released by someone else since we loaded the record.
                    Err(MutationError::Domain(DomainError::HoldNotFound(_))) => {}
                    Err(e) => {
                        warn!(sku = %sku, hold_id = %hold_id, error = %e, "failed to release expired hold");
                        failed += 1;
                    }
                }
            }
        }

        Ok((released, failed))
    }
}

impl<S: StockStore> ScheduledJob for HoldExpiryJob<S> {
    fn name(&self) -> &str {
        "hold-expiry"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Every(self.interval)
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let (released, failed) = self.release_expired(now)?;
        let summary = format!("released {released} expired holds, {failed} failed");
        if failed > 0 {
            return Err(JobError::Other(summary));
        }
        Ok(summary)
    }
}
