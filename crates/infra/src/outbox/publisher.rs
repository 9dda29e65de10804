use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use stockledger_core::Sku;

use crate::jobs::{JobError, Schedule, ScheduledJob};
use crate::store::{OutboxStore, StoreError};

use super::transport::EventTransport;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
    /// Skipped because an earlier event of the same SKU failed this cycle.
    pub deferred: usize,
}

/// Drains the outbox into a transport, oldest first.
///
/// A delivery failure leaves the event unpublished and holds back the rest of
/// that SKU's events until the next cycle, so each SKU's events reach the
/// transport in order. Other SKUs are unaffected.
#[derive(Debug)]
pub struct OutboxPublisher<O, T> {
    outbox: O,
    transport: T,
    batch_size: usize,
}

impl<O, T> OutboxPublisher<O, T>
where
    O: OutboxStore,
    T: EventTransport,
{
    pub fn new(outbox: O, transport: T) -> Self {
        Self {
            outbox,
            transport,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One publish cycle. Store errors abort the cycle; transport errors do not.
    pub fn publish_pending(&self, now: DateTime<Utc>) -> Result<PublishReport, StoreError> {
        let batch = self.outbox.fetch_unpublished(self.batch_size)?;
        let mut report = PublishReport::default();
        let mut blocked: HashSet<Sku> = HashSet::new();

        for event in batch {
            if blocked.contains(&event.aggregate_id) {
                report.deferred += 1;
                continue;
            }

            match self.transport.deliver(&event.to_envelope()) {
                Ok(()) => {
                    self.outbox.mark_published(event.id, now)?;
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        sku = %event.aggregate_id,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "outbox delivery failed; holding back later events for this sku"
                    );
                    blocked.insert(event.aggregate_id.clone());
                    report.failed += 1;
                }
            }
        }

        if report.delivered + report.failed > 0 {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                deferred = report.deferred,
                "outbox cycle finished"
            );
        }
        Ok(report)
    }
}

/// Scheduler job wrapping one publish cycle per tick.
pub struct OutboxPublishJob<O, T> {
    publisher: OutboxPublisher<O, T>,
    interval: Duration,
}

impl<O, T> OutboxPublishJob<O, T> {
    pub fn new(publisher: OutboxPublisher<O, T>, interval: Duration) -> Self {
        Self { publisher, interval }
    }
}

impl<O, T> ScheduledJob for OutboxPublishJob<O, T>
where
    O: OutboxStore,
    T: EventTransport,
{
    fn name(&self) -> &str {
        "outbox-publisher"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Every(self.interval)
    }

    fn run(&self, now: DateTime<Utc>) -> Result<String, JobError> {
        let report = self.publisher.publish_pending(now)?;
        if report.failed > 0 {
            info!(failed = report.failed, deferred = report.deferred, "outbox events left for retry");
        }
        Ok(format!(
            "delivered {}, failed {}, deferred {}",
            report.delivered, report.failed, report.deferred
        ))
    }
}
