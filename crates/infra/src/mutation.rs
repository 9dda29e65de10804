//! Stock mutation pipeline.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the stock record (or start from an empty, version-0 record)
//!   ↓
//! 2. Execute the command on the aggregate (validation + invariants, no IO)
//!   ↓
//! 3. Build the ledger entry and the stream/outbox events
//!   ↓
//! 4. Commit everything in one atomic unit, CAS on version
//!   ↓
//! 5. On a version conflict: reload and go back to 2, at most `max_retries` times
//! ```
//!
//! Publication is not part of this pipeline. Once `execute` returns `Ok` the events
//! are durable in the outbox and the publisher delivers them on its own schedule.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use stockledger_core::{
    Aggregate, AggregateRoot, DomainError, ExpectedVersion, HoldId, OperatorId, Sku,
};
use stockledger_inventory::{
    AbcClass, CostingMethod, LedgerEntry, PlaceHold, StockChange, StockCommand, StockRecord,
    StockStatus,
};

use crate::event_store::{StoredEvent, UncommittedEvent};
use crate::store::{storage_precision, StockCommit, StockStore, StoreError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum MutationError {
    /// Rejected by the aggregate. Deterministic; retrying the same command on the
    /// same state gives the same answer.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The record kept moving under us.
    #[error("concurrent modification of {sku}: gave up after {attempts} attempts")]
    Concurrency { sku: Sku, attempts: u32 },

    #[error(transparent)]
    Store(StoreError),
}

impl MutationError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            MutationError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Who, why and when for one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    pub source_reference: Option<String>,
    pub reason: Option<String>,
    pub operator_id: OperatorId,
    pub occurred_at: DateTime<Utc>,
}

impl MutationContext {
    /// Stamped now. Timestamps are kept at storage precision (microseconds).
    pub fn new(operator_id: OperatorId) -> Self {
        Self {
            source_reference: None,
            reason: None,
            operator_id,
            occurred_at: storage_precision(Utc::now()),
        }
    }

    pub fn system() -> Self {
        Self::new(OperatorId::system())
    }

    pub fn with_source_reference(mut self, reference: impl Into<String>) -> Self {
        self.source_reference = Some(reference.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = storage_precision(occurred_at);
        self
    }
}

/// Everything one accepted mutation produced.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub record: StockRecord,
    pub change: StockChange,
    pub ledger_entry: LedgerEntry,
    pub events: Vec<StoredEvent>,
    /// 1 when the first attempt committed.
    pub attempts: u32,
}

#[derive(Debug)]
pub struct MutationService<S> {
    store: S,
    max_retries: u32,
}

impl<S> MutationService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Extra attempts after the first one hits a version conflict.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: StockStore> MutationService<S> {
    /// Apply `command` to `sku` and persist the result atomically.
    #[instrument(
        skip(self, command, ctx),
        fields(sku = %sku, change_type = %command.change_type())
    )]
    pub fn execute(
        &self,
        sku: &Sku,
        command: &StockCommand,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        let mut attempt = 1;
        loop {
            let mut record = self
                .store
                .load(sku)
                .map_err(MutationError::Store)?
                .unwrap_or_else(|| StockRecord::new(sku.clone()));
            let expected = ExpectedVersion::Exact(record.version());

            let change = record.execute(command, ctx.occurred_at).map_err(|e| {
                if e.is_defect() {
                    error!(
                        sku = %sku,
                        error = %e,
                        "stock invariant violated; record left untouched"
                    );
                } else {
                    debug!(sku = %sku, error = %e, "command rejected");
                }
                MutationError::Domain(e)
            })?;

            let ledger_entry = LedgerEntry::record(
                sku.clone(),
                &change,
                ctx.source_reference.clone(),
                ctx.reason.clone(),
                ctx.operator_id.clone(),
            );
            let events = change
                .events
                .iter()
                .map(UncommittedEvent::from_typed)
                .collect::<Result<Vec<_>, _>>()
                .map_err(MutationError::Store)?;

            let commit = StockCommit {
                record: record.clone(),
                expected_version: expected,
                ledger_entry: ledger_entry.clone(),
                events,
            };

            match self.store.commit(commit) {
                Ok(stored) => {
                    debug!(
                        sku = %sku,
                        version = record.version(),
                        atp = change.current.atp,
                        attempt,
                        "stock mutation committed"
                    );
                    return Ok(MutationOutcome {
                        record,
                        change,
                        ledger_entry,
                        events: stored,
                        attempts: attempt,
                    });
                }
                Err(StoreError::Concurrency(msg)) if attempt <= self.max_retries => {
                    warn!(sku = %sku, attempt, error = %msg, "version conflict; reloading");
                    attempt += 1;
                }
                Err(StoreError::Concurrency(msg)) => {
                    warn!(
                        sku = %sku,
                        attempts = attempt,
                        error = %msg,
                        "version conflict; giving up"
                    );
                    return Err(MutationError::Concurrency {
                        sku: sku.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    error!(sku = %sku, error = %e, "stock commit failed");
                    return Err(MutationError::Store(e));
                }
            }
        }
    }

    pub fn get(&self, sku: &Sku) -> Result<Option<StockRecord>, MutationError> {
        self.store.load(sku).map_err(MutationError::Store)
    }

    /// ATP for `sku`; 0 for a SKU with no record.
    pub fn atp(&self, sku: &Sku) -> Result<i64, MutationError> {
        Ok(self.get(sku)?.map(|r| r.atp()).unwrap_or(0))
    }

    pub fn create(
        &self,
        sku: &Sku,
        initial_quantity: i64,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::Create { initial_quantity }, ctx)
    }

    pub fn receive(
        &self,
        sku: &Sku,
        quantity: i64,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::Receive { quantity }, ctx)
    }

    pub fn allocate(
        &self,
        sku: &Sku,
        quantity: i64,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::Allocate { quantity }, ctx)
    }

    pub fn deallocate(
        &self,
        sku: &Sku,
        quantity: i64,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::Deallocate { quantity }, ctx)
    }

    pub fn adjust(
        &self,
        sku: &Sku,
        delta: i64,
        reason_code: impl Into<String>,
        status: Option<StockStatus>,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        let command = StockCommand::Adjust {
            delta,
            reason_code: reason_code.into(),
            status,
        };
        self.execute(sku, &command, ctx)
    }

    pub fn process_pick(
        &self,
        sku: &Sku,
        quantity: i64,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::ProcessPick { quantity }, ctx)
    }

    pub fn change_status(
        &self,
        sku: &Sku,
        from: StockStatus,
        to: StockStatus,
        quantity: i64,
        reason: impl Into<String>,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        let command = StockCommand::ChangeStatus {
            from,
            to,
            quantity,
            reason: reason.into(),
        };
        self.execute(sku, &command, ctx)
    }

    pub fn place_hold(
        &self,
        sku: &Sku,
        hold: PlaceHold,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::PlaceHold(hold), ctx)
    }

    pub fn release_hold(
        &self,
        sku: &Sku,
        hold_id: HoldId,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::ReleaseHold { hold_id }, ctx)
    }

    pub fn revalue(
        &self,
        sku: &Sku,
        unit_cost_minor: i64,
        costing_method: CostingMethod,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        let command = StockCommand::Revalue {
            unit_cost_minor,
            costing_method,
        };
        self.execute(sku, &command, ctx)
    }

    pub fn classify(
        &self,
        sku: &Sku,
        abc_class: AbcClass,
        ctx: &MutationContext,
    ) -> Result<MutationOutcome, MutationError> {
        self.execute(sku, &StockCommand::Classify { abc_class }, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStore;
    use crate::store::{InMemoryStockStore, LedgerStore, OutboxStore};
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stockledger_inventory::{ChangeType, HoldType};

    fn sku() -> Sku {
        Sku::parse("SKU-100").unwrap()
    }

    fn ctx() -> MutationContext {
        MutationContext::new(OperatorId::new("clerk-7"))
            .at(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap())
    }

    #[test]
    fn accepted_mutation_writes_record_ledger_and_outbox() {
        let store = Arc::new(InMemoryStockStore::new());
        let service = MutationService::new(store.clone());

        service.create(&sku(), 100, &ctx()).unwrap();
        let outcome = service
            .allocate(&sku(), 30, &ctx().with_source_reference("SO-1"))
            .unwrap();

        assert_eq!(outcome.record.version(), 2);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.ledger_entry.change_type, ChangeType::Allocation);
        assert_eq!(outcome.ledger_entry.quantity_change, 0);
        assert_eq!(outcome.ledger_entry.source_reference.as_deref(), Some("SO-1"));
        assert_eq!(service.atp(&sku()).unwrap(), 70);

        let entries = store.entries(&sku(), None, None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].quantity_change, 100);
        assert_eq!(store.unpublished_count().unwrap(), 2);

        let last = store.load_stream(&sku()).unwrap().pop().unwrap();
        assert_eq!(last.event_type, "inventory.stock.level_changed");
        assert_eq!(last.payload["previousState"]["atp"], 100);
        assert_eq!(last.payload["newState"]["atp"], 70);
    }

    #[test]
    fn rejected_command_writes_nothing() {
        let store = Arc::new(InMemoryStockStore::new());
        let service = MutationService::new(store.clone());
        service.create(&sku(), 10, &ctx()).unwrap();

        let err = service.allocate(&sku(), 11, &ctx()).unwrap_err();

        assert!(matches!(
            err,
            MutationError::Domain(DomainError::InsufficientStock { requested: 11, available: 10 })
        ));
        assert_eq!(store.load(&sku()).unwrap().unwrap().version(), 1);
        assert_eq!(store.entries(&sku(), None, None).unwrap().len(), 1);
        assert_eq!(store.unpublished_count().unwrap(), 1);
    }

    #[test]
    fn mutation_on_unknown_sku_is_not_found() {
        let service = MutationService::new(InMemoryStockStore::new());
        let err = service.allocate(&sku(), 1, &ctx()).unwrap_err();
        assert!(matches!(err, MutationError::Domain(DomainError::RecordNotFound(_))));
    }

    #[test]
    fn hold_commands_round_trip_through_the_store() {
        let service = MutationService::new(InMemoryStockStore::new());
        service.create(&sku(), 50, &ctx()).unwrap();

        let hold = PlaceHold::new(HoldType::QualityHold, 20, "QA sample", None);
        let hold_id = hold.hold_id;
        service.place_hold(&sku(), hold, &ctx()).unwrap();
        assert_eq!(service.atp(&sku()).unwrap(), 30);

        service.release_hold(&sku(), hold_id, &ctx()).unwrap();
        assert_eq!(service.atp(&sku()).unwrap(), 50);

        let err = service.release_hold(&sku(), hold_id, &ctx()).unwrap_err();
        assert!(matches!(
            err,
            MutationError::Domain(DomainError::HoldNotFound(id)) if id == hold_id
        ));
    }

    /// Store wrapper that reports a version conflict for the first `n` commits.
    struct Conflicting {
        inner: InMemoryStockStore,
        remaining: AtomicU32,
    }

    impl StockStore for Conflicting {
        fn load(&self, sku: &Sku) -> Result<Option<StockRecord>, StoreError> {
            self.inner.load(sku)
        }

        fn commit(&self, commit: StockCommit) -> Result<Vec<StoredEvent>, StoreError> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Concurrency("simulated".into()));
            }
            self.inner.commit(commit)
        }

        fn list_skus(&self) -> Result<Vec<Sku>, StoreError> {
            self.inner.list_skus()
        }
    }

    #[test]
    fn conflicts_are_retried_up_to_the_limit() {
        let store = Conflicting {
            inner: InMemoryStockStore::new(),
            remaining: AtomicU32::new(3),
        };
        let service = MutationService::new(store);
        let outcome = service.create(&sku(), 5, &ctx()).unwrap();
        assert_eq!(outcome.attempts, 4);

        let store = Conflicting {
            inner: InMemoryStockStore::new(),
            remaining: AtomicU32::new(4),
        };
        let service = MutationService::new(store);
        let err = service.create(&sku(), 5, &ctx()).unwrap_err();
        assert!(matches!(err, MutationError::Concurrency { attempts: 4, .. }));
        assert!(service.store().inner.load(&sku()).unwrap().is_none());
    }

    #[test]
    fn context_timestamps_are_microsecond_precise() {
        let ctx = MutationContext::system();
        assert_eq!(ctx.occurred_at.timestamp_subsec_nanos() % 1_000, 0);
    }
}
