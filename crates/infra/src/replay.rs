//! Point-in-time reconstruction against the stores.
//!
//! Picks the nearest snapshot strictly before the target, loads the stream events
//! the snapshot has not folded yet and hands both to the pure fold in
//! [`stockledger_inventory::replay`]. Nothing is written unless the caller asks for
//! it with [`ReplayEngine::replay_and_save`].

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, instrument};

use stockledger_core::{DomainError, OperatorId, Sku};
use stockledger_inventory::{
    replay_as, DecodeError, SequencedEvent, Snapshot, SnapshotReason, SnapshotType,
};

use crate::event_store::EventStore;
use crate::store::{SnapshotStore, StoreError};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored event no longer decodes. The stream is damaged or was written by
    /// a newer schema.
    #[error("undecodable event {sequence_number} in stream of {sku}: {source}")]
    Decode {
        sku: Sku,
        sequence_number: u64,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub struct ReplayEngine<N, E> {
    snapshots: N,
    events: E,
}

impl<N, E> ReplayEngine<N, E>
where
    N: SnapshotStore,
    E: EventStore,
{
    pub fn new(snapshots: N, events: E) -> Self {
        Self { snapshots, events }
    }

    /// Reconstruct `sku` as of `target`. Deterministic: the same stores and target
    /// give the same snapshot, id included.
    #[instrument(skip(self, created_by), fields(sku = %sku, target = %target), err)]
    pub fn state_at(
        &self,
        sku: &Sku,
        target: DateTime<Utc>,
        reason: SnapshotReason,
        created_by: OperatorId,
    ) -> Result<Snapshot, ReplayError> {
        reconstruct(
            &self.snapshots,
            &self.events,
            sku,
            target,
            SnapshotType::AdHoc,
            reason,
            created_by,
        )
    }

    /// [`state_at`](Self::state_at), then persist the result. Saving the same
    /// replay twice is a no-op because the id is deterministic.
    pub fn replay_and_save(
        &self,
        sku: &Sku,
        target: DateTime<Utc>,
        reason: SnapshotReason,
        created_by: OperatorId,
    ) -> Result<Snapshot, ReplayError> {
        let snapshot = self.state_at(sku, target, reason, created_by)?;
        self.snapshots.save(&snapshot)?;
        Ok(snapshot)
    }
}

/// Baseline lookup, window load and fold for one SKU.
pub(crate) fn reconstruct<N, E>(
    snapshots: &N,
    events: &E,
    sku: &Sku,
    target: DateTime<Utc>,
    snapshot_type: SnapshotType,
    reason: SnapshotReason,
    created_by: OperatorId,
) -> Result<Snapshot, ReplayError>
where
    N: SnapshotStore + ?Sized,
    E: EventStore + ?Sized,
{
    let baseline = snapshots.latest_before(sku, target)?;
    let folded = baseline.as_ref().map_or(0, |b| b.last_sequence_number);

    let window = events
        .load_window(sku, folded, target)?
        .iter()
        .map(|stored| {
            stored.decode().map_err(|source| ReplayError::Decode {
                sku: sku.clone(),
                sequence_number: stored.sequence_number,
                source,
            })
        })
        .collect::<Result<Vec<SequencedEvent>, _>>()?;

    debug!(
        baseline = ?baseline.as_ref().map(|b| b.id),
        after_sequence = folded,
        events = window.len(),
        "replaying stream window"
    );

    Ok(replay_as(
        sku,
        baseline.as_ref(),
        &window,
        target,
        snapshot_type,
        reason,
        created_by,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{MutationContext, MutationService};
    use crate::snapshots::SnapshotService;
    use crate::store::InMemoryStockStore;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use stockledger_inventory::StockStatus;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 8, 0, 0).unwrap()
    }

    fn sku() -> Sku {
        Sku::parse("SKU-RP").unwrap()
    }

    fn at(minutes: i64) -> MutationContext {
        MutationContext::system().at(t0() + Duration::minutes(minutes))
    }

    fn investigation() -> SnapshotReason {
        SnapshotReason::Investigation
    }

    #[test]
    fn replay_without_snapshots_folds_the_whole_stream() {
        let store = Arc::new(InMemoryStockStore::new());
        let service = MutationService::new(store.clone());
        service.create(&sku(), 50, &at(0)).unwrap();
        service.allocate(&sku(), 20, &at(10)).unwrap();
        service.process_pick(&sku(), 5, &at(20)).unwrap();

        let engine = ReplayEngine::new(store.clone(), store.clone());
        let mid = engine
            .state_at(&sku(), t0() + Duration::minutes(15), investigation(), OperatorId::system())
            .unwrap();

        assert_eq!(mid.snapshot_type, SnapshotType::AdHoc);
        assert_eq!(mid.quantity_on_hand, 50);
        assert_eq!(mid.quantity_allocated, 20);

        let end = engine
            .state_at(&sku(), t0() + Duration::minutes(30), investigation(), OperatorId::system())
            .unwrap();
        let live = service.get(&sku()).unwrap().unwrap();
        assert_eq!(end.quantity_on_hand, live.quantity_on_hand());
        assert_eq!(end.quantity_allocated, live.quantity_allocated());
    }

    #[test]
    fn replay_starts_from_the_nearest_prior_snapshot() {
        let store = Arc::new(InMemoryStockStore::new());
        let service = MutationService::new(store.clone());
        let snapshots = SnapshotService::new(store.clone());

        service.create(&sku(), 40, &at(0)).unwrap();
        service
            .change_status(
                &sku(),
                StockStatus::Available,
                StockStatus::Damaged,
                4,
                "forklift",
                &at(5),
            )
            .unwrap();
        let baseline = snapshots
            .capture_ad_hoc(
                &sku(),
                SnapshotReason::Audit,
                OperatorId::system(),
                t0() + Duration::minutes(6),
            )
            .unwrap();
        service.receive(&sku(), 10, &at(20)).unwrap();

        let engine = ReplayEngine::new(store.clone(), store.clone());
        let target = t0() + Duration::minutes(30);
        let replayed = engine
            .state_at(&sku(), target, SnapshotReason::Investigation, OperatorId::system())
            .unwrap();

        assert_eq!(replayed.quantity_on_hand, 50);
        assert_eq!(replayed.stock_by_status.get(StockStatus::Damaged), 4);
        assert_eq!(replayed.stock_by_status.get(StockStatus::Available), 46);
        assert_ne!(replayed.id, baseline.id);

        let again = engine
            .state_at(&sku(), target, SnapshotReason::Investigation, OperatorId::system())
            .unwrap();
        assert_eq!(replayed, again);
    }

    #[test]
    fn replay_and_save_is_idempotent() {
        let store = Arc::new(InMemoryStockStore::new());
        let service = MutationService::new(store.clone());
        service.create(&sku(), 5, &at(0)).unwrap();

        let engine = ReplayEngine::new(store.clone(), store.clone());
        let target = t0() + Duration::hours(1);
        let first = engine
            .replay_and_save(&sku(), target, SnapshotReason::Reconciliation, OperatorId::system())
            .unwrap();
        let second = engine
            .replay_and_save(&sku(), target, SnapshotReason::Reconciliation, OperatorId::system())
            .unwrap();

        assert_eq!(first.id, second.id);
        let saved = store.list(&sku(), t0(), target).unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn replay_before_any_event_is_empty() {
        let store = Arc::new(InMemoryStockStore::new());
        let engine = ReplayEngine::new(store.clone(), store.clone());

        let empty = engine
            .state_at(&sku(), t0(), SnapshotReason::Investigation, OperatorId::system())
            .unwrap();

        assert_eq!(empty.quantity_on_hand, 0);
        assert!(empty.active_holds.is_empty());
    }
}
