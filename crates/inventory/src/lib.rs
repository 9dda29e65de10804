//! Stock domain: the per-SKU stock record, its events, ledger entries, snapshots
//! and the pure replay fold.

pub mod events;
pub mod hold;
pub mod ledger;
pub mod record;
pub mod replay;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod valuation;

pub use events::{
    AbcClassificationChanged, DecodeError, InventoryHoldPlaced, InventoryHoldReleased,
    StockEvent, StockLevelChanged, StockLevels, StockStatusChanged, StockValuationChanged,
};
pub use hold::{Hold, HoldType};
pub use ledger::{ChangeType, LedgerEntry};
pub use record::{PlaceHold, StockChange, StockCommand, StockRecord};
pub use replay::{SequencedEvent, replay, replay_as};
pub use snapshot::{LotBatch, Snapshot, SnapshotBuilder, SnapshotReason, SnapshotType};
pub use state::StockState;
pub use status::{StatusBuckets, StockStatus};
pub use valuation::{AbcClass, CostingMethod, Valuation};
