use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, DomainResult, HoldId, Sku};

use crate::events::{
    AbcClassificationChanged, InventoryHoldPlaced, InventoryHoldReleased, StockEvent,
    StockLevelChanged, StockLevels, StockStatusChanged, StockValuationChanged,
};
use crate::hold::{Hold, HoldType};
use crate::ledger::ChangeType;
use crate::state::StockState;
use crate::status::{StatusBuckets, StockStatus};
use crate::valuation::{AbcClass, CostingMethod, Valuation};

/// Command payload for placing a hold.
///
/// The hold id is chosen by the caller so that a command re-applied after a
/// concurrency conflict places the same hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceHold {
    pub hold_id: HoldId,
    #[serde(rename = "type")]
    pub hold_type: HoldType,
    pub quantity: i64,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PlaceHold {
    pub fn new(
        hold_type: HoldType,
        quantity: i64,
        reason: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            hold_id: HoldId::new(),
            hold_type,
            quantity,
            reason: reason.into(),
            expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockCommand {
    Create {
        initial_quantity: i64,
    },
    Receive {
        quantity: i64,
    },
    Allocate {
        quantity: i64,
    },
    Deallocate {
        quantity: i64,
    },
    /// Signed delta on AVAILABLE, or on `status` when given.
    Adjust {
        delta: i64,
        reason_code: String,
        status: Option<StockStatus>,
    },
    ProcessPick {
        quantity: i64,
    },
    ChangeStatus {
        from: StockStatus,
        to: StockStatus,
        quantity: i64,
        reason: String,
    },
    PlaceHold(PlaceHold),
    ReleaseHold {
        hold_id: HoldId,
    },
    Revalue {
        unit_cost_minor: i64,
        costing_method: CostingMethod,
    },
    Classify {
        abc_class: AbcClass,
    },
}

impl StockCommand {
    pub fn change_type(&self) -> ChangeType {
        match self {
            StockCommand::Create { .. } => ChangeType::Created,
            StockCommand::Receive { .. } => ChangeType::Receipt,
            StockCommand::Allocate { .. } => ChangeType::Allocation,
            StockCommand::Deallocate { .. } => ChangeType::Deallocation,
            StockCommand::Adjust { .. } => ChangeType::Adjustment,
            StockCommand::ProcessPick { .. } => ChangeType::Pick,
            StockCommand::ChangeStatus { .. } => ChangeType::StatusChange,
            StockCommand::PlaceHold(_) => ChangeType::HoldPlaced,
            StockCommand::ReleaseHold { .. } => ChangeType::HoldReleased,
            StockCommand::Revalue { .. } => ChangeType::Revaluation,
            StockCommand::Classify { .. } => ChangeType::Reclassification,
        }
    }

    /// Commands accepted against a SKU that has no record yet.
    pub fn creates_record(&self) -> bool {
        matches!(
            self,
            StockCommand::Create { .. } | StockCommand::Receive { .. }
        )
    }

    fn change_reason(&self) -> String {
        match self {
            StockCommand::Adjust { reason_code, .. } => reason_code.clone(),
            StockCommand::ChangeStatus { reason, .. } => reason.clone(),
            StockCommand::PlaceHold(cmd) => cmd.reason.clone(),
            other => other.change_type().as_str().to_string(),
        }
    }
}

/// Outcome of one accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    /// Signed on-hand delta.
    pub quantity_delta: i64,
    pub change_type: ChangeType,
    pub previous: StockLevels,
    pub current: StockLevels,
    /// Effective time of the change; never earlier than the record's previous one.
    pub occurred_at: DateTime<Utc>,
    /// Specialised events first, `StockLevelChanged` last.
    pub events: Vec<StockEvent>,
}

/// Aggregate root: the stock of one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    sku: Sku,
    #[serde(flatten)]
    state: StockState,
    version: u64,
    last_updated: Option<DateTime<Utc>>,
}

impl StockRecord {
    /// A not-yet-persisted record (version 0). Only `create` and `receive` are
    /// accepted against it.
    pub fn new(sku: Sku) -> Self {
        Self {
            sku,
            state: StockState::default(),
            version: 0,
            last_updated: None,
        }
    }

    /// `create(sku, initial_quantity)`.
    pub fn create(
        sku: Sku,
        initial_quantity: i64,
        at: DateTime<Utc>,
    ) -> DomainResult<(Self, StockChange)> {
        let mut record = Self::new(sku);
        let change = record.execute(&StockCommand::Create { initial_quantity }, at)?;
        Ok((record, change))
    }

    /// Rebuild a record from storage.
    pub fn restore(
        sku: Sku,
        state: StockState,
        version: u64,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            sku,
            state,
            version,
            last_updated,
        }
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn state(&self) -> &StockState {
        &self.state
    }

    /// Whether the record has been persisted at least once.
    pub fn exists(&self) -> bool {
        self.version > 0
    }

    pub fn stock_by_status(&self) -> &StatusBuckets {
        &self.state.stock_by_status
    }

    pub fn quantity_on_hand(&self) -> i64 {
        self.state.quantity_on_hand()
    }

    pub fn quantity_allocated(&self) -> i64 {
        self.state.quantity_allocated
    }

    pub fn active_holds(&self) -> &[Hold] {
        &self.state.active_holds
    }

    pub fn valuation(&self) -> &Valuation {
        &self.state.valuation
    }

    pub fn abc_class(&self) -> Option<AbcClass> {
        self.state.abc_class
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// `getATP()`: pure.
    pub fn atp(&self) -> i64 {
        self.state.atp()
    }

    pub fn levels(&self) -> StockLevels {
        self.state.levels()
    }

    /// Holds whose expiry is at or before `at`.
    pub fn expired_holds(&self, at: DateTime<Utc>) -> Vec<HoldId> {
        self.state
            .active_holds
            .iter()
            .filter(|h| h.is_expired(at))
            .map(|h| h.id)
            .collect()
    }

    pub fn receive(&mut self, quantity: i64, at: DateTime<Utc>) -> DomainResult<StockChange> {
        self.execute(&StockCommand::Receive { quantity }, at)
    }

    pub fn allocate(&mut self, quantity: i64, at: DateTime<Utc>) -> DomainResult<StockChange> {
        self.execute(&StockCommand::Allocate { quantity }, at)
    }

    pub fn deallocate(&mut self, quantity: i64, at: DateTime<Utc>) -> DomainResult<StockChange> {
        self.execute(&StockCommand::Deallocate { quantity }, at)
    }

    pub fn adjust(
        &mut self,
        delta: i64,
        reason_code: impl Into<String>,
        status: Option<StockStatus>,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        let command = StockCommand::Adjust {
            delta,
            reason_code: reason_code.into(),
            status,
        };
        self.execute(&command, at)
    }

    pub fn process_pick(&mut self, quantity: i64, at: DateTime<Utc>) -> DomainResult<StockChange> {
        self.execute(&StockCommand::ProcessPick { quantity }, at)
    }

    pub fn change_status(
        &mut self,
        from: StockStatus,
        to: StockStatus,
        quantity: i64,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        let command = StockCommand::ChangeStatus {
            from,
            to,
            quantity,
            reason: reason.into(),
        };
        self.execute(&command, at)
    }

    pub fn place_hold(&mut self, hold: PlaceHold, at: DateTime<Utc>) -> DomainResult<StockChange> {
        self.execute(&StockCommand::PlaceHold(hold), at)
    }

    pub fn release_hold(
        &mut self,
        hold_id: HoldId,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        self.execute(&StockCommand::ReleaseHold { hold_id }, at)
    }

    pub fn revalue(
        &mut self,
        unit_cost_minor: i64,
        costing_method: CostingMethod,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        self.execute(
            &StockCommand::Revalue {
                unit_cost_minor,
                costing_method,
            },
            at,
        )
    }

    pub fn classify(
        &mut self,
        abc_class: AbcClass,
        at: DateTime<Utc>,
    ) -> DomainResult<StockChange> {
        self.execute(&StockCommand::Classify { abc_class }, at)
    }
}

impl AggregateRoot for StockRecord {
    type Id = Sku;

    fn id(&self) -> &Self::Id {
        &self.sku
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for StockRecord {
    type Command = StockCommand;
    type Change = StockChange;
    type Error = DomainError;

    /// Validate and apply on a working copy, re-check every invariant, then swap
    /// the copy in. Any error leaves `self` untouched.
    ///
    /// `at` is raised to `last_updated` when it is earlier, so the timestamps of a
    /// record's changes never go backwards in commit order. The effective time is
    /// returned as [`StockChange::occurred_at`].
    fn execute(&mut self, command: &StockCommand, at: DateTime<Utc>) -> DomainResult<StockChange> {
        if !self.exists() && !command.creates_record() {
            return Err(DomainError::RecordNotFound(self.sku.clone()));
        }
        if self.exists() && matches!(command, StockCommand::Create { .. }) {
            return Err(DomainError::conflict(format!(
                "stock record for {} already exists",
                self.sku
            )));
        }

        let at = self.last_updated.map_or(at, |last| at.max(last));
        let previous = self.state.levels();
        let mut working = self.state.clone();
        let mut events = Vec::with_capacity(2);
        let quantity_delta = apply(&mut working, &self.sku, command, at, &mut events)?;
        if working.stock_by_status.checked_total().is_none() {
            return Err(DomainError::invalid_quantity(format!(
                "{} would take on-hand past {}",
                command.change_type(),
                i64::MAX
            )));
        }
        working.check_invariants()?;

        let current = working.levels();
        events.push(StockEvent::StockLevelChanged(StockLevelChanged {
            sku: self.sku.clone(),
            previous_state: previous,
            new_state: current,
            change_reason: command.change_reason(),
            stock_by_status: working.stock_by_status.clone(),
            occurred_at: at,
        }));

        self.state = working;
        self.version += 1;
        self.last_updated = Some(at);

        Ok(StockChange {
            quantity_delta,
            change_type: command.change_type(),
            previous,
            current,
            occurred_at: at,
            events,
        })
    }
}

fn require_positive(quantity: i64, what: &str) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "{what} quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}

/// Mutate `state` for `command`, pushing specialised events. Returns the on-hand delta.
fn apply(
    state: &mut StockState,
    sku: &Sku,
    command: &StockCommand,
    at: DateTime<Utc>,
    events: &mut Vec<StockEvent>,
) -> DomainResult<i64> {
    match command {
        StockCommand::Create { initial_quantity } => {
            if *initial_quantity < 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "initial quantity cannot be negative, got {initial_quantity}"
                )));
            }
            state.stock_by_status.add(StockStatus::Available, *initial_quantity)?;
            Ok(*initial_quantity)
        }
        StockCommand::Receive { quantity } => {
            require_positive(*quantity, "receipt")?;
            state.stock_by_status.add(StockStatus::Available, *quantity)?;
            Ok(*quantity)
        }
        StockCommand::Allocate { quantity } => {
            require_positive(*quantity, "allocation")?;
            let atp = state.atp();
            if *quantity > atp {
                return Err(DomainError::insufficient(*quantity, atp));
            }
            state.quantity_allocated = state
                .quantity_allocated
                .checked_add(*quantity)
                .ok_or_else(|| DomainError::invalid_quantity("allocated quantity overflows"))?;
            Ok(0)
        }
        StockCommand::Deallocate { quantity } => {
            require_positive(*quantity, "deallocation")?;
            if *quantity > state.quantity_allocated {
                return Err(DomainError::invalid_quantity(format!(
                    "cannot deallocate {quantity}, only {} allocated",
                    state.quantity_allocated
                )));
            }
            state.quantity_allocated -= quantity;
            Ok(0)
        }
        StockCommand::Adjust {
            delta,
            reason_code,
            status,
        } => {
            if *delta == 0 {
                return Err(DomainError::invalid_quantity("adjustment delta cannot be zero"));
            }
            if reason_code.trim().is_empty() {
                return Err(DomainError::validation("adjustment reason code cannot be empty"));
            }
            let status = status.unwrap_or(StockStatus::Available);
            let current = state.stock_by_status.get(status);
            let next = current.checked_add(*delta).ok_or_else(|| {
                DomainError::invalid_quantity(format!(
                    "adjustment of {delta} overflows {status} ({current})"
                ))
            })?;
            if next < 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "adjustment of {delta} would leave {status} at {next}"
                )));
            }
            if status == StockStatus::Available && next < state.quantity_allocated {
                return Err(DomainError::invalid_quantity(format!(
                    "adjustment of {delta} would leave AVAILABLE ({next}) below allocated ({})",
                    state.quantity_allocated
                )));
            }
            state.stock_by_status.set(status, next);
            Ok(*delta)
        }
        StockCommand::ProcessPick { quantity } => {
            require_positive(*quantity, "pick")?;
            if *quantity > state.quantity_allocated {
                return Err(DomainError::invalid_quantity(format!(
                    "cannot pick {quantity}, only {} allocated",
                    state.quantity_allocated
                )));
            }
            if *quantity > state.available() {
                return Err(DomainError::invalid_quantity(format!(
                    "cannot pick {quantity}, only {} AVAILABLE",
                    state.available()
                )));
            }
            state.stock_by_status.add(StockStatus::Available, -quantity)?;
            state.quantity_allocated -= quantity;
            Ok(-quantity)
        }
        StockCommand::ChangeStatus {
            from,
            to,
            quantity,
            reason,
        } => {
            require_positive(*quantity, "status change")?;
            if from == to {
                return Err(DomainError::invalid_quantity(format!(
                    "status change from {from} to itself"
                )));
            }
            let in_from = state.stock_by_status.get(*from);
            if in_from < *quantity {
                return Err(DomainError::invalid_quantity(format!(
                    "cannot move {quantity} out of {from}, only {in_from} present"
                )));
            }
            if *from == StockStatus::Available && in_from - quantity < state.quantity_allocated {
                return Err(DomainError::invalid_quantity(format!(
                    "moving {quantity} out of AVAILABLE would leave less than the {} allocated",
                    state.quantity_allocated
                )));
            }
            state.stock_by_status.add(*from, -quantity)?;
            state.stock_by_status.add(*to, *quantity)?;
            events.push(StockEvent::StockStatusChanged(StockStatusChanged {
                sku: sku.clone(),
                quantity: *quantity,
                from_status: *from,
                to_status: *to,
                reason: reason.clone(),
                occurred_at: at,
            }));
            Ok(0)
        }
        StockCommand::PlaceHold(cmd) => {
            require_positive(cmd.quantity, "hold")?;
            if cmd.reason.trim().is_empty() {
                return Err(DomainError::validation("hold reason cannot be empty"));
            }
            if cmd.expires_at.is_some_and(|expires| expires <= at) {
                return Err(DomainError::validation("hold expiry must be in the future"));
            }
            if state.hold(cmd.hold_id).is_some() {
                return Err(DomainError::conflict(format!("hold {} already active", cmd.hold_id)));
            }
            let unheld = state.available().saturating_sub(state.held()).max(0);
            if cmd.quantity > unheld {
                return Err(DomainError::insufficient(cmd.quantity, unheld));
            }
            state.insert_hold(Hold {
                id: cmd.hold_id,
                hold_type: cmd.hold_type,
                quantity: cmd.quantity,
                reason: cmd.reason.clone(),
                placed_at: at,
                expires_at: cmd.expires_at,
            });
            events.push(StockEvent::InventoryHoldPlaced(InventoryHoldPlaced {
                sku: sku.clone(),
                hold_id: cmd.hold_id,
                hold_type: cmd.hold_type,
                quantity: cmd.quantity,
                reason: cmd.reason.clone(),
                expires_at: cmd.expires_at,
                occurred_at: at,
            }));
            Ok(0)
        }
        StockCommand::ReleaseHold { hold_id } => {
            state
                .remove_hold(*hold_id)
                .ok_or(DomainError::HoldNotFound(*hold_id))?;
            events.push(StockEvent::InventoryHoldReleased(InventoryHoldReleased {
                sku: sku.clone(),
                hold_id: *hold_id,
                occurred_at: at,
            }));
            Ok(0)
        }
        StockCommand::Revalue {
            unit_cost_minor,
            costing_method,
        } => {
            if *unit_cost_minor < 0 {
                return Err(DomainError::validation(format!(
                    "unit cost cannot be negative, got {unit_cost_minor}"
                )));
            }
            let previous = state.valuation.unit_cost_minor;
            state.valuation = Valuation {
                unit_cost_minor: Some(*unit_cost_minor),
                costing_method: *costing_method,
            };
            events.push(StockEvent::StockValuationChanged(StockValuationChanged {
                sku: sku.clone(),
                previous_unit_cost_minor: previous,
                new_unit_cost_minor: *unit_cost_minor,
                costing_method: *costing_method,
                total_value_minor: state.valuation.total_value_minor(state.quantity_on_hand()),
                occurred_at: at,
            }));
            Ok(0)
        }
        StockCommand::Classify { abc_class } => {
            let previous = state.abc_class.replace(*abc_class);
            events.push(StockEvent::AbcClassificationChanged(AbcClassificationChanged {
                sku: sku.clone(),
                previous_class: previous,
                new_class: *abc_class,
                occurred_at: at,
            }));
            Ok(0)
        }
    }
}
