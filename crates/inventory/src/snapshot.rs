use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, OperatorId, Sku, SnapshotId};

use crate::hold::Hold;
use crate::state::StockState;
use crate::status::StatusBuckets;
use crate::valuation::{AbcClass, CostingMethod, Valuation};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotType {
    Daily,
    MonthEnd,
    QuarterEnd,
    YearEnd,
    AdHoc,
}

impl SnapshotType {
    pub const ALL: [SnapshotType; 5] = [
        SnapshotType::Daily,
        SnapshotType::MonthEnd,
        SnapshotType::QuarterEnd,
        SnapshotType::YearEnd,
        SnapshotType::AdHoc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Daily => "DAILY",
            SnapshotType::MonthEnd => "MONTH_END",
            SnapshotType::QuarterEnd => "QUARTER_END",
            SnapshotType::YearEnd => "YEAR_END",
            SnapshotType::AdHoc => "AD_HOC",
        }
    }

    /// Period-end snapshot types due on `day`, largest period last.
    pub fn period_ends_on(day: NaiveDate) -> Vec<SnapshotType> {
        let is_month_end = day.succ_opt().is_none_or(|next| next.month() != day.month());
        if !is_month_end {
            return Vec::new();
        }
        let mut due = vec![SnapshotType::MonthEnd];
        if day.month() % 3 == 0 {
            due.push(SnapshotType::QuarterEnd);
        }
        if day.month() == 12 {
            due.push(SnapshotType::YearEnd);
        }
        due
    }
}

impl core::fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SnapshotType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SnapshotType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown snapshot type: {s}")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotReason {
    Scheduled,
    PeriodClose,
    Investigation,
    Audit,
    Reconciliation,
    Manual,
}

impl SnapshotReason {
    pub const ALL: [SnapshotReason; 6] = [
        SnapshotReason::Scheduled,
        SnapshotReason::PeriodClose,
        SnapshotReason::Investigation,
        SnapshotReason::Audit,
        SnapshotReason::Reconciliation,
        SnapshotReason::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotReason::Scheduled => "SCHEDULED",
            SnapshotReason::PeriodClose => "PERIOD_CLOSE",
            SnapshotReason::Investigation => "INVESTIGATION",
            SnapshotReason::Audit => "AUDIT",
            SnapshotReason::Reconciliation => "RECONCILIATION",
            SnapshotReason::Manual => "MANUAL",
        }
    }
}

impl core::str::FromStr for SnapshotReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SnapshotReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown snapshot reason: {s}")))
    }
}

/// Lot / batch quantity captured for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotBatch {
    pub lot_number: String,
    pub batch_number: Option<String>,
    pub quantity: i64,
    pub expiry_date: Option<NaiveDate>,
}

/// Immutable point-in-time capture of a SKU's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub sku: Sku,
    pub snapshot_timestamp: DateTime<Utc>,
    pub snapshot_type: SnapshotType,
    pub reason: SnapshotReason,
    pub quantity_on_hand: i64,
    pub quantity_allocated: i64,
    pub stock_by_status: StatusBuckets,
    pub active_holds: Vec<Hold>,
    pub unit_cost_minor: Option<i64>,
    pub costing_method: CostingMethod,
    pub total_value_minor: Option<i64>,
    pub abc_class: Option<AbcClass>,
    pub lot_batches: Vec<LotBatch>,
    pub serial_numbers: Vec<String>,
    /// Highest stream sequence number folded into this snapshot, `0` before any
    /// history. Replay from this snapshot resumes after it.
    #[serde(default)]
    pub last_sequence_number: u64,
    pub created_by: OperatorId,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn with_traceability(
        mut self,
        lot_batches: Vec<LotBatch>,
        serial_numbers: Vec<String>,
    ) -> Self {
        self.lot_batches = lot_batches;
        self.serial_numbers = serial_numbers;
        self
    }

    /// The stock position this snapshot captured.
    pub fn state(&self) -> StockState {
        StockState {
            stock_by_status: self.stock_by_status.clone(),
            quantity_allocated: self.quantity_allocated,
            active_holds: self.active_holds.clone(),
            valuation: Valuation {
                unit_cost_minor: self.unit_cost_minor,
                costing_method: self.costing_method,
            },
            abc_class: self.abc_class,
        }
    }
}

/// Mutable accumulator used while folding events during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBuilder {
    sku: Sku,
    state: StockState,
    lot_batches: Vec<LotBatch>,
    serial_numbers: Vec<String>,
    last_sequence_number: u64,
}

impl SnapshotBuilder {
    /// Empty state: no stock, no holds, unvalued.
    pub fn new(sku: Sku) -> Self {
        Self::from_state(sku, StockState::default())
    }

    pub fn from_state(sku: Sku, state: StockState) -> Self {
        Self {
            sku,
            state,
            lot_batches: Vec::new(),
            serial_numbers: Vec::new(),
            last_sequence_number: 0,
        }
    }

    /// Seed from a baseline snapshot, carrying its traceability data forward.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            sku: snapshot.sku.clone(),
            state: snapshot.state(),
            lot_batches: snapshot.lot_batches.clone(),
            serial_numbers: snapshot.serial_numbers.clone(),
            last_sequence_number: snapshot.last_sequence_number,
        }
    }

    pub fn state(&self) -> &StockState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StockState {
        &mut self.state
    }

    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    /// Record that the event at `sequence_number` has been folded in.
    pub(crate) fn mark_folded(&mut self, sequence_number: u64) {
        self.last_sequence_number = self.last_sequence_number.max(sequence_number);
    }

    pub fn build(
        self,
        id: SnapshotId,
        snapshot_timestamp: DateTime<Utc>,
        snapshot_type: SnapshotType,
        reason: SnapshotReason,
        created_by: OperatorId,
        created_at: DateTime<Utc>,
    ) -> Snapshot {
        let quantity_on_hand = self.state.quantity_on_hand();
        Snapshot {
            id,
            sku: self.sku,
            snapshot_timestamp,
            snapshot_type,
            reason,
            quantity_on_hand,
            quantity_allocated: self.state.quantity_allocated,
            total_value_minor: self.state.valuation.total_value_minor(quantity_on_hand),
            unit_cost_minor: self.state.valuation.unit_cost_minor,
            costing_method: self.state.valuation.costing_method,
            abc_class: self.state.abc_class,
            stock_by_status: self.state.stock_by_status,
            active_holds: self.state.active_holds,
            lot_batches: self.lot_batches,
            serial_numbers: self.serial_numbers,
            last_sequence_number: self.last_sequence_number,
            created_by,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StockRecord;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_ends_follow_the_calendar() {
        assert!(SnapshotType::period_ends_on(day(2024, 2, 28)).is_empty());
        assert_eq!(SnapshotType::period_ends_on(day(2024, 2, 29)), vec![SnapshotType::MonthEnd]);
        assert_eq!(
            SnapshotType::period_ends_on(day(2024, 9, 30)),
            vec![SnapshotType::MonthEnd, SnapshotType::QuarterEnd]
        );
        assert_eq!(
            SnapshotType::period_ends_on(day(2024, 12, 31)),
            vec![SnapshotType::MonthEnd, SnapshotType::QuarterEnd, SnapshotType::YearEnd]
        );
    }

    #[test]
    fn built_snapshot_derives_totals_and_keeps_the_folded_sequence() {
        let at = Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 0).unwrap();
        let sku = Sku::parse("SKU-9").unwrap();
        let (mut record, _) = StockRecord::create(sku.clone(), 40, at).unwrap();
        record.revalue(25, CostingMethod::Fifo, at).unwrap();

        let mut builder = SnapshotBuilder::from_state(sku.clone(), record.state().clone());
        builder.mark_folded(4);
        builder.mark_folded(2);
        let snapshot = builder.build(
            SnapshotId::new(),
            at,
            SnapshotType::QuarterEnd,
            SnapshotReason::PeriodClose,
            OperatorId::system(),
            at,
        );

        assert_eq!(snapshot.sku, sku);
        assert_eq!(snapshot.quantity_on_hand, 40);
        assert_eq!(snapshot.total_value_minor, Some(1000));
        assert_eq!(snapshot.state(), *record.state());
        assert_eq!(snapshot.snapshot_timestamp, at);
        assert_eq!(snapshot.last_sequence_number, 4);
        assert_eq!(SnapshotBuilder::from_snapshot(&snapshot).last_sequence_number(), 4);
    }

    #[test]
    fn serialised_snapshot_uses_wire_names() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snapshot = SnapshotBuilder::new(Sku::parse("SKU-2").unwrap()).build(
            SnapshotId::new(),
            at,
            SnapshotType::AdHoc,
            SnapshotReason::Audit,
            OperatorId::new("auditor"),
            at,
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["snapshotType"], "AD_HOC");
        assert_eq!(json["reason"], "AUDIT");
        assert_eq!(json["quantityOnHand"], 0);
        assert_eq!(json["lastSequenceNumber"], 0);
    }

    #[test]
    fn snapshots_stored_before_sequence_tracking_still_decode() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snapshot = SnapshotBuilder::new(Sku::parse("SKU-3").unwrap()).build(
            SnapshotId::new(),
            at,
            SnapshotType::Daily,
            SnapshotReason::Scheduled,
            OperatorId::system(),
            at,
        );
        let mut json = serde_json::to_value(&snapshot).unwrap();
        json.as_object_mut().unwrap().remove("lastSequenceNumber");

        let decoded: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
