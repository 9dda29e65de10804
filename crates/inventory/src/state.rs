//! The stock position of one SKU, independent of identity and version.
//!
//! `StockState` is what snapshots capture and what replay reconstructs; the live
//! `StockRecord` wraps one together with its SKU, version and timestamp.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, HoldId, ValueObject};

use crate::events::StockLevels;
use crate::hold::Hold;
use crate::status::{StatusBuckets, StockStatus};
use crate::valuation::{AbcClass, Valuation};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockState {
    pub stock_by_status: StatusBuckets,
    pub quantity_allocated: i64,
    /// Ordered by hold id.
    pub active_holds: Vec<Hold>,
    pub valuation: Valuation,
    pub abc_class: Option<AbcClass>,
}

impl StockState {
    /// Physical quantity across every status bucket.
    pub fn quantity_on_hand(&self) -> i64 {
        self.stock_by_status.total()
    }

    pub fn available(&self) -> i64 {
        self.stock_by_status.get(StockStatus::Available)
    }

    /// Quantity restricted by active holds, saturating at `i64::MAX`.
    pub fn held(&self) -> i64 {
        self.active_holds
            .iter()
            .fold(0i64, |acc, h| acc.saturating_add(h.quantity))
    }

    /// Available-to-promise:
    /// `min(on_hand - allocated, AVAILABLE - held)`, clamped at zero.
    pub fn atp(&self) -> i64 {
        let unallocated = self.quantity_on_hand().saturating_sub(self.quantity_allocated);
        let unheld = self.available().saturating_sub(self.held());
        unallocated.min(unheld).max(0)
    }

    pub fn levels(&self) -> StockLevels {
        StockLevels {
            on_hand: self.quantity_on_hand(),
            allocated: self.quantity_allocated,
            atp: self.atp(),
        }
    }

    pub fn hold(&self, id: HoldId) -> Option<&Hold> {
        self.active_holds.iter().find(|h| h.id == id)
    }

    /// Insert keeping the id order. Replaces a hold with the same id.
    pub fn insert_hold(&mut self, hold: Hold) {
        match self.active_holds.binary_search_by(|h| h.id.cmp(&hold.id)) {
            Ok(idx) => self.active_holds[idx] = hold,
            Err(idx) => self.active_holds.insert(idx, hold),
        }
    }

    pub fn remove_hold(&mut self, id: HoldId) -> Option<Hold> {
        let idx = self.active_holds.iter().position(|h| h.id == id)?;
        Some(self.active_holds.remove(idx))
    }

    /// Validate the stock invariants. Any failure is data corruption or a defect.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let on_hand = self.quantity_on_hand();
        let allocated = self.quantity_allocated;
        let violation = |rule: &str| Err(DomainError::invariant(rule, on_hand, allocated));

        if let Some((status, _)) = self.stock_by_status.iter().find(|(_, qty)| *qty < 0) {
            return violation(&format!("status {status} quantity is negative"));
        }
        if allocated < 0 {
            return violation("quantity allocated is negative");
        }
        if allocated > self.available() {
            return violation("quantity allocated exceeds AVAILABLE quantity");
        }
        if self.active_holds.iter().any(|h| h.quantity <= 0) {
            return violation("hold quantity must be positive");
        }
        if !self.active_holds.is_sorted_by(|a, b| a.id < b.id) {
            return violation("active holds are not ordered by id");
        }
        let atp = self.atp();
        if atp < 0 || atp > on_hand {
            return violation("ATP outside [0, on hand]");
        }
        Ok(())
    }
}

impl ValueObject for StockState {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hold::HoldType;
    use chrono::Utc;

    fn state(available: i64, allocated: i64) -> StockState {
        let mut s = StockState::default();
        s.stock_by_status.set(StockStatus::Available, available);
        s.quantity_allocated = allocated;
        s
    }

    fn hold(quantity: i64) -> Hold {
        hold_with_id(HoldId::new(), quantity)
    }

    fn hold_with_id(id: HoldId, quantity: i64) -> Hold {
        Hold {
            id,
            hold_type: HoldType::QualityHold,
            quantity,
            reason: "inspection".into(),
            placed_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn atp_takes_the_tighter_of_allocation_and_holds() {
        let mut s = state(100, 0);
        s.insert_hold(hold(40));
        assert_eq!(s.atp(), 60);

        s.quantity_allocated = 50;
        assert_eq!(s.atp(), 50);
    }

    #[test]
    fn atp_counts_other_statuses_only_through_on_hand() {
        let mut s = state(10, 10);
        s.stock_by_status.set(StockStatus::Damaged, 5);
        // on_hand - allocated = 5, AVAILABLE - held = 10
        assert_eq!(s.atp(), 5);
    }

    #[test]
    fn atp_is_clamped_at_zero() {
        let mut s = state(10, 0);
        s.insert_hold(hold(15));
        assert_eq!(s.atp(), 0);
    }

    #[test]
    fn holds_stay_ordered_by_id() {
        let mut s = state(100, 0);
        let a = hold_with_id(HoldId::from_uuid(uuid::Uuid::from_u128(1)), 1);
        let b = hold_with_id(HoldId::from_uuid(uuid::Uuid::from_u128(2)), 2);
        s.insert_hold(b.clone());
        s.insert_hold(a.clone());
        assert_eq!(s.active_holds, vec![a, b]);
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn over_allocation_is_an_invariant_violation() {
        let err = state(5, 6).check_invariants().unwrap_err();
        assert!(err.is_defect());
    }
}
