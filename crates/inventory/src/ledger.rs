use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, LedgerEntryId, OperatorId, Sku};

use crate::record::StockChange;

/// Kind of accepted command recorded by a ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Created,
    Receipt,
    Allocation,
    Deallocation,
    Adjustment,
    Pick,
    StatusChange,
    HoldPlaced,
    HoldReleased,
    Revaluation,
    Reclassification,
}

impl ChangeType {
    pub const ALL: [ChangeType; 11] = [
        ChangeType::Created,
        ChangeType::Receipt,
        ChangeType::Allocation,
        ChangeType::Deallocation,
        ChangeType::Adjustment,
        ChangeType::Pick,
        ChangeType::StatusChange,
        ChangeType::HoldPlaced,
        ChangeType::HoldReleased,
        ChangeType::Revaluation,
        ChangeType::Reclassification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "CREATED",
            ChangeType::Receipt => "RECEIPT",
            ChangeType::Allocation => "ALLOCATION",
            ChangeType::Deallocation => "DEALLOCATION",
            ChangeType::Adjustment => "ADJUSTMENT",
            ChangeType::Pick => "PICK",
            ChangeType::StatusChange => "STATUS_CHANGE",
            ChangeType::HoldPlaced => "HOLD_PLACED",
            ChangeType::HoldReleased => "HOLD_RELEASED",
            ChangeType::Revaluation => "REVALUATION",
            ChangeType::Reclassification => "RECLASSIFICATION",
        }
    }
}

impl core::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ChangeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChangeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown change type: {s}")))
    }
}

/// Immutable audit record of one accepted mutation.
///
/// `quantity_change` is the signed on-hand delta; commands that leave on-hand
/// untouched (allocation, holds, status moves) record zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub sku: Sku,
    pub timestamp: DateTime<Utc>,
    pub quantity_change: i64,
    pub change_type: ChangeType,
    pub source_reference: Option<String>,
    pub reason: Option<String>,
    pub operator_id: OperatorId,
}

impl LedgerEntry {
    /// Entry for `change`, stamped with the change's effective time.
    pub fn record(
        sku: Sku,
        change: &StockChange,
        source_reference: Option<String>,
        reason: Option<String>,
        operator_id: OperatorId,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            sku,
            timestamp: change.occurred_at,
            quantity_change: change.quantity_delta,
            change_type: change.change_type,
            source_reference,
            reason,
            operator_id,
        }
    }
}
