use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, Entity, HoldId};

/// Reason category of an inventory hold. Every hold type restricts AVAILABLE stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldType {
    QualityHold,
    LegalHold,
    RecallHold,
    CustomerReserve,
    DamageInvestigation,
    CycleCount,
}

impl HoldType {
    pub const ALL: [HoldType; 6] = [
        HoldType::QualityHold,
        HoldType::LegalHold,
        HoldType::RecallHold,
        HoldType::CustomerReserve,
        HoldType::DamageInvestigation,
        HoldType::CycleCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldType::QualityHold => "QUALITY_HOLD",
            HoldType::LegalHold => "LEGAL_HOLD",
            HoldType::RecallHold => "RECALL_HOLD",
            HoldType::CustomerReserve => "CUSTOMER_RESERVE",
            HoldType::DamageInvestigation => "DAMAGE_INVESTIGATION",
            HoldType::CycleCount => "CYCLE_COUNT",
        }
    }
}

impl core::fmt::Display for HoldType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for HoldType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HoldType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown hold type: {s}")))
    }
}

/// An active restriction on promisable stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub id: HoldId,
    #[serde(rename = "type")]
    pub hold_type: HoldType,
    pub quantity: i64,
    pub reason: String,
    pub placed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Hold {
    /// A hold is expired once `expires_at` is at or before `at`.
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= at)
    }
}

impl Entity for Hold {
    type Id = HoldId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
