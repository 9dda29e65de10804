use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, ValueObject};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostingMethod {
    #[default]
    Standard,
    WeightedAverage,
    Fifo,
}

impl CostingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostingMethod::Standard => "STANDARD",
            CostingMethod::WeightedAverage => "WEIGHTED_AVERAGE",
            CostingMethod::Fifo => "FIFO",
        }
    }
}

impl core::str::FromStr for CostingMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STANDARD" => Ok(CostingMethod::Standard),
            "WEIGHTED_AVERAGE" => Ok(CostingMethod::WeightedAverage),
            "FIFO" => Ok(CostingMethod::Fifo),
            other => Err(DomainError::validation(format!("unknown costing method: {other}"))),
        }
    }
}

/// ABC inventory classification (A = highest value / velocity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbcClass {
    A,
    B,
    C,
}

impl AbcClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbcClass::A => "A",
            AbcClass::B => "B",
            AbcClass::C => "C",
        }
    }
}

impl core::str::FromStr for AbcClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(AbcClass::A),
            "B" => Ok(AbcClass::B),
            "C" => Ok(AbcClass::C),
            other => Err(DomainError::validation(format!("unknown abc class: {other}"))),
        }
    }
}

/// Unit cost in minor currency units plus the costing method it was derived with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub unit_cost_minor: Option<i64>,
    pub costing_method: CostingMethod,
}

impl Valuation {
    /// Total value of `on_hand` units; `None` when unvalued or on overflow.
    pub fn total_value_minor(&self, on_hand: i64) -> Option<i64> {
        self.unit_cost_minor.and_then(|cost| cost.checked_mul(on_hand))
    }
}

impl ValueObject for Valuation {}
