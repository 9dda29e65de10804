use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

/// Condition status of physical stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    Available,
    Quarantine,
    Damaged,
    InTransit,
    Returned,
    Expired,
}

impl StockStatus {
    pub const ALL: [StockStatus; 6] = [
        StockStatus::Available,
        StockStatus::Quarantine,
        StockStatus::Damaged,
        StockStatus::InTransit,
        StockStatus::Returned,
        StockStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Available => "AVAILABLE",
            StockStatus::Quarantine => "QUARANTINE",
            StockStatus::Damaged => "DAMAGED",
            StockStatus::InTransit => "IN_TRANSIT",
            StockStatus::Returned => "RETURNED",
            StockStatus::Expired => "EXPIRED",
        }
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for StockStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StockStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown stock status: {s}")))
    }
}

/// Quantity per condition status.
///
/// Missing statuses read as zero and zero buckets are never stored, so two equal
/// stock positions always compare and serialise identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<StockStatus, i64>", into = "BTreeMap<StockStatus, i64>")]
pub struct StatusBuckets(BTreeMap<StockStatus, i64>);

impl StatusBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, status: StockStatus) -> i64 {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn set(&mut self, status: StockStatus, quantity: i64) {
        if quantity == 0 {
            self.0.remove(&status);
        } else {
            self.0.insert(status, quantity);
        }
    }

    /// Apply a signed delta and return the resulting bucket quantity. A result
    /// outside `i64` is rejected and leaves the bucket unchanged.
    pub fn add(&mut self, status: StockStatus, delta: i64) -> DomainResult<i64> {
        let current = self.get(status);
        let next = current.checked_add(delta).ok_or_else(|| {
            DomainError::invalid_quantity(format!(
                "{status} quantity {current} cannot absorb {delta}"
            ))
        })?;
        self.set(status, next);
        Ok(next)
    }

    /// Sum over every bucket (the on-hand quantity), saturating at `i64::MAX`.
    pub fn total(&self) -> i64 {
        self.0.values().fold(0i64, |acc, qty| acc.saturating_add(*qty))
    }

    /// Sum over every bucket, `None` when it does not fit in `i64`.
    pub fn checked_total(&self) -> Option<i64> {
        self.0.values().try_fold(0i64, |acc, qty| acc.checked_add(*qty))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StockStatus, i64)> + '_ {
        self.0.iter().map(|(status, qty)| (*status, *qty))
    }
}

impl ValueObject for StatusBuckets {}

impl From<BTreeMap<StockStatus, i64>> for StatusBuckets {
    fn from(map: BTreeMap<StockStatus, i64>) -> Self {
        map.into_iter().collect()
    }
}

impl From<StatusBuckets> for BTreeMap<StockStatus, i64> {
    fn from(value: StatusBuckets) -> Self {
        value.0
    }
}

impl FromIterator<(StockStatus, i64)> for StatusBuckets {
    fn from_iter<T: IntoIterator<Item = (StockStatus, i64)>>(iter: T) -> Self {
        let mut buckets = StatusBuckets::new();
        for (status, qty) in iter {
            let next = buckets.get(status).saturating_add(qty);
            buckets.set(status, next);
        }
        buckets
    }
}
