//! Aggregate root trait and optimistic concurrency primitives.

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Kept small so the aggregate decides how it models state transitions without
/// bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// A never-persisted aggregate is at version 0; every accepted mutation adds one.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, administrative repair).
    Any,
    /// Require the persisted aggregate to be at an exact version.
    ///
    /// `Exact(0)` means "must not exist yet".
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// `execute` validates a command against the current state and, when accepted,
/// mutates the aggregate and returns a description of what changed. A rejected
/// command leaves the aggregate untouched.
///
/// Aggregates must not perform IO. Business time is passed in explicitly so that
/// execution is reproducible.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Change: core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn execute(
        &mut self,
        command: &Self::Command,
        at: DateTime<Utc>,
    ) -> Result<Self::Change, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_matches_only_itself() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn check_reports_conflict() {
        let err = ExpectedVersion::Exact(0).check(1).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
