//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Holds are entities inside the stock aggregate: two holds with identical
/// quantities and reasons are still different restrictions.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
