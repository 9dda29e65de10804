//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**; they are defined entirely by their attribute
/// values and are compared by value.
///
/// ## Value Object vs Entity
///
/// - `StockLevels { on_hand: 100, allocated: 30, atp: 70 }` is a value object
/// - `Hold { id: HoldId(...), quantity: 40, .. }` is an entity
///
/// The trait requires `Clone + PartialEq + Debug`: values are copied freely, compared
/// by content, and show up in logs and assertions.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
