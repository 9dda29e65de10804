//! Stock domain events.
//!
//! These are both the per-SKU stream entries folded by replay and the payloads of
//! the integration events written to the outbox. Payload field names are a
//! compatibility contract with downstream consumers (camelCase JSON).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{HoldId, Sku, ValueObject};
use stockledger_events::Event;

use crate::hold::{Hold, HoldType};
use crate::snapshot::SnapshotBuilder;
use crate::status::{StatusBuckets, StockStatus};
use crate::valuation::{AbcClass, CostingMethod};

/// On-hand / allocated / ATP figures at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevels {
    pub on_hand: i64,
    pub allocated: i64,
    pub atp: i64,
}

impl ValueObject for StockLevels {}

/// Event: StockLevelChanged. Emitted by every accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevelChanged {
    pub sku: Sku,
    pub previous_state: StockLevels,
    pub new_state: StockLevels,
    pub change_reason: String,
    pub stock_by_status: StatusBuckets,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockStatusChanged {
    pub sku: Sku,
    pub quantity: i64,
    pub from_status: StockStatus,
    pub to_status: StockStatus,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InventoryHoldPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryHoldPlaced {
    pub sku: Sku,
    pub hold_id: HoldId,
    #[serde(rename = "type")]
    pub hold_type: HoldType,
    pub quantity: i64,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InventoryHoldReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryHoldReleased {
    pub sku: Sku,
    pub hold_id: HoldId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockValuationChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockValuationChanged {
    pub sku: Sku,
    pub previous_unit_cost_minor: Option<i64>,
    pub new_unit_cost_minor: i64,
    pub costing_method: CostingMethod,
    pub total_value_minor: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AbcClassificationChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbcClassificationChanged {
    pub sku: Sku,
    pub previous_class: Option<AbcClass>,
    pub new_class: AbcClass,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockLevelChanged(StockLevelChanged),
    StockStatusChanged(StockStatusChanged),
    InventoryHoldPlaced(InventoryHoldPlaced),
    InventoryHoldReleased(InventoryHoldReleased),
    StockValuationChanged(StockValuationChanged),
    AbcClassificationChanged(AbcClassificationChanged),
}

pub const LEVEL_CHANGED: &str = "inventory.stock.level_changed";
pub const STATUS_CHANGED: &str = "inventory.stock.status_changed";
pub const HOLD_PLACED: &str = "inventory.hold.placed";
pub const HOLD_RELEASED: &str = "inventory.hold.released";
pub const VALUATION_CHANGED: &str = "inventory.stock.valuation_changed";
pub const CLASSIFICATION_CHANGED: &str = "inventory.stock.abc_classification_changed";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockLevelChanged(_) => LEVEL_CHANGED,
            StockEvent::StockStatusChanged(_) => STATUS_CHANGED,
            StockEvent::InventoryHoldPlaced(_) => HOLD_PLACED,
            StockEvent::InventoryHoldReleased(_) => HOLD_RELEASED,
            StockEvent::StockValuationChanged(_) => VALUATION_CHANGED,
            StockEvent::AbcClassificationChanged(_) => CLASSIFICATION_CHANGED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockLevelChanged(e) => e.occurred_at,
            StockEvent::StockStatusChanged(e) => e.occurred_at,
            StockEvent::InventoryHoldPlaced(e) => e.occurred_at,
            StockEvent::InventoryHoldReleased(e) => e.occurred_at,
            StockEvent::StockValuationChanged(e) => e.occurred_at,
            StockEvent::AbcClassificationChanged(e) => e.occurred_at,
        }
    }
}

impl StockEvent {
    pub fn sku(&self) -> &Sku {
        match self {
            StockEvent::StockLevelChanged(e) => &e.sku,
            StockEvent::StockStatusChanged(e) => &e.sku,
            StockEvent::InventoryHoldPlaced(e) => &e.sku,
            StockEvent::InventoryHoldReleased(e) => &e.sku,
            StockEvent::StockValuationChanged(e) => &e.sku,
            StockEvent::AbcClassificationChanged(e) => &e.sku,
        }
    }

    /// The bare payload (without the variant tag) as written to the stream and outbox.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StockEvent::StockLevelChanged(e) => serde_json::to_value(e),
            StockEvent::StockStatusChanged(e) => serde_json::to_value(e),
            StockEvent::InventoryHoldPlaced(e) => serde_json::to_value(e),
            StockEvent::InventoryHoldReleased(e) => serde_json::to_value(e),
            StockEvent::StockValuationChanged(e) => serde_json::to_value(e),
            StockEvent::AbcClassificationChanged(e) => serde_json::to_value(e),
        }
    }

    /// Rebuild an event from its stored type name and payload.
    pub fn decode(event_type: &str, payload: serde_json::Value) -> Result<Self, DecodeError> {
        fn parse<T: serde::de::DeserializeOwned>(
            event_type: &str,
            payload: serde_json::Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(payload).map_err(|source| DecodeError::Payload {
                event_type: event_type.to_string(),
                source,
            })
        }

        Ok(match event_type {
            LEVEL_CHANGED => StockEvent::StockLevelChanged(parse(event_type, payload)?),
            STATUS_CHANGED => StockEvent::StockStatusChanged(parse(event_type, payload)?),
            HOLD_PLACED => StockEvent::InventoryHoldPlaced(parse(event_type, payload)?),
            HOLD_RELEASED => StockEvent::InventoryHoldReleased(parse(event_type, payload)?),
            VALUATION_CHANGED => StockEvent::StockValuationChanged(parse(event_type, payload)?),
            CLASSIFICATION_CHANGED => {
                StockEvent::AbcClassificationChanged(parse(event_type, payload)?)
            }
            other => return Err(DecodeError::UnknownType(other.to_string())),
        })
    }

    /// Fold this event onto a replay builder.
    pub fn apply_to(&self, builder: &mut SnapshotBuilder) {
        let state = builder.state_mut();
        match self {
            StockEvent::StockLevelChanged(e) => {
                state.stock_by_status = e.stock_by_status.clone();
                state.quantity_allocated = e.new_state.allocated;
            }
            StockEvent::StockStatusChanged(e) => {
                // Saturates; the level change that follows restores exact buckets.
                let buckets = &mut state.stock_by_status;
                let from = buckets.get(e.from_status).saturating_sub(e.quantity);
                let to = buckets.get(e.to_status).saturating_add(e.quantity);
                buckets.set(e.from_status, from);
                buckets.set(e.to_status, to);
            }
            StockEvent::InventoryHoldPlaced(e) => {
                state.insert_hold(Hold {
                    id: e.hold_id,
                    hold_type: e.hold_type,
                    quantity: e.quantity,
                    reason: e.reason.clone(),
                    placed_at: e.occurred_at,
                    expires_at: e.expires_at,
                });
            }
            StockEvent::InventoryHoldReleased(e) => {
                state.remove_hold(e.hold_id);
            }
            StockEvent::StockValuationChanged(e) => {
                state.valuation.unit_cost_minor = Some(e.new_unit_cost_minor);
                state.valuation.costing_method = e.costing_method;
            }
            StockEvent::AbcClassificationChanged(e) => {
                state.abc_class = Some(e.new_class);
            }
        }
    }
}
