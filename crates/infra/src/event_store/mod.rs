//! Per-SKU append-only event stream.
//!
//! Stream events are written by [`StockStore::commit`](crate::store::StockStore::commit)
//! in the same atomic unit as the record, ledger entry and outbox rows. This module
//! only defines the row types and the read side used by replay.
//!
//! Sequence numbers are per SKU, start at 1 and have no gaps. Unlike outbox rows,
//! stream rows are never purged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockledger_core::{EventId, Sku};
use stockledger_events::{Event, EventEnvelope};
use stockledger_inventory::{DecodeError, SequencedEvent, StockEvent};

use crate::store::StoreError;

/// An event ready to be appended (no sequence number yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub sku: Sku,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed(event: &StockEvent) -> Result<Self, StoreError> {
        let payload = event
            .payload()
            .map_err(|e| StoreError::Serialization(format!("event payload: {e}")))?;

        Ok(Self {
            event_id: EventId::new(),
            sku: event.sku().clone(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }

    pub fn into_stored(self, sequence_number: u64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            sku: self.sku,
            sequence_number,
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: self.occurred_at,
            payload: self.payload,
        }
    }
}

/// A persisted stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub sku: Sku,
    /// Position in the SKU's stream.
    pub sequence_number: u64,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn decode(&self) -> Result<SequencedEvent, DecodeError> {
        Ok(SequencedEvent {
            sequence_number: self.sequence_number,
            event: StockEvent::decode(&self.event_type, self.payload.clone())?,
        })
    }

    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.sku.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Read side of the stream.
pub trait EventStore: Send + Sync {
    /// Full stream in sequence order. Empty for an unknown SKU.
    fn load_stream(&self, sku: &Sku) -> Result<Vec<StoredEvent>, StoreError>;

    /// Events with `sequence_number > after_sequence` and `occurred_at <= until`,
    /// ordered by `(occurred_at, sequence_number)`. Pass `0` for no lower bound.
    fn load_window(
        &self,
        sku: &Sku,
        after_sequence: u64,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn load_stream(&self, sku: &Sku) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).load_stream(sku)
    }

    fn load_window(
        &self,
        sku: &Sku,
        after_sequence: u64,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).load_window(sku, after_sequence, until)
    }
}
