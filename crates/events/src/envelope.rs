use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{EventId, Sku};

/// Envelope for an event handed to a transport.
///
/// Notes:
/// - `sku` is the **partition key**: transports must keep per-SKU order.
/// - `sequence_number` is the position of the event in the SKU's stream; consumers
///   use it (or `event_id`) to drop redeliveries.
/// - `occurred_at` serialises as ISO-8601.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<E> {
    event_id: EventId,
    sku: Sku,
    event_type: String,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        sku: Sku,
        event_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            sku,
            event_type: event_type.into(),
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serialises_with_iso_timestamp_and_camel_case() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let env = EventEnvelope::new(
            EventId::new(),
            Sku::parse("SKU-1").unwrap(),
            "inventory.stock.level_changed",
            7,
            at,
            serde_json::json!({"k": 1}),
        );

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["sku"], "SKU-1");
        assert_eq!(json["sequenceNumber"], 7);
        assert_eq!(json["occurredAt"], "2024-03-01T12:00:00Z");
    }
}
