//! Redis Streams transport.
//!
//! - **Stream Key**: `stockledger:events` (single stream for all SKUs)
//! - **Partition key**: the `sku` field on every entry; consumers that need per-SKU
//!   order shard on it
//! - **Idempotency**: `event_id` and `sequence_number` fields let consumers drop
//!   redeliveries

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::instrument;

use stockledger_events::EventEnvelope;

use super::transport::{EventTransport, TransportError};

const DEFAULT_STREAM_KEY: &str = "stockledger:events";

#[derive(Debug, Clone)]
pub struct RedisStreamsTransport {
    client: Arc<redis::Client>,
    stream_key: String,
}

impl RedisStreamsTransport {
    /// `redis_url` e.g. `redis://localhost:6379`.
    pub fn new(redis_url: impl AsRef<str>, stream_key: Option<String>) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }
}

impl EventTransport for RedisStreamsTransport {
    #[instrument(
        skip(self, envelope),
        fields(
            stream_key = %self.stream_key,
            sku = %envelope.sku(),
            event_type = %envelope.event_type()
        ),
        err
    )]
    fn deliver(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), TransportError> {
        let payload = serde_json::to_string(envelope.payload())
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("sku")
            .arg(envelope.sku().as_str())
            .arg("event_id")
            .arg(envelope.event_id().to_string())
            .arg("event_type")
            .arg(envelope.event_type())
            .arg("sequence_number")
            .arg(envelope.sequence_number().to_string())
            .arg("occurred_at")
            .arg(envelope.occurred_at().to_rfc3339())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| TransportError::Unavailable(format!("XADD failed: {e}")))?;

        Ok(())
    }
}
