//! Delivery targets for outbox events.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use stockledger_events::{EventBus, EventEnvelope, PartitionKeyed};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The target could not be reached; try again later.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The target refused this event.
    #[error("transport rejected event: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Somewhere an outbox event can be delivered, keyed by SKU.
///
/// `deliver` returning `Ok` is the acknowledgement: the publisher marks the event
/// published only after it. Delivery may be repeated for the same event.
pub trait EventTransport: Send + Sync {
    fn deliver(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), TransportError>;
}

impl<T> EventTransport for Arc<T>
where
    T: EventTransport + ?Sized,
{
    fn deliver(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), TransportError> {
        (**self).deliver(envelope)
    }
}

/// Delivers onto an in-process [`EventBus`].
#[derive(Debug)]
pub struct BusTransport<B> {
    bus: B,
}

impl<B> BusTransport<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> EventTransport for BusTransport<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn deliver(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), TransportError> {
        self.bus.publish(envelope.clone()).map_err(|e| {
            TransportError::Unavailable(format!("bus publish for {}: {e:?}", envelope.partition_key()))
        })
    }
}
