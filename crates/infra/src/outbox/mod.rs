//! Transactional outbox: publisher and transports.
//!
//! Outbox rows are written by [`StockStore::commit`](crate::store::StockStore::commit)
//! together with the mutation that produced them. This module moves them out:
//! at-least-once, in order per SKU, no ordering across SKUs.

pub mod publisher;
#[cfg(feature = "redis")]
pub mod redis_streams;
pub mod transport;

pub use publisher::{OutboxPublishJob, OutboxPublisher, PublishReport};
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTransport;
pub use transport::{BusTransport, EventTransport, TransportError};
