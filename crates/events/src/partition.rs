use stockledger_core::Sku;

use crate::EventEnvelope;

/// Messages that belong to one SKU partition.
///
/// Transports route on this key so that messages for the same SKU stay ordered
/// relative to each other. No ordering is promised across keys.
pub trait PartitionKeyed {
    fn partition_key(&self) -> &Sku;
}

impl<E> PartitionKeyed for EventEnvelope<E> {
    fn partition_key(&self) -> &Sku {
        self.sku()
    }
}
