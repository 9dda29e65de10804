use stockledger_core::Sku;

/// A command targets exactly one stock record.
///
/// Commands represent **intent** and are transient; accepted commands become
/// persisted events and ledger entries. Each command operates on one SKU, which is
/// the transaction boundary, so commands for different SKUs can run concurrently.
///
/// Commands must be `Clone + Send + Sync + 'static` because the mutation service
/// re-applies them when an optimistic concurrency conflict forces a reload.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_sku(&self) -> &Sku;
}
