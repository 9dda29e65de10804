//! Consumed integration messages.
//!
//! Order-management messages map one-to-one onto stock commands; the order id
//! travels into the ledger as the source reference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{AggregateRoot, OperatorId, Sku};
use stockledger_events::Command;
use stockledger_inventory::StockCommand;

use crate::mutation::{MutationContext, MutationError, MutationOutcome, MutationService};
use crate::store::StockStore;

/// An order wants `quantity` of `sku` reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequested {
    pub sku: Sku,
    pub quantity: i64,
    pub order_id: String,
}

/// Reserved stock physically left the shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPicked {
    pub sku: Sku,
    pub quantity: i64,
    pub order_id: String,
}

/// An order was cancelled upstream; its reservation is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCancellation {
    pub sku: Sku,
    pub quantity: i64,
    pub order_id: String,
}

impl Command for AllocationRequested {
    fn target_sku(&self) -> &Sku {
        &self.sku
    }
}

impl Command for ItemPicked {
    fn target_sku(&self) -> &Sku {
        &self.sku
    }
}

impl Command for ExternalCancellation {
    fn target_sku(&self) -> &Sku {
        &self.sku
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    AllocationRequested(AllocationRequested),
    ItemPicked(ItemPicked),
    ExternalCancellation(ExternalCancellation),
}

impl InboundMessage {
    pub fn sku(&self) -> &Sku {
        match self {
            InboundMessage::AllocationRequested(m) => m.target_sku(),
            InboundMessage::ItemPicked(m) => m.target_sku(),
            InboundMessage::ExternalCancellation(m) => m.target_sku(),
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            InboundMessage::AllocationRequested(m) => &m.order_id,
            InboundMessage::ItemPicked(m) => &m.order_id,
            InboundMessage::ExternalCancellation(m) => &m.order_id,
        }
    }

    pub fn to_command(&self) -> StockCommand {
        match self {
            InboundMessage::AllocationRequested(m) => StockCommand::Allocate { quantity: m.quantity },
            InboundMessage::ItemPicked(m) => StockCommand::ProcessPick { quantity: m.quantity },
            InboundMessage::ExternalCancellation(m) => StockCommand::Deallocate { quantity: m.quantity },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("malformed inbound message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Applies inbound messages through the mutation service.
#[derive(Debug)]
pub struct InboundHandler<S> {
    service: Arc<MutationService<S>>,
    operator: OperatorId,
}

impl<S: StockStore> InboundHandler<S> {
    pub fn new(service: Arc<MutationService<S>>) -> Self {
        Self {
            service,
            operator: OperatorId::new("order-management"),
        }
    }

    pub fn with_operator(mut self, operator: OperatorId) -> Self {
        self.operator = operator;
        self
    }

    #[instrument(skip(self, message), fields(sku = %message.sku(), order_id = %message.order_id()))]
    pub fn handle(&self, message: &InboundMessage) -> Result<MutationOutcome, MutationError> {
        let ctx = MutationContext::new(self.operator.clone()).with_source_reference(message.order_id());
        let outcome = self.service.execute(message.sku(), &message.to_command(), &ctx)?;
        info!(
            version = outcome.record.version(),
            atp = outcome.change.current.atp,
            "inbound message applied"
        );
        Ok(outcome)
    }

    /// Decode a JSON message (`{"type": "AllocationRequested", ...}`) and apply it.
    pub fn handle_json(&self, raw: &str) -> Result<MutationOutcome, InboundError> {
        let message: InboundMessage = serde_json::from_str(raw)?;
        Ok(self.handle(&message)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStockStore, LedgerStore};
    use stockledger_core::DomainError;
    use stockledger_inventory::ChangeType;

    fn handler() -> (Arc<InMemoryStockStore>, InboundHandler<Arc<InMemoryStockStore>>) {
        let store = Arc::new(InMemoryStockStore::new());
        let service = Arc::new(MutationService::new(store.clone()));
        service
            .create(&Sku::parse("SKU-1").unwrap(), 20, &MutationContext::system())
            .unwrap();
        (store, InboundHandler::new(service))
    }

    #[test]
    fn allocation_pick_and_cancellation_flow() {
        let (store, handler) = handler();
        let sku = Sku::parse("SKU-1").unwrap();

        handler
            .handle_json(r#"{"type":"AllocationRequested","sku":"SKU-1","quantity":8,"orderId":"SO-9"}"#)
            .unwrap();
        handler
            .handle_json(r#"{"type":"ItemPicked","sku":"SKU-1","quantity":5,"orderId":"SO-9"}"#)
            .unwrap();
        let outcome = handler
            .handle_json(r#"{"type":"ExternalCancellation","sku":"SKU-1","quantity":3,"orderId":"SO-9"}"#)
            .unwrap();

        assert_eq!(outcome.record.version(), 4);
        assert_eq!(outcome.record.quantity_on_hand(), 15);
        assert_eq!(outcome.record.quantity_allocated(), 0);
        assert_eq!(outcome.record.atp(), 15);

        let entries = store.entries(&sku, None, None).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.change_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::Created, ChangeType::Allocation, ChangeType::Pick, ChangeType::Deallocation]
        );
        assert!(entries[1..].iter().all(|e| e.source_reference.as_deref() == Some("SO-9")));
    }

    #[test]
    fn cancellation_beyond_allocation_is_rejected() {
        let (_, handler) = handler();
        let message = InboundMessage::ExternalCancellation(ExternalCancellation {
            sku: Sku::parse("SKU-1").unwrap(),
            quantity: 1,
            order_id: "SO-1".into(),
        });

        let err = handler.handle(&message).unwrap_err();
        assert!(matches!(err, MutationError::Domain(DomainError::InvalidQuantity(_))));
    }

    #[test]
    fn malformed_json_is_reported() {
        let (_, handler) = handler();
        let err = handler.handle_json(r#"{"type":"ItemPicked","sku":""}"#).unwrap_err();
        assert!(matches!(err, InboundError::Malformed(_)));
    }
}
