//! Inbound stock: restocks, customer returns and upward adjustments.
//!
//! Adding stock never needs the item lock; a concurrent reservation either
//! sees the new movement or it doesn't, and both outcomes are safe.

use tracing::{info, instrument};
use uuid::Uuid;

use stockwise_core::{DomainError, ItemId, OrderId, Quantity};
use stockwise_inventory::{MovementReference, NewMovement, ReferenceType, StockMovement};

use crate::ledger::{LedgerError, MovementLedger};

#[derive(Debug, Clone)]
pub struct ReplenishmentWriter<L> {
    ledger: L,
}

impl<L> ReplenishmentWriter<L>
where
    L: MovementLedger,
{
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    /// Append an IN movement tagged with `reference_type`.
    ///
    /// `ORDER` is reserved for reservations and is rejected here.
    #[instrument(
        skip(self, reason),
        fields(item_id = %item_id, reference_type = reference_type.as_str()),
        err
    )]
    pub async fn add_stock(
        &self,
        item_id: ItemId,
        quantity: i64,
        reason: &str,
        reference_type: ReferenceType,
        reference_id: Option<Uuid>,
    ) -> Result<StockMovement, LedgerError> {
        let quantity = Quantity::new(quantity)?;
        if !reference_type.is_inbound() {
            return Err(DomainError::validation(format!(
                "{} cannot tag an inbound movement",
                reference_type.as_str()
            ))
            .into());
        }

        let movement = self
            .ledger
            .append(NewMovement::inbound(
                item_id,
                quantity,
                reason,
                Some(MovementReference {
                    reference_type,
                    reference_id,
                }),
            ))
            .await?;

        info!(movement_id = %movement.id, quantity = quantity.get(), "stock added");
        Ok(movement)
    }

    pub async fn restock(
        &self,
        item_id: ItemId,
        quantity: i64,
        reason: &str,
    ) -> Result<StockMovement, LedgerError> {
        self.add_stock(item_id, quantity, reason, ReferenceType::Restock, None)
            .await
    }

    /// Customer return against a previously fulfilled order.
    pub async fn record_return(
        &self,
        item_id: ItemId,
        quantity: i64,
        order_id: OrderId,
        reason: &str,
    ) -> Result<StockMovement, LedgerError> {
        self.add_stock(
            item_id,
            quantity,
            reason,
            ReferenceType::Return,
            Some(order_id.into()),
        )
        .await
    }

    /// Upward correction, e.g. after a stock count.
    pub async fn adjust_up(
        &self,
        item_id: ItemId,
        quantity: i64,
        reason: &str,
    ) -> Result<StockMovement, LedgerError> {
        self.add_stock(item_id, quantity, reason, ReferenceType::Adjustment, None)
            .await
    }
}
