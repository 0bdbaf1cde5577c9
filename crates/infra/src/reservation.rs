//! Reservation protocol: the only path that writes OUT movements.
//!
//! Each reservation runs inside the item's exclusive scope, so the stock read
//! and the OUT append are atomic with respect to every other reserver of the
//! same item. Different items never contend.

use std::future::Future;

use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use stockwise_core::{DomainError, ItemId, OrderId, Quantity};
use stockwise_inventory::{
    InsufficientStock, MovementReference, NewMovement, ReferenceType, StockMovement,
    check_availability, outstanding_for_order,
};

use crate::ledger::{LedgerError, MovementLedger, with_exclusive_item_lock};
use crate::retry::RetryPolicy;
use crate::stock::current_stock_locked;

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ReservationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ReservationError::InsufficientStock(_) => false,
            ReservationError::Ledger(err) => err.is_retryable(),
        }
    }
}

impl From<DomainError> for ReservationError {
    fn from(err: DomainError) -> Self {
        ReservationError::Ledger(err.into())
    }
}

#[derive(Debug, Clone)]
pub struct ReservationEngine<L> {
    ledger: L,
    retry: RetryPolicy,
}

impl<L> ReservationEngine<L>
where
    L: MovementLedger,
{
    pub fn new(ledger: L, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Atomically check availability and append an OUT movement for `order_id`.
    ///
    /// Lock timeouts and transient storage failures are retried per the
    /// engine's `RetryPolicy`; insufficient stock is final.
    #[instrument(skip(self), fields(item_id = %item_id, order_id = %order_id), err)]
    pub async fn reserve(
        &self,
        item_id: ItemId,
        quantity: i64,
        order_id: OrderId,
    ) -> Result<StockMovement, ReservationError> {
        let quantity = Quantity::new(quantity)?;

        let movement = self
            .with_retry("reserve", item_id, || self.try_reserve(item_id, quantity, order_id))
            .await
            .inspect_err(|err| {
                if let ReservationError::InsufficientStock(short) = err {
                    warn!(
                        available = short.available,
                        requested = short.requested,
                        "insufficient stock"
                    );
                }
            })?;

        info!(movement_id = %movement.id, quantity = quantity.get(), "stock reserved");
        Ok(movement)
    }

    async fn try_reserve(
        &self,
        item_id: ItemId,
        quantity: Quantity,
        order_id: OrderId,
    ) -> Result<StockMovement, ReservationError> {
        with_exclusive_item_lock(&self.ledger, item_id, move |scope| {
            Box::pin(async move {
                let available = current_stock_locked(scope).await?;
                check_availability(item_id, available, quantity)?;
                let movement = scope
                    .append(NewMovement::reservation(item_id, quantity, order_id))
                    .await?;
                Ok::<_, ReservationError>(movement)
            })
        })
        .await
    }

    /// Return stock with an unreferenced IN movement.
    ///
    /// Never invoked automatically when a reservation or checkout fails.
    #[instrument(skip(self, reason), fields(item_id = %item_id), err)]
    pub async fn release(
        &self,
        item_id: ItemId,
        quantity: i64,
        reason: &str,
    ) -> Result<StockMovement, ReservationError> {
        let quantity = Quantity::new(quantity)?;
        let movement = self
            .ledger
            .append(NewMovement::inbound(item_id, quantity, reason, None))
            .await?;
        info!(movement_id = %movement.id, quantity = quantity.get(), "stock released");
        Ok(movement)
    }

    /// Release whatever is still reserved under `order_id`, item by item.
    ///
    /// Each release is tagged `ADJUSTMENT` with the order id and computed under
    /// the item's exclusive scope, so repeated or concurrent calls never
    /// release more than was reserved.
    #[instrument(skip(self, reason), fields(order_id = %order_id), err)]
    pub async fn release_order(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Vec<StockMovement>, ReservationError> {
        let order_uuid: Uuid = order_id.into();
        let reserved = self
            .ledger
            .query_by_reference(ReferenceType::Order, order_uuid)
            .await?;

        let mut items: Vec<ItemId> = reserved.iter().map(|m| m.item_id).collect();
        items.sort();
        items.dedup();

        let mut released = Vec::new();
        for item_id in items {
            let movement = self
                .with_retry("release_order", item_id, || {
                    self.try_release_for_order(item_id, order_id, reason)
                })
                .await?;
            if let Some(movement) = movement {
                info!(item_id = %item_id, quantity = movement.quantity, "order reservation released");
                released.push(movement);
            }
        }
        Ok(released)
    }

    async fn try_release_for_order(
        &self,
        item_id: ItemId,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Option<StockMovement>, ReservationError> {
        let order_uuid: Uuid = order_id.into();
        let reason = reason.to_string();

        with_exclusive_item_lock(&self.ledger, item_id, move |scope| {
            Box::pin(async move {
                let mut history = scope
                    .movements_for_reference(ReferenceType::Order, order_uuid)
                    .await?;
                history.extend(
                    scope
                        .movements_for_reference(ReferenceType::Adjustment, order_uuid)
                        .await?,
                );

                let outstanding = outstanding_for_order(&history, order_id);
                if outstanding == 0 {
                    return Ok(None);
                }

                let release = NewMovement::inbound(
                    item_id,
                    Quantity::new(outstanding)?,
                    reason,
                    Some(MovementReference {
                        reference_type: ReferenceType::Adjustment,
                        reference_id: Some(order_uuid),
                    }),
                );
                Ok::<_, ReservationError>(Some(scope.append(release).await?))
            })
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        item_id: ItemId,
        mut attempt_fn: F,
    ) -> Result<T, ReservationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_fn().await {
                Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        item_id = %item_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after contention"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(operation, item_id = %item_id, attempt, error = %err, "giving up after retries");
                    }
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}
