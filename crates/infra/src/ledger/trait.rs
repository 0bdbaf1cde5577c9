use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use stockwise_core::{DomainError, ItemId};
use stockwise_inventory::{Direction, NewMovement, ReferenceType, StockMovement};

/// Errors surfaced by a movement ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The movement failed validation before any write happened.
    #[error("invalid movement: {0}")]
    Validation(String),

    /// The item's exclusive scope could not be acquired in time.
    #[error("timed out after {timeout_ms}ms waiting for exclusive access to item {item_id}")]
    LockTimeout { item_id: ItemId, timeout_ms: u64 },

    /// A write inside an exclusive scope targeted a different item.
    #[error("scope for item {scope_item} cannot write movements for item {item_id}")]
    ScopeMismatch { scope_item: ItemId, item_id: ItemId },

    /// Serialization failure or deadlock; safe to retry the whole unit of work.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether re-running the unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockTimeout { .. } | LedgerError::Transient(_))
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

/// Append-only store of stock movements.
///
/// Movements are never updated or deleted. Stock for an item is always
/// derived by folding its movements (`Σ IN − Σ OUT`).
#[async_trait]
pub trait MovementLedger: Send + Sync {
    /// Append a single IN movement outside any exclusive scope.
    ///
    /// OUT movements are rejected with `LedgerError::Validation`; they can
    /// only be written through `begin_exclusive`, where the stock check and
    /// the write are atomic.
    async fn append(&self, movement: NewMovement) -> Result<StockMovement, LedgerError>;

    /// All committed movements for an item, newest first.
    async fn query_by_item(&self, item_id: ItemId) -> Result<Vec<StockMovement>, LedgerError>;

    /// All committed movements carrying the given reference.
    async fn query_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError>;

    /// Derived stock for each requested item that has at least one movement.
    ///
    /// Items without movements are absent from the map.
    async fn stock_levels(&self, item_ids: &[ItemId]) -> Result<HashMap<ItemId, i64>, LedgerError>;

    /// Open a unit of work holding exclusive access to one item.
    ///
    /// Competing scopes for the same item block until this one commits or
    /// rolls back, or fail with `LedgerError::LockTimeout`.
    async fn begin_exclusive(
        &self,
        item_id: ItemId,
    ) -> Result<Box<dyn ExclusiveItemScope>, LedgerError>;
}

/// A unit of work holding exclusive access to a single item.
///
/// Reads observe committed movements plus anything appended through this
/// scope. Nothing appended here is visible to other readers until `commit`.
/// Dropping the scope without committing discards its writes.
#[async_trait]
pub trait ExclusiveItemScope: Send {
    fn item_id(&self) -> ItemId;

    async fn current_stock(&mut self) -> Result<i64, LedgerError>;

    /// Movements of this item carrying the given reference.
    async fn movements_for_reference(
        &mut self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError>;

    async fn append(&mut self, movement: NewMovement) -> Result<StockMovement, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

#[async_trait]
impl<L> MovementLedger for Arc<L>
where
    L: MovementLedger + ?Sized,
{
    async fn append(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        (**self).append(movement).await
    }

    async fn query_by_item(&self, item_id: ItemId) -> Result<Vec<StockMovement>, LedgerError> {
        (**self).query_by_item(item_id).await
    }

    async fn query_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        (**self).query_by_reference(reference_type, reference_id).await
    }

    async fn stock_levels(&self, item_ids: &[ItemId]) -> Result<HashMap<ItemId, i64>, LedgerError> {
        (**self).stock_levels(item_ids).await
    }

    async fn begin_exclusive(
        &self,
        item_id: ItemId,
    ) -> Result<Box<dyn ExclusiveItemScope>, LedgerError> {
        (**self).begin_exclusive(item_id).await
    }
}

/// Reject writes that target an item other than the scope's own.
pub(crate) fn ensure_scope_item(scope_item: ItemId, movement: &NewMovement) -> Result<(), LedgerError> {
    if movement.item_id != scope_item {
        return Err(LedgerError::ScopeMismatch {
            scope_item,
            item_id: movement.item_id,
        });
    }
    Ok(())
}

/// Reject OUT movements on the unscoped append path.
pub(crate) fn ensure_unscoped_inbound(movement: &NewMovement) -> Result<(), LedgerError> {
    if movement.direction == Direction::Out {
        return Err(LedgerError::Validation(format!(
            "OUT movement for item {} must be appended inside an exclusive item scope",
            movement.item_id
        )));
    }
    Ok(())
}

/// Resulting stock must stay representable.
pub(crate) fn stock_after(
    item_id: ItemId,
    stock: i64,
    movement: &StockMovement,
) -> Result<i64, LedgerError> {
    stockwise_inventory::add_to_stock(stock, movement.signed_quantity())
        .map_err(|_| LedgerError::Validation(format!("stock for item {item_id} would overflow i64")))
}
