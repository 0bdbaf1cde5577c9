//! Read model over the movement ledger: stock is always derived, never stored.

use std::collections::HashMap;

use tracing::instrument;

use stockwise_core::ItemId;
use stockwise_inventory::{StockMovement, fold_stock};

use crate::ledger::{ExclusiveItemScope, LedgerError, MovementLedger};

/// Default number of movements returned by `stock_history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Derives stock levels from the ledger.
///
/// Unlocked reads are advisory: by the time the caller acts on them another
/// writer may have moved stock. Decisions that must hold use
/// `current_stock_locked` inside an exclusive item scope.
#[derive(Debug, Clone)]
pub struct StockAggregator<L> {
    ledger: L,
}

impl<L> StockAggregator<L>
where
    L: MovementLedger,
{
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// `Σ IN − Σ OUT` for one item; 0 when it has no movements.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn current_stock(&self, item_id: ItemId) -> Result<i64, LedgerError> {
        let levels = self.ledger.stock_levels(&[item_id]).await?;
        Ok(levels.get(&item_id).copied().unwrap_or(0))
    }

    /// Stock for every requested item, in a single ledger round trip.
    ///
    /// Every requested id is present in the result (0 when unstocked).
    #[instrument(skip(self, item_ids), fields(item_count = item_ids.len()), err)]
    pub async fn current_stock_batch(
        &self,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, i64>, LedgerError> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut unique = item_ids.to_vec();
        unique.sort();
        unique.dedup();

        let levels = self.ledger.stock_levels(&unique).await?;
        Ok(unique
            .into_iter()
            .map(|id| (id, levels.get(&id).copied().unwrap_or(0)))
            .collect())
    }

    /// Newest-first movements for an item, truncated to `limit`.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn stock_history(
        &self,
        item_id: ItemId,
        limit: usize,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let mut history = self.ledger.query_by_item(item_id).await?;
        history.truncate(limit);
        Ok(history)
    }

    /// Fold the full movement history in process.
    ///
    /// Must always agree with `current_stock`; a mismatch means the storage
    /// fold and the domain fold disagree.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub async fn rederive_stock(&self, item_id: ItemId) -> Result<i64, LedgerError> {
        let history = self.ledger.query_by_item(item_id).await?;
        fold_stock(&history).map_err(|e| LedgerError::Storage(format!("stock for item {item_id}: {e}")))
    }
}

/// Stock for the scope's item, read under its exclusive lock.
///
/// Includes movements appended earlier in the same scope.
pub async fn current_stock_locked(
    scope: &mut Box<dyn ExclusiveItemScope>,
) -> Result<i64, LedgerError> {
    scope.current_stock().await
}
