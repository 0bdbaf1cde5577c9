//! Append-only stock movement ledger.
//!
//! The ledger is the only source of truth for stock. This module defines the
//! storage-agnostic boundary plus the exclusive per-item unit of work used by
//! every stock-decreasing write.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

use std::future::Future;
use std::pin::Pin;

use stockwise_core::ItemId;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use r#trait::{ExclusiveItemScope, LedgerError, MovementLedger};

/// Boxed future borrowed from an exclusive scope for `'s`.
pub type ScopeFuture<'s, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 's>>;

/// Run `work` while holding exclusive access to `item_id`.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. The
/// scope is released on every path, including early returns inside `work`.
///
/// ```ignore
/// let movement = with_exclusive_item_lock(&ledger, item_id, |scope| {
///     Box::pin(async move {
///         let available = scope.current_stock().await?;
///         // decide, then write through the same scope
///         scope.append(movement).await
///     })
/// })
/// .await?;
/// ```
pub async fn with_exclusive_item_lock<L, T, E, F>(ledger: &L, item_id: ItemId, work: F) -> Result<T, E>
where
    L: MovementLedger + ?Sized,
    E: From<LedgerError>,
    F: for<'s> FnOnce(&'s mut Box<dyn ExclusiveItemScope>) -> ScopeFuture<'s, T, E>,
{
    let mut scope = ledger.begin_exclusive(item_id).await?;
    let outcome = work(&mut scope).await;

    match outcome {
        Ok(value) => {
            scope.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = scope.rollback().await {
                tracing::warn!(
                    item_id = %item_id,
                    error = %rollback_err,
                    "rollback of exclusive item scope failed"
                );
            }
            Err(err)
        }
    }
}
