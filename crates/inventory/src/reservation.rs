//! Pure reservation decision: no IO, no locking.
//!
//! Callers must evaluate this against a stock level read under the item's
//! exclusive scope; evaluated against an unlocked read it is advisory only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockwise_core::{ItemId, Quantity};

/// Available stock is lower than the requested quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("insufficient stock for item {item_id}: available {available}, requested {requested}")]
pub struct InsufficientStock {
    pub item_id: ItemId,
    pub available: i64,
    pub requested: i64,
}

/// Decide whether `requested` units can be taken from `available`.
pub fn check_availability(
    item_id: ItemId,
    available: i64,
    requested: Quantity,
) -> Result<(), InsufficientStock> {
    if available < requested.get() {
        return Err(InsufficientStock {
            item_id,
            available,
            requested: requested.get(),
        });
    }
    Ok(())
}
