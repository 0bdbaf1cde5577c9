//! Inventory domain module (append-only movement ledger model).
//!
//! This crate contains business rules for stock movements, implemented purely as
//! deterministic domain logic (no IO, no locking, no storage).

pub mod movement;
pub mod reservation;

pub use movement::{
    Direction, MovementReference, NewMovement, ReferenceType, StockMovement, add_to_stock,
    fold_stock,
    outstanding_for_order, sort_newest_first,
};
pub use reservation::{InsufficientStock, check_availability};
