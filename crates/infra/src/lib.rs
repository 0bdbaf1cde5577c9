//! `stockwise-infra` — storage, locking and orchestration for the inventory core.
//!
//! Domain rules live in `stockwise-inventory` and `stockwise-sales`; this
//! crate supplies the append-only movement ledger (in-memory and Postgres),
//! the per-item exclusive scope, and the services built on top of them.

pub mod checkout;
pub mod collaborators;
pub mod config;
pub mod ledger;
pub mod replenishment;
pub mod reservation;
pub mod retry;
pub mod services;
pub mod stock;

#[cfg(test)]
mod integration_tests;

pub use checkout::{
    CheckoutError, CheckoutOrchestrator, CheckoutReceipt, CheckoutRequest, CompensationPolicy,
};
pub use collaborators::{
    AddressCollaborator, CatalogCollaborator, CollaboratorError, InMemoryAddressBook,
    InMemoryCatalog, InMemoryOrderBook, OrderCollaborator,
};
pub use config::InventoryConfig;
pub use ledger::{
    ExclusiveItemScope, InMemoryLedger, LedgerError, MovementLedger, PostgresLedger,
    with_exclusive_item_lock,
};
pub use replenishment::ReplenishmentWriter;
pub use reservation::{ReservationEngine, ReservationError};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use services::InventoryServices;
pub use stock::{StockAggregator, current_stock_locked};
