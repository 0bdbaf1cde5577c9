//! Boundaries to services this core does not own: catalog, orders, addresses.

pub mod in_memory;

use async_trait::async_trait;
use thiserror::Error;

use stockwise_core::{AddressId, ItemId, OrderId, UserId};
use stockwise_sales::{CatalogItem, CompensationLog, NewOrder, OrderLine, ShippingAddress};

pub use in_memory::{InMemoryAddressBook, InMemoryCatalog, InMemoryOrderBook, StoredOrder};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CatalogCollaborator: Send + Sync {
    /// Items that exist among `ids`; unknown ids are simply absent.
    async fn get_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<CatalogItem>, CollaboratorError>;

    async fn update_price(&self, item_id: ItemId, unit_price: u64) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait OrderCollaborator: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> Result<OrderId, CollaboratorError>;

    async fn create_order_line(&self, line: OrderLine) -> Result<(), CollaboratorError>;

    /// Hand a partially reserved order over for external compensation.
    async fn flag_for_compensation(
        &self,
        order_id: OrderId,
        log: &CompensationLog,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait AddressCollaborator: Send + Sync {
    /// Address `address_id`, only if it belongs to `user_id`.
    async fn get_address_by_id(
        &self,
        address_id: AddressId,
        user_id: UserId,
    ) -> Result<ShippingAddress, CollaboratorError>;

    async fn get_default_address(&self, user_id: UserId) -> Result<ShippingAddress, CollaboratorError>;
}
