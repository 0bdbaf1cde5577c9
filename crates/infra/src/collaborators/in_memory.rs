use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use stockwise_core::{AddressId, ItemId, OrderId, UserId};
use stockwise_sales::{CatalogItem, CompensationLog, NewOrder, OrderLine, ShippingAddress};

use super::{AddressCollaborator, CatalogCollaborator, CollaboratorError, OrderCollaborator};

// Each critical section is a single map insert or field update, so a
// poisoned guard still guards consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory catalog. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<ItemId, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: CatalogItem) {
        write(&self.items).insert(item.id, item);
    }

    pub fn with_item(self, item: CatalogItem) -> Self {
        self.insert(item);
        self
    }
}

#[async_trait]
impl CatalogCollaborator for InMemoryCatalog {
    async fn get_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<CatalogItem>, CollaboratorError> {
        let items = read(&self.items);
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn update_price(&self, item_id: ItemId, unit_price: u64) -> Result<(), CollaboratorError> {
        let mut items = write(&self.items);
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("item {item_id}")))?;
        item.unit_price = unit_price;
        Ok(())
    }
}

/// An order as held by `InMemoryOrderBook`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOrder {
    pub order: NewOrder,
    pub lines: Vec<OrderLine>,
    pub flagged: Option<CompensationLog>,
}

/// In-memory order store. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderBook {
    orders: RwLock<HashMap<OrderId, StoredOrder>>,
}

impl InMemoryOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, order_id: OrderId) -> Option<StoredOrder> {
        read(&self.orders).get(&order_id).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.orders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderCollaborator for InMemoryOrderBook {
    async fn create_order(&self, order: NewOrder) -> Result<OrderId, CollaboratorError> {
        let order_id = OrderId::new();
        let mut orders = write(&self.orders);
        orders.insert(
            order_id,
            StoredOrder {
                order,
                lines: Vec::new(),
                flagged: None,
            },
        );
        Ok(order_id)
    }

    async fn create_order_line(&self, line: OrderLine) -> Result<(), CollaboratorError> {
        let mut orders = write(&self.orders);
        let stored = orders
            .get_mut(&line.order_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("order {}", line.order_id)))?;
        stored.lines.push(line);
        Ok(())
    }

    async fn flag_for_compensation(
        &self,
        order_id: OrderId,
        log: &CompensationLog,
    ) -> Result<(), CollaboratorError> {
        let mut orders = write(&self.orders);
        let stored = orders
            .get_mut(&order_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("order {order_id}")))?;
        stored.flagged = Some(log.clone());
        Ok(())
    }
}

/// In-memory address book. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    addresses: RwLock<HashMap<AddressId, ShippingAddress>>,
    defaults: RwLock<HashMap<UserId, AddressId>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an address; the first one stored for a user becomes the default.
    pub fn insert(&self, address: ShippingAddress) {
        write(&self.defaults).entry(address.user_id).or_insert(address.id);
        write(&self.addresses).insert(address.id, address);
    }

    pub fn set_default(&self, user_id: UserId, address_id: AddressId) {
        write(&self.defaults).insert(user_id, address_id);
    }
}

#[async_trait]
impl AddressCollaborator for InMemoryAddressBook {
    async fn get_address_by_id(
        &self,
        address_id: AddressId,
        user_id: UserId,
    ) -> Result<ShippingAddress, CollaboratorError> {
        let addresses = read(&self.addresses);
        addresses
            .get(&address_id)
            .filter(|a| a.user_id == user_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("address {address_id}")))
    }

    async fn get_default_address(&self, user_id: UserId) -> Result<ShippingAddress, CollaboratorError> {
        let address_id = {
            let defaults = read(&self.defaults);
            defaults.get(&user_id).copied()
        }
        .ok_or_else(|| CollaboratorError::NotFound(format!("default address for user {user_id}")))?;

        self.get_address_by_id(address_id, user_id).await
    }
}
