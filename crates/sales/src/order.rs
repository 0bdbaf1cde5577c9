use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockwise_core::{AddressId, DomainError, DomainResult, ItemId, OrderId, Quantity, UserId};

use crate::cart::ValidatedCart;

/// Order status lifecycle (owned by the order collaborator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Catalog view of a sellable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub name: String,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

/// Shipping address as returned by the address collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub id: AddressId,
    pub user_id: UserId,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl ShippingAddress {
    /// Single-line form stored on the order record.
    pub fn formatted(&self) -> String {
        let mut parts = vec![self.recipient.as_str(), self.line1.as_str()];
        if let Some(line2) = self.line2.as_deref().filter(|l| !l.trim().is_empty()) {
            parts.push(line2);
        }
        parts.push(self.city.as_str());
        parts.push(self.postal_code.as_str());
        parts.push(self.country.as_str());
        parts.join(", ")
    }
}

/// One priced cart line; the unit price is frozen at pricing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub line_index: usize,
    pub item_id: ItemId,
    pub name: String,
    pub quantity: Quantity,
    pub unit_price: u64,
}

/// Cart priced against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub total: u64,
}

/// Price every line from the catalog snapshot: total = Σ(unit_price × quantity).
pub fn price_cart(cart: &ValidatedCart, catalog: &[CatalogItem]) -> DomainResult<PricedCart> {
    let by_id: HashMap<ItemId, &CatalogItem> = catalog.iter().map(|c| (c.id, c)).collect();

    let mut total: u64 = 0;
    let mut lines = Vec::with_capacity(cart.lines().len());
    for (line_index, line) in cart.lines().iter().enumerate() {
        let item = by_id
            .get(&line.item_id)
            .ok_or_else(|| DomainError::not_found(format!("item {}", line.item_id)))?;

        let line_total = item
            .unit_price
            .checked_mul(line.quantity.get() as u64)
            .and_then(|t| total.checked_add(t))
            .ok_or_else(|| DomainError::validation("order total overflows"))?;
        total = line_total;

        lines.push(PricedLine {
            line_index,
            item_id: line.item_id,
            name: item.name.clone(),
            quantity: line.quantity,
            unit_price: item.unit_price,
        });
    }

    Ok(PricedCart { lines, total })
}

/// Order record to be created by the order collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub total: u64,
    pub status: OrderStatus,
    pub address: String,
}

/// Order line binding an order to an item at the purchase-time price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_price: u64,
}

impl OrderLine {
    pub fn from_priced(order_id: OrderId, line: &PricedLine) -> Self {
        Self {
            order_id,
            item_id: line.item_id,
            quantity: line.quantity.get(),
            unit_price: line.unit_price,
        }
    }
}
