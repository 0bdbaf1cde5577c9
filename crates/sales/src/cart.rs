use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stockwise_core::{DomainError, DomainResult, ItemId, Quantity};

/// One requested line as submitted by the caller (unvalidated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: ItemId,
    pub quantity: i64,
}

/// A cart submitted for checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
}

/// A cart line that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedLine {
    pub item_id: ItemId,
    pub quantity: Quantity,
}

/// Non-empty cart with positive quantities and one line per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCart {
    lines: Vec<ValidatedLine>,
}

impl Cart {
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    pub fn with_line(mut self, item_id: ItemId, quantity: i64) -> Self {
        self.lines.push(CartLine { item_id, quantity });
        self
    }

    pub fn validate(&self) -> DomainResult<ValidatedCart> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("cart is empty"));
        }

        let mut seen = HashSet::with_capacity(self.lines.len());
        let mut lines = Vec::with_capacity(self.lines.len());
        for (idx, line) in self.lines.iter().enumerate() {
            let quantity = Quantity::new(line.quantity).map_err(|_| {
                DomainError::validation(format!(
                    "invalid quantity for line {idx}: {}",
                    line.quantity
                ))
            })?;
            if !seen.insert(line.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} appears on more than one line (line {idx})",
                    line.item_id
                )));
            }
            lines.push(ValidatedLine {
                item_id: line.item_id,
                quantity,
            });
        }

        Ok(ValidatedCart { lines })
    }
}

impl ValidatedCart {
    pub fn lines(&self) -> &[ValidatedLine] {
        &self.lines
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.lines.iter().map(|l| l.item_id).collect()
    }
}
