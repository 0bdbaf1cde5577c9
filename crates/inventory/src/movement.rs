use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockwise_core::{DomainError, DomainResult, ItemId, MovementId, OrderId, Quantity};

/// Direction of a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Persisted representation (`IN` / `OUT`).
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    /// Signed contribution of `quantity` units moving in this direction.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            Direction::In => quantity,
            Direction::Out => -quantity,
        }
    }
}

impl core::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Direction::In),
            "OUT" => Ok(Direction::Out),
            other => Err(DomainError::validation(format!("unknown movement direction '{other}'"))),
        }
    }
}

/// Business event a movement is linked to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferenceType {
    Order,
    Restock,
    Adjustment,
    Return,
}

impl ReferenceType {
    /// Persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceType::Order => "ORDER",
            ReferenceType::Restock => "RESTOCK",
            ReferenceType::Adjustment => "ADJUSTMENT",
            ReferenceType::Return => "RETURN",
        }
    }

    /// Whether an IN movement may carry this reference type.
    ///
    /// `ORDER` is reserved for reservations produced by the reservation protocol.
    pub fn is_inbound(self) -> bool {
        !matches!(self, ReferenceType::Order)
    }
}

impl core::str::FromStr for ReferenceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER" => Ok(ReferenceType::Order),
            "RESTOCK" => Ok(ReferenceType::Restock),
            "ADJUSTMENT" => Ok(ReferenceType::Adjustment),
            "RETURN" => Ok(ReferenceType::Return),
            other => Err(DomainError::validation(format!("unknown reference type '{other}'"))),
        }
    }
}

/// Link from a movement to the business event that caused it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
}

impl MovementReference {
    pub fn order(order_id: OrderId) -> Self {
        Self {
            reference_type: ReferenceType::Order,
            reference_id: Some(order_id.into()),
        }
    }
}

/// A movement ready to be appended (not yet assigned an id or timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub item_id: ItemId,
    pub direction: Direction,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<MovementReference>,
}

impl NewMovement {
    /// OUT movement produced by the reservation protocol for an order.
    pub fn reservation(item_id: ItemId, quantity: Quantity, order_id: OrderId) -> Self {
        Self {
            item_id,
            direction: Direction::Out,
            quantity: quantity.get(),
            reason: "reserved for order".to_string(),
            reference: Some(MovementReference::order(order_id)),
        }
    }

    /// IN movement returning stock to an item.
    pub fn inbound(
        item_id: ItemId,
        quantity: Quantity,
        reason: impl Into<String>,
        reference: Option<MovementReference>,
    ) -> Self {
        Self {
            item_id,
            direction: Direction::In,
            quantity: quantity.get(),
            reason: reason.into(),
            reference,
        }
    }

    /// Validate shape before any write.
    pub fn validate(&self) -> DomainResult<()> {
        Quantity::new(self.quantity)?;
        if self.reason.trim().is_empty() {
            return Err(DomainError::validation("movement reason cannot be empty"));
        }
        if let Some(reference) = &self.reference {
            match self.direction {
                Direction::Out if reference.reference_type != ReferenceType::Order => {
                    return Err(DomainError::validation(format!(
                        "OUT movements must reference an order (got {})",
                        reference.reference_type.as_str()
                    )));
                }
                Direction::In if !reference.reference_type.is_inbound() => {
                    return Err(DomainError::validation(
                        "IN movements cannot reference an order",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Attach ledger-assigned fields.
    pub fn into_stored(self, id: MovementId, created_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            item_id: self.item_id,
            direction: self.direction,
            quantity: self.quantity,
            reason: self.reason,
            reference: self.reference,
            created_at,
        }
    }
}

/// An immutable, committed stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub item_id: ItemId,
    pub direction: Direction,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<MovementReference>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn signed_quantity(&self) -> i64 {
        self.direction.signed(self.quantity)
    }

    pub fn reference_type(&self) -> Option<ReferenceType> {
        self.reference.map(|r| r.reference_type)
    }

    pub fn reference_id(&self) -> Option<Uuid> {
        self.reference.and_then(|r| r.reference_id)
    }

    pub fn matches_reference(&self, reference_type: ReferenceType, reference_id: Uuid) -> bool {
        self.reference_type() == Some(reference_type) && self.reference_id() == Some(reference_id)
    }
}

/// `stock` after one more signed movement; fails instead of wrapping.
pub fn add_to_stock(stock: i64, signed_quantity: i64) -> DomainResult<i64> {
    stock
        .checked_add(signed_quantity)
        .ok_or_else(|| DomainError::invariant("stock level would overflow i64"))
}

/// Fold movements into a stock level: `Σ IN − Σ OUT`.
///
/// Movements for other items must be filtered out by the caller.
pub fn fold_stock<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> DomainResult<i64> {
    movements
        .into_iter()
        .try_fold(0_i64, |stock, m| add_to_stock(stock, m.signed_quantity()))
}

/// Newest first: creation time descending, ties broken by id descending.
pub fn sort_newest_first(movements: &mut [StockMovement]) {
    movements.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Quantity reserved under `order_id` for one item that has not been released yet.
///
/// Reservations are OUT movements referencing the order; releases are IN
/// movements tagged `ADJUSTMENT` with the same order id.
pub fn outstanding_for_order<'a>(
    movements: impl IntoIterator<Item = &'a StockMovement>,
    order_id: OrderId,
) -> i64 {
    let order_uuid: Uuid = order_id.into();
    let outstanding: i128 = movements
        .into_iter()
        .map(|m| match m.direction {
            Direction::Out if m.matches_reference(ReferenceType::Order, order_uuid) => i128::from(m.quantity),
            Direction::In if m.matches_reference(ReferenceType::Adjustment, order_uuid) => -i128::from(m.quantity),
            _ => 0,
        })
        .sum();
    i64::try_from(outstanding.max(0)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stored(item: ItemId, id: u64, direction: Direction, quantity: i64) -> StockMovement {
        NewMovement {
            item_id: item,
            direction,
            quantity,
            reason: "test".to_string(),
            reference: None,
        }
        .into_stored(MovementId::new(id), Utc::now())
    }

    #[test]
    fn empty_history_folds_to_zero() {
        assert_eq!(fold_stock(&[]), Ok(0));
    }

    #[test]
    fn fold_reports_overflow_instead_of_wrapping() {
        let item = ItemId::new();
        let history = vec![
            stored(item, 1, Direction::In, i64::MAX),
            stored(item, 2, Direction::In, 1),
        ];
        assert!(matches!(fold_stock(&history), Err(DomainError::InvariantViolation(_))));

        let balanced = vec![
            stored(item, 1, Direction::In, i64::MAX),
            stored(item, 2, Direction::Out, i64::MAX),
            stored(item, 3, Direction::In, 1),
        ];
        assert_eq!(fold_stock(&balanced), Ok(1));
        assert!(add_to_stock(i64::MAX, 1).is_err());
        assert_eq!(add_to_stock(5, -2), Ok(3));
    }

    #[test]
    fn validate_rejects_non_positive_quantity() {
        let m = NewMovement {
            item_id: ItemId::new(),
            direction: Direction::In,
            quantity: 0,
            reason: "restock".to_string(),
            reference: None,
        };
        assert!(matches!(m.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_rejects_blank_reason() {
        let m = NewMovement::inbound(ItemId::new(), Quantity::new(1).unwrap(), "  ", None);
        assert!(matches!(m.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_rejects_mismatched_reference_direction() {
        let mut m = NewMovement::reservation(ItemId::new(), Quantity::new(2).unwrap(), OrderId::new());
        m.direction = Direction::In;
        assert!(m.validate().is_err());

        let restock_out = NewMovement {
            item_id: ItemId::new(),
            direction: Direction::Out,
            quantity: 1,
            reason: "shrinkage".to_string(),
            reference: Some(MovementReference {
                reference_type: ReferenceType::Restock,
                reference_id: None,
            }),
        };
        assert!(restock_out.validate().is_err());
    }

    #[test]
    fn reservation_references_order() {
        let order = OrderId::new();
        let m = NewMovement::reservation(ItemId::new(), Quantity::new(3).unwrap(), order);
        assert!(m.validate().is_ok());
        let s = m.into_stored(MovementId::new(1), Utc::now());
        assert!(s.matches_reference(ReferenceType::Order, order.into()));
        assert_eq!(s.signed_quantity(), -3);
    }

    #[test]
    fn persisted_names_match_wire_format() {
        assert_eq!(serde_json::to_value(Direction::Out).unwrap(), serde_json::json!("OUT"));
        assert_eq!(
            serde_json::to_value(ReferenceType::Adjustment).unwrap(),
            serde_json::json!("ADJUSTMENT")
        );
        for rt in [
            ReferenceType::Order,
            ReferenceType::Restock,
            ReferenceType::Adjustment,
            ReferenceType::Return,
        ] {
            assert_eq!(rt.as_str().parse::<ReferenceType>().unwrap(), rt);
        }
        assert!("SIDEWAYS".parse::<Direction>().is_err());
    }

    #[test]
    fn newest_first_breaks_ties_by_id() {
        let item = ItemId::new();
        let at = Utc::now();
        let mut ms: Vec<_> = (1..=3)
            .map(|i| stored(item, i, Direction::In, 1))
            .map(|mut m| {
                m.created_at = at;
                m
            })
            .collect();
        sort_newest_first(&mut ms);
        let ids: Vec<u64> = ms.iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn outstanding_nets_releases_against_reservations() {
        let item = ItemId::new();
        let order = OrderId::new();
        let other = OrderId::new();
        let q = |n| Quantity::new(n).unwrap();
        let release = |n| {
            NewMovement::inbound(
                item,
                q(n),
                "release",
                Some(MovementReference {
                    reference_type: ReferenceType::Adjustment,
                    reference_id: Some(order.into()),
                }),
            )
        };
        let ms = vec![
            NewMovement::reservation(item, q(5), order).into_stored(MovementId::new(1), Utc::now()),
            NewMovement::reservation(item, q(2), other).into_stored(MovementId::new(2), Utc::now()),
            release(3).into_stored(MovementId::new(3), Utc::now()),
        ];
        assert_eq!(outstanding_for_order(&ms, order), 2);
        assert_eq!(outstanding_for_order(&ms, other), 2);
        assert_eq!(outstanding_for_order(&ms, OrderId::new()), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the fold equals Σ IN − Σ OUT regardless of order.
        #[test]
        fn fold_equals_inbound_minus_outbound(
            moves in prop::collection::vec((any::<bool>(), 1i64..10_000i64), 0..64)
        ) {
            let item = ItemId::new();
            let mut history: Vec<StockMovement> = moves
                .iter()
                .enumerate()
                .map(|(i, (inbound, qty))| {
                    let dir = if *inbound { Direction::In } else { Direction::Out };
                    stored(item, i as u64 + 1, dir, *qty)
                })
                .collect();

            let expected_in: i64 = moves.iter().filter(|(i, _)| *i).map(|(_, q)| q).sum();
            let expected_out: i64 = moves.iter().filter(|(i, _)| !*i).map(|(_, q)| q).sum();

            prop_assert_eq!(fold_stock(&history), Ok(expected_in - expected_out));

            history.reverse();
            prop_assert_eq!(fold_stock(&history), Ok(expected_in - expected_out));
        }
    }
}
