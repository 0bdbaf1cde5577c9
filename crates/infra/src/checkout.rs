//! Checkout orchestrator.
//!
//! Drives a `CheckoutRun` through the flow:
//! 1. Validate the cart
//! 2. Price it and check stock (advisory, unlocked)
//! 3. Resolve the address and create a pending order
//! 4. Reserve every line through the reservation engine, in cart order
//! 5. Record one order line per reserved line at the frozen price
//!
//! Once any reservation has committed, a failure can no longer be undone by
//! simply returning an error: the run's compensation log is handed to the
//! order collaborator and, with `CompensationPolicy::ReleaseReserved`, the
//! reserved stock is released inline.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use stockwise_core::{AddressId, CheckoutId, DomainError, ItemId, OrderId, UserId};
use stockwise_sales::{
    Cart, CheckoutRun, CheckoutStage, CheckoutState, CompensationLog, NewOrder, OrderLine,
    OrderStatus, PricedLine, ReservedLine, price_cart,
};

use crate::collaborators::{
    AddressCollaborator, CatalogCollaborator, CollaboratorError, OrderCollaborator,
};
use crate::ledger::{LedgerError, MovementLedger};
use crate::reservation::{ReservationEngine, ReservationError};
use crate::stock::StockAggregator;

/// What to do with stock already reserved when a later step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    /// Keep the stock reserved and flag the order for external compensation.
    #[default]
    LeaveReserved,
    /// Release the order's reservations inline, then flag the order.
    ReleaseReserved,
}

impl FromStr for CompensationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leave" | "leave_reserved" => Ok(CompensationPolicy::LeaveReserved),
            "release" | "release_reserved" => Ok(CompensationPolicy::ReleaseReserved),
            other => Err(format!("unknown compensation policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// The authenticated caller.
    pub user_id: UserId,
    pub cart: Cart,
    /// Explicit shipping address; the user's default when absent.
    pub address_id: Option<AddressId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub checkout_id: CheckoutId,
    pub order_id: OrderId,
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid cart: {0}")]
    InvalidCart(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not enough stock for {item_name} ({item_id}): requested {requested}, available {available}")]
    InsufficientStock {
        item_id: ItemId,
        item_name: String,
        requested: i64,
        available: i64,
    },

    #[error("timed out after {timeout_ms}ms waiting for exclusive access to item {item_id}")]
    LockTimeout { item_id: ItemId, timeout_ms: u64 },

    #[error("collaborator failure: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Ledger(LedgerError),

    /// Some lines were reserved before a later step failed.
    #[error(
        "checkout {checkout_id} for order {order_id} failed at {stage:?} after reserving {} line(s)",
        .reserved.entries.len()
    )]
    PartialCheckout {
        checkout_id: CheckoutId,
        order_id: OrderId,
        stage: CheckoutStage,
        failed_line: Option<usize>,
        failed_item: Option<ItemId>,
        reserved: CompensationLog,
        /// Whether the reserved stock was released inline.
        compensated: bool,
        source: Box<CheckoutError>,
    },

    #[error("checkout state machine violated: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Whether submitting the same checkout again may succeed.
    ///
    /// A partial checkout is never retryable as-is: it created an order.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckoutError::LockTimeout { .. } => true,
            CheckoutError::Ledger(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error, looking through `PartialCheckout`.
    pub fn root_cause(&self) -> &CheckoutError {
        match self {
            CheckoutError::PartialCheckout { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<DomainError> for CheckoutError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => CheckoutError::InvalidCart(msg),
            DomainError::NotFound(what) => CheckoutError::NotFound(what),
            other => CheckoutError::Internal(other.to_string()),
        }
    }
}

impl From<CollaboratorError> for CheckoutError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::NotFound(what) => CheckoutError::NotFound(what),
            CollaboratorError::Unavailable(msg) => CheckoutError::Collaborator(msg),
        }
    }
}

impl From<LedgerError> for CheckoutError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::LockTimeout {
                item_id,
                timeout_ms,
            } => CheckoutError::LockTimeout {
                item_id,
                timeout_ms,
            },
            LedgerError::Validation(msg) => CheckoutError::InvalidCart(msg),
            other => CheckoutError::Ledger(other),
        }
    }
}

/// Attach the catalog name to a failed reservation.
fn reservation_failure(err: ReservationError, line: &PricedLine) -> CheckoutError {
    match err {
        ReservationError::InsufficientStock(short) => CheckoutError::InsufficientStock {
            item_id: short.item_id,
            item_name: line.name.clone(),
            requested: short.requested,
            available: short.available,
        },
        ReservationError::Ledger(err) => err.into(),
    }
}

pub struct CheckoutOrchestrator<L> {
    stock: StockAggregator<L>,
    reservations: ReservationEngine<L>,
    catalog: Arc<dyn CatalogCollaborator>,
    orders: Arc<dyn OrderCollaborator>,
    addresses: Arc<dyn AddressCollaborator>,
    policy: CompensationPolicy,
}

impl<L> CheckoutOrchestrator<L>
where
    L: MovementLedger,
{
    pub fn new(
        stock: StockAggregator<L>,
        reservations: ReservationEngine<L>,
        catalog: Arc<dyn CatalogCollaborator>,
        orders: Arc<dyn OrderCollaborator>,
        addresses: Arc<dyn AddressCollaborator>,
    ) -> Self {
        Self {
            stock,
            reservations,
            catalog,
            orders,
            addresses,
            policy: CompensationPolicy::default(),
        }
    }

    pub fn with_compensation_policy(mut self, policy: CompensationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn compensation_policy(&self) -> CompensationPolicy {
        self.policy
    }

    /// Run one checkout to completion or failure.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, lines = request.cart.lines.len()), err)]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError> {
        let mut run = CheckoutRun::new(CheckoutId::new());

        let err = match self.drive(&mut run, &request).await {
            Ok(receipt) => {
                info!(
                    checkout_id = %receipt.checkout_id,
                    order_id = %receipt.order_id,
                    total = receipt.total,
                    "checkout completed"
                );
                return Ok(receipt);
            }
            Err(err) => err,
        };

        let stage = run.state().stage();
        // Still `Reserving` after the last line committed means line recording failed.
        let failed_line = match run.state() {
            CheckoutState::Reserving { line, .. }
                if !run
                    .compensation_log()
                    .entries
                    .iter()
                    .any(|e| e.line_index == *line) =>
            {
                Some(*line)
            }
            _ => None,
        };
        if let Err(transition_err) = run.fail(err.to_string()) {
            warn!(checkout_id = %run.id(), error = %transition_err, "could not mark checkout failed");
        }

        let log = run.compensation_log().clone();
        let order_id = match log.order_id {
            Some(order_id) if !log.is_empty() => order_id,
            _ => {
                warn!(checkout_id = %run.id(), ?stage, error = %err, "checkout failed");
                return Err(err);
            }
        };

        let failed_item = failed_line.and_then(|idx| request.cart.lines.get(idx).map(|l| l.item_id));
        warn!(
            checkout_id = %run.id(),
            order_id = %order_id,
            ?stage,
            ?failed_line,
            reserved_lines = log.entries.len(),
            error = %err,
            "partial checkout; reserved stock requires compensation"
        );
        let compensated = self.compensate(order_id, &log).await;

        Err(CheckoutError::PartialCheckout {
            checkout_id: run.id(),
            order_id,
            stage,
            failed_line,
            failed_item,
            reserved: log,
            compensated,
            source: Box::new(err),
        })
    }

    async fn drive(
        &self,
        run: &mut CheckoutRun,
        request: &CheckoutRequest,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let cart = request.cart.validate()?;
        let item_ids = cart.item_ids();

        let catalog = self.catalog.get_items_by_ids(&item_ids).await?;
        let priced = price_cart(&cart, &catalog)?;

        // Advisory: the authoritative check happens per line under the item lock.
        let levels = self.stock.current_stock_batch(&item_ids).await?;
        for line in &priced.lines {
            let available = levels.get(&line.item_id).copied().unwrap_or(0);
            if available < line.quantity.get() {
                return Err(CheckoutError::InsufficientStock {
                    item_id: line.item_id,
                    item_name: line.name.clone(),
                    requested: line.quantity.get(),
                    available,
                });
            }
        }
        run.priced(priced.total)?;
        info!(checkout_id = %run.id(), total = priced.total, "cart priced and stock checked");

        let address = match request.address_id {
            Some(address_id) => {
                self.addresses
                    .get_address_by_id(address_id, request.user_id)
                    .await?
            }
            None => self.addresses.get_default_address(request.user_id).await?,
        };
        let order_id = self
            .orders
            .create_order(NewOrder {
                user_id: request.user_id,
                total: priced.total,
                status: OrderStatus::Pending,
                address: address.formatted(),
            })
            .await?;
        run.order_created(order_id)?;
        info!(checkout_id = %run.id(), order_id = %order_id, "order created");

        for line in &priced.lines {
            run.reserving(line.line_index)?;
            let movement = self
                .reservations
                .reserve(line.item_id, line.quantity.get(), order_id)
                .await
                .map_err(|e| reservation_failure(e, line))?;
            run.line_reserved(ReservedLine {
                line_index: line.line_index,
                item_id: line.item_id,
                quantity: line.quantity,
                movement_id: movement.id,
            })?;
        }

        for line in &priced.lines {
            self.orders
                .create_order_line(OrderLine::from_priced(order_id, line))
                .await?;
        }
        run.line_items_recorded()?;
        run.done()?;

        Ok(CheckoutReceipt {
            checkout_id: run.id(),
            order_id,
            total: priced.total,
        })
    }

    /// Apply the compensation policy; returns whether stock was released.
    async fn compensate(&self, order_id: OrderId, log: &CompensationLog) -> bool {
        let compensated = match self.policy {
            CompensationPolicy::LeaveReserved => false,
            CompensationPolicy::ReleaseReserved => {
                match self
                    .reservations
                    .release_order(order_id, "checkout compensation")
                    .await
                {
                    Ok(released) => {
                        info!(order_id = %order_id, released = released.len(), "reserved stock released");
                        true
                    }
                    Err(err) => {
                        error!(order_id = %order_id, error = %err, "inline compensation failed");
                        false
                    }
                }
            }
        };

        if let Err(err) = self.orders.flag_for_compensation(order_id, log).await {
            error!(order_id = %order_id, error = %err, "failed to flag order for compensation");
        }
        compensated
    }
}
