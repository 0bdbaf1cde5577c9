//! Checkout state machine (mechanics only, no IO).
//!
//! ```text
//! Validating → PricedAndStockChecked → OrderCreated → Reserving(0..n) → LineItemsRecorded → Done
//!      └──────────────┴───────────────────┴─────────────┴─────────────────────┴──→ Failed
//! ```
//!
//! The orchestrator in infra drives a `CheckoutRun` through these states and
//! records every committed reservation in the run's `CompensationLog`, so a
//! failed run always knows exactly which stock it still holds.

use serde::{Deserialize, Serialize};

use stockwise_core::{CheckoutId, DomainError, DomainResult, ItemId, MovementId, OrderId, Quantity};

/// Coarse stage of a checkout run (state without payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStage {
    Validating,
    PricedAndStockChecked,
    OrderCreated,
    Reserving,
    LineItemsRecorded,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckoutState {
    #[default]
    Validating,
    PricedAndStockChecked {
        total: u64,
    },
    OrderCreated {
        order_id: OrderId,
        total: u64,
    },
    /// Reserving the line at `line` (0-based, cart order).
    Reserving {
        order_id: OrderId,
        total: u64,
        line: usize,
    },
    LineItemsRecorded {
        order_id: OrderId,
        total: u64,
    },
    Done {
        order_id: OrderId,
        total: u64,
    },
    Failed {
        stage: CheckoutStage,
        reason: String,
    },
}

impl CheckoutState {
    pub fn stage(&self) -> CheckoutStage {
        match self {
            CheckoutState::Validating => CheckoutStage::Validating,
            CheckoutState::PricedAndStockChecked { .. } => CheckoutStage::PricedAndStockChecked,
            CheckoutState::OrderCreated { .. } => CheckoutStage::OrderCreated,
            CheckoutState::Reserving { .. } => CheckoutStage::Reserving,
            CheckoutState::LineItemsRecorded { .. } => CheckoutStage::LineItemsRecorded,
            CheckoutState::Done { .. } => CheckoutStage::Done,
            CheckoutState::Failed { .. } => CheckoutStage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Done { .. } | CheckoutState::Failed { .. })
    }

    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            CheckoutState::OrderCreated { order_id, .. }
            | CheckoutState::Reserving { order_id, .. }
            | CheckoutState::LineItemsRecorded { order_id, .. }
            | CheckoutState::Done { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }
}

/// A reservation committed on behalf of one checkout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedLine {
    pub line_index: usize,
    pub item_id: ItemId,
    pub quantity: Quantity,
    pub movement_id: MovementId,
}

/// Reservations a checkout run has committed, in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationLog {
    pub checkout_id: CheckoutId,
    pub order_id: Option<OrderId>,
    pub entries: Vec<ReservedLine>,
}

impl CompensationLog {
    pub fn new(checkout_id: CheckoutId) -> Self {
        Self {
            checkout_id,
            order_id: None,
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Units held per item across all entries.
    pub fn units_for(&self, item_id: ItemId) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.item_id == item_id)
            .map(|e| e.quantity.get())
            .sum()
    }
}

/// One checkout run: current state, visited stages and compensation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRun {
    id: CheckoutId,
    state: CheckoutState,
    history: Vec<CheckoutStage>,
    log: CompensationLog,
}

impl CheckoutRun {
    pub fn new(id: CheckoutId) -> Self {
        Self {
            id,
            state: CheckoutState::Validating,
            history: vec![CheckoutStage::Validating],
            log: CompensationLog::new(id),
        }
    }

    pub fn id(&self) -> CheckoutId {
        self.id
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    pub fn history(&self) -> &[CheckoutStage] {
        &self.history
    }

    pub fn compensation_log(&self) -> &CompensationLog {
        &self.log
    }

    pub fn priced(&mut self, total: u64) -> DomainResult<()> {
        self.transition(CheckoutState::PricedAndStockChecked { total })
    }

    pub fn order_created(&mut self, order_id: OrderId) -> DomainResult<()> {
        let total = match self.state {
            CheckoutState::PricedAndStockChecked { total } => total,
            _ => return Err(self.illegal(CheckoutStage::OrderCreated)),
        };
        self.transition(CheckoutState::OrderCreated { order_id, total })?;
        self.log.order_id = Some(order_id);
        Ok(())
    }

    /// Start reserving the line at `line`.
    pub fn reserving(&mut self, line: usize) -> DomainResult<()> {
        let (order_id, total) = match self.state {
            CheckoutState::OrderCreated { order_id, total } => (order_id, total),
            CheckoutState::Reserving { order_id, total, .. } => (order_id, total),
            _ => return Err(self.illegal(CheckoutStage::Reserving)),
        };
        self.transition(CheckoutState::Reserving {
            order_id,
            total,
            line,
        })
    }

    /// Record the reservation for the line currently being reserved.
    pub fn line_reserved(&mut self, entry: ReservedLine) -> DomainResult<()> {
        match self.state {
            CheckoutState::Reserving { line, .. } if line == entry.line_index => {
                self.log.entries.push(entry);
                Ok(())
            }
            _ => Err(DomainError::invariant(format!(
                "line {} reserved outside its reserving state ({:?})",
                entry.line_index,
                self.state.stage()
            ))),
        }
    }

    pub fn line_items_recorded(&mut self) -> DomainResult<()> {
        let (order_id, total) = match self.state {
            CheckoutState::Reserving { order_id, total, .. } => (order_id, total),
            _ => return Err(self.illegal(CheckoutStage::LineItemsRecorded)),
        };
        self.transition(CheckoutState::LineItemsRecorded { order_id, total })
    }

    pub fn done(&mut self) -> DomainResult<()> {
        let (order_id, total) = match self.state {
            CheckoutState::LineItemsRecorded { order_id, total } => (order_id, total),
            _ => return Err(self.illegal(CheckoutStage::Done)),
        };
        self.transition(CheckoutState::Done { order_id, total })
    }

    /// Error exit; allowed from any non-terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        let stage = self.state.stage();
        self.transition(CheckoutState::Failed {
            stage,
            reason: reason.into(),
        })
    }

    fn transition(&mut self, next: CheckoutState) -> DomainResult<()> {
        if !is_allowed(&self.state, &next) {
            return Err(self.illegal(next.stage()));
        }
        let stage = next.stage();
        self.state = next;
        if self.history.last() != Some(&stage) {
            self.history.push(stage);
        }
        Ok(())
    }

    fn illegal(&self, to: CheckoutStage) -> DomainError {
        DomainError::invariant(format!(
            "illegal checkout transition {:?} -> {:?}",
            self.state.stage(),
            to
        ))
    }
}

fn is_allowed(from: &CheckoutState, to: &CheckoutState) -> bool {
    use CheckoutState as S;

    if from.is_terminal() {
        return false;
    }
    match (from, to) {
        (_, S::Failed { .. }) => true,
        (S::Validating, S::PricedAndStockChecked { .. }) => true,
        (S::PricedAndStockChecked { .. }, S::OrderCreated { .. }) => true,
        (S::OrderCreated { .. }, S::Reserving { line: 0, .. }) => true,
        (S::Reserving { line: a, .. }, S::Reserving { line: b, .. }) => *b == *a + 1,
        (S::Reserving { .. }, S::LineItemsRecorded { .. }) => true,
        (S::LineItemsRecorded { .. }, S::Done { .. }) => true,
        _ => false,
    }
}
