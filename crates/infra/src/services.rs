//! Wiring: build the inventory components over one shared ledger.

use std::sync::Arc;

use sqlx::PgPool;

use crate::checkout::CheckoutOrchestrator;
use crate::collaborators::{AddressCollaborator, CatalogCollaborator, OrderCollaborator};
use crate::config::InventoryConfig;
use crate::ledger::{InMemoryLedger, LedgerError, MovementLedger, PostgresLedger};
use crate::replenishment::ReplenishmentWriter;
use crate::reservation::ReservationEngine;
use crate::stock::StockAggregator;

/// Aggregator, reservation engine and replenishment writer sharing a ledger.
#[derive(Debug, Clone)]
pub struct InventoryServices<L> {
    pub ledger: L,
    pub stock: StockAggregator<L>,
    pub reservations: ReservationEngine<L>,
    pub replenishment: ReplenishmentWriter<L>,
    config: InventoryConfig,
}

impl<L> InventoryServices<L>
where
    L: MovementLedger + Clone,
{
    pub fn new(ledger: L, config: InventoryConfig) -> Self {
        Self {
            stock: StockAggregator::new(ledger.clone()),
            reservations: ReservationEngine::new(ledger.clone(), config.reserve_retry.clone()),
            replenishment: ReplenishmentWriter::new(ledger.clone()),
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Checkout orchestrator over these services, using the configured
    /// compensation policy.
    pub fn checkout(
        &self,
        catalog: Arc<dyn CatalogCollaborator>,
        orders: Arc<dyn OrderCollaborator>,
        addresses: Arc<dyn AddressCollaborator>,
    ) -> CheckoutOrchestrator<L> {
        CheckoutOrchestrator::new(
            self.stock.clone(),
            self.reservations.clone(),
            catalog,
            orders,
            addresses,
        )
        .with_compensation_policy(self.config.compensation)
    }
}

impl InventoryServices<Arc<InMemoryLedger>> {
    pub fn in_memory(config: InventoryConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::with_lock_timeout(config.lock_timeout));
        Self::new(ledger, config)
    }
}

impl InventoryServices<Arc<PostgresLedger>> {
    /// Connect to `database_url` and make sure the ledger schema exists.
    pub async fn postgres(database_url: &str, config: InventoryConfig) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| LedgerError::Storage(format!("failed to connect to Postgres: {e}")))?;
        let ledger = PostgresLedger::new(pool, config.lock_timeout);
        ledger.ensure_schema().await?;
        Ok(Self::new(Arc::new(ledger), config))
    }
}
