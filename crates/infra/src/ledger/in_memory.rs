use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use stockwise_core::{ItemId, MovementId};
use stockwise_inventory::{NewMovement, ReferenceType, StockMovement, fold_stock, sort_newest_first};

use super::r#trait::{
    ExclusiveItemScope, LedgerError, MovementLedger, ensure_scope_item, ensure_unscoped_inbound,
    stock_after,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

// Every critical section below is a single insert, extend or remove, so a
// panic while a lock is held cannot leave partial state behind; poisoned
// guards are recovered rather than reported.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory append-only movement ledger.
///
/// Intended for tests/dev. Exclusive scopes are backed by one async mutex
/// per item, so two scopes on different items never contend.
#[derive(Debug)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    movements: RwLock<Vec<StockMovement>>,
    next_id: AtomicU64,
    locks: ItemLockTable,
    lock_timeout: Duration,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long `begin_exclusive` waits before failing with `LockTimeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lock_timeout,
                ..Inner::default()
            }),
        }
    }

    /// Total number of committed movements (all items).
    pub fn len(&self) -> usize {
        read(&self.inner.movements).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn folded(item_id: ItemId, movements: &[StockMovement]) -> Result<i64, LedgerError> {
    fold_stock(movements.iter().filter(|m| m.item_id == item_id))
        .map_err(|e| LedgerError::Storage(format!("stock for item {item_id}: {e}")))
}

impl Inner {
    fn stage(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        movement.validate()?;
        let id = MovementId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(movement.into_stored(id, Utc::now()))
    }

    /// Publish staged movements atomically, refusing any that would push an
    /// item's stock out of range.
    fn commit(&self, staged: Vec<StockMovement>) -> Result<(), LedgerError> {
        if staged.is_empty() {
            return Ok(());
        }
        let mut movements = write(&self.movements);

        let mut totals: HashMap<ItemId, i64> = HashMap::new();
        for m in &staged {
            let stock = match totals.get(&m.item_id) {
                Some(stock) => *stock,
                None => folded(m.item_id, &movements)?,
            };
            totals.insert(m.item_id, stock_after(m.item_id, stock, m)?);
        }

        movements.extend(staged);
        Ok(())
    }

    fn committed_stock(&self, item_id: ItemId) -> Result<i64, LedgerError> {
        folded(item_id, &read(&self.movements))
    }
}

#[async_trait]
impl MovementLedger for InMemoryLedger {
    async fn append(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        ensure_unscoped_inbound(&movement)?;
        let stored = self.inner.stage(movement)?;
        self.inner.commit(vec![stored.clone()])?;
        Ok(stored)
    }

    async fn query_by_item(&self, item_id: ItemId) -> Result<Vec<StockMovement>, LedgerError> {
        let mut found: Vec<StockMovement> = read(&self.inner.movements)
            .iter()
            .filter(|m| m.item_id == item_id)
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        Ok(found)
    }

    async fn query_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        Ok(read(&self.inner.movements)
            .iter()
            .filter(|m| m.matches_reference(reference_type, reference_id))
            .cloned()
            .collect())
    }

    async fn stock_levels(&self, item_ids: &[ItemId]) -> Result<HashMap<ItemId, i64>, LedgerError> {
        let movements = read(&self.inner.movements);
        let mut levels = HashMap::new();
        for m in movements.iter().filter(|m| item_ids.contains(&m.item_id)) {
            let level = levels.entry(m.item_id).or_insert(0_i64);
            *level = stock_after(m.item_id, *level, m)
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }
        Ok(levels)
    }

    async fn begin_exclusive(
        &self,
        item_id: ItemId,
    ) -> Result<Box<dyn ExclusiveItemScope>, LedgerError> {
        let guard = self.inner.locks.acquire(item_id, self.inner.lock_timeout).await?;
        Ok(Box::new(InMemoryScope {
            item_id,
            inner: Arc::clone(&self.inner),
            staged: Vec::new(),
            _guard: guard,
        }))
    }
}

type LockMap = HashMap<ItemId, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per item, created on first use and evicted once nobody
/// holds or waits for it.
#[derive(Debug, Default)]
struct ItemLockTable {
    locks: Arc<Mutex<LockMap>>,
}

impl ItemLockTable {
    async fn acquire(&self, item_id: ItemId, timeout: Duration) -> Result<ItemLockGuard, LedgerError> {
        let mutex = Arc::clone(lock(&self.locks).entry(item_id).or_default());

        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| LedgerError::LockTimeout {
                item_id,
                timeout_ms: timeout.as_millis() as u64,
            })?;

        Ok(ItemLockGuard {
            item_id,
            table: Arc::clone(&self.locks),
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    fn tracked_items(&self) -> usize {
        lock(&self.locks).len()
    }
}

/// Exclusive hold on one item; releases the mutex and evicts idle entries on drop.
#[derive(Debug)]
struct ItemLockGuard {
    item_id: ItemId,
    table: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ItemLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock(&self.table);
        // Only the table's own reference left: no holder, no waiter.
        if locks
            .get(&self.item_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.item_id);
        }
    }
}

struct InMemoryScope {
    item_id: ItemId,
    inner: Arc<Inner>,
    staged: Vec<StockMovement>,
    _guard: ItemLockGuard,
}

#[async_trait]
impl ExclusiveItemScope for InMemoryScope {
    fn item_id(&self) -> ItemId {
        self.item_id
    }

    async fn current_stock(&mut self) -> Result<i64, LedgerError> {
        let committed = self.inner.committed_stock(self.item_id)?;
        self.staged.iter().try_fold(committed, |stock, m| {
            stock_after(self.item_id, stock, m).map_err(|e| LedgerError::Storage(e.to_string()))
        })
    }

    async fn movements_for_reference(
        &mut self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let item_id = self.item_id;
        let mut found: Vec<StockMovement> = read(&self.inner.movements)
            .iter()
            .filter(|m| m.item_id == item_id && m.matches_reference(reference_type, reference_id))
            .cloned()
            .collect();
        found.extend(
            self.staged
                .iter()
                .filter(|m| m.matches_reference(reference_type, reference_id))
                .cloned(),
        );
        Ok(found)
    }

    async fn append(&mut self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        ensure_scope_item(self.item_id, &movement)?;
        let stored = self.inner.stage(movement)?;
        let stock = self.current_stock().await?;
        stock_after(self.item_id, stock, &stored)?;
        self.staged.push(stored.clone());
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryScope {
            inner,
            staged,
            _guard: guard,
            ..
        } = *self;
        // Publish while still holding the item lock.
        inner.commit(staged)?;
        drop(guard);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
