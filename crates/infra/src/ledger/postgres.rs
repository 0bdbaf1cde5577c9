//! Postgres-backed movement ledger.
//!
//! Movements live in an append-only `stock_movements` table (a trigger rejects
//! UPDATE and DELETE). Exclusive item scopes are transactions holding a row
//! lock on `stock_item_locks`, bounded by a transaction-local `lock_timeout`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | LedgerError | Scenario |
//! |-----------------------|-------------|----------|
//! | `55P03` | `LockTimeout` | Another scope holds the item lock past `lock_timeout` |
//! | `40001`, `40P01` | `Transient` | Serialization failure or deadlock |
//! | `23514`, `P0001` | `Validation` | Check constraint or append-only trigger |
//! | (no row inserted) | `Validation` | The item's stock would overflow `BIGINT` |
//! | Other / pool errors | `Storage` | Connectivity and everything else |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockwise_core::{ItemId, MovementId};
use stockwise_inventory::{Direction, MovementReference, NewMovement, ReferenceType, StockMovement};

use super::r#trait::{
    ExclusiveItemScope, LedgerError, MovementLedger, ensure_scope_item, ensure_unscoped_inbound,
};

/// Idempotent DDL, applied statement by statement.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        id BIGSERIAL PRIMARY KEY,
        item_id UUID NOT NULL,
        direction TEXT NOT NULL CHECK (direction IN ('IN', 'OUT')),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        reason TEXT NOT NULL CHECK (length(btrim(reason)) > 0),
        reference_type TEXT CHECK (reference_type IN ('ORDER', 'RESTOCK', 'ADJUSTMENT', 'RETURN')),
        reference_id UUID,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stock_movements_item_created ON stock_movements (item_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_stock_movements_reference ON stock_movements (reference_type, reference_id)",
    r#"
    CREATE TABLE IF NOT EXISTS stock_item_locks (
        item_id UUID PRIMARY KEY,
        locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION stock_movements_append_only() RETURNS trigger AS $$
    BEGIN
        RAISE EXCEPTION 'stock_movements is append-only';
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS stock_movements_no_mutation ON stock_movements",
    r#"
    CREATE TRIGGER stock_movements_no_mutation
        BEFORE UPDATE OR DELETE ON stock_movements
        FOR EACH ROW EXECUTE FUNCTION stock_movements_append_only()
    "#,
];

/// Reverse of `SCHEMA`. Destroys the ledger history.
const DROP_SCHEMA: &[&str] = &[
    "DROP TRIGGER IF EXISTS stock_movements_no_mutation ON stock_movements",
    "DROP FUNCTION IF EXISTS stock_movements_append_only()",
    "DROP TABLE IF EXISTS stock_item_locks",
    "DROP TABLE IF EXISTS stock_movements",
];

const SELECT_MOVEMENT_COLUMNS: &str =
    "id, item_id, direction, quantity, reason, reference_type, reference_id, created_at";

/// Postgres-backed append-only movement ledger.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedger {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, indexes and the append-only trigger if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Drop everything `ensure_schema` created.
    #[instrument(skip(self), err)]
    pub async fn drop_schema(&self) -> Result<(), LedgerError> {
        for statement in DROP_SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("drop_schema", e))?;
        }
        Ok(())
    }

    /// Whether both ledger tables exist.
    pub async fn schema_present(&self) -> Result<bool, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT
                to_regclass('stock_movements') IS NOT NULL
                AND to_regclass('stock_item_locks') IS NOT NULL AS present
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("schema_present", e))?;

        row.try_get("present").map_err(decode_error)
    }
}

#[async_trait]
impl MovementLedger for PostgresLedger {
    #[instrument(
        skip(self, movement),
        fields(
            item_id = %movement.item_id,
            direction = movement.direction.as_str(),
            movement_id = tracing::field::Empty
        ),
        err
    )]
    async fn append(&self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        ensure_unscoped_inbound(&movement)?;
        movement.validate()?;
        let stored = insert_movement(&*self.pool, movement).await?;
        Span::current().record("movement_id", stored.id.get());
        Ok(stored)
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    async fn query_by_item(&self, item_id: ItemId) -> Result<Vec<StockMovement>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE item_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_by_item", e))?;

        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self), fields(reference_type = reference_type.as_str(), reference_id = %reference_id), err)]
    async fn query_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE reference_type = $1 AND reference_id = $2 ORDER BY id ASC"
        ))
        .bind(reference_type.as_str())
        .bind(reference_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_by_reference", e))?;

        rows.iter().map(decode_movement).collect()
    }

    #[instrument(skip(self, item_ids), fields(item_count = item_ids.len()), err)]
    async fn stock_levels(&self, item_ids: &[ItemId]) -> Result<HashMap<ItemId, i64>, LedgerError> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<Uuid> = item_ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT
                item_id,
                COALESCE(SUM(CASE WHEN direction = 'IN' THEN quantity ELSE -quantity END), 0)::BIGINT AS stock
            FROM stock_movements
            WHERE item_id = ANY($1)
            GROUP BY item_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_levels", e))?;

        let mut levels = HashMap::with_capacity(rows.len());
        for row in rows {
            let item_id: Uuid = row.try_get("item_id").map_err(decode_error)?;
            let stock: i64 = row.try_get("stock").map_err(decode_error)?;
            levels.insert(ItemId::from_uuid(item_id), stock);
        }
        Ok(levels)
    }

    #[instrument(skip(self), fields(item_id = %item_id, timeout_ms = self.lock_timeout.as_millis() as u64), err)]
    async fn begin_exclusive(
        &self,
        item_id: ItemId,
    ) -> Result<Box<dyn ExclusiveItemScope>, LedgerError> {
        let timeout_ms = self.lock_timeout.as_millis() as u64;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{timeout_ms}ms"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        sqlx::query(
            r#"
            INSERT INTO stock_item_locks (item_id, locked_at)
            VALUES ($1, NOW())
            ON CONFLICT (item_id) DO UPDATE SET locked_at = EXCLUDED.locked_at
            "#,
        )
        .bind(item_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_lock_timeout(&e) {
                LedgerError::LockTimeout { item_id, timeout_ms }
            } else {
                map_sqlx_error("acquire_item_lock", e)
            }
        })?;

        Ok(Box::new(PostgresScope { item_id, tx }))
    }
}

/// Transaction holding the item's row lock until commit or rollback.
struct PostgresScope {
    item_id: ItemId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ExclusiveItemScope for PostgresScope {
    fn item_id(&self) -> ItemId {
        self.item_id
    }

    async fn current_stock(&mut self) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(CASE WHEN direction = 'IN' THEN quantity ELSE -quantity END), 0)::BIGINT AS stock
            FROM stock_movements
            WHERE item_id = $1
            "#,
        )
        .bind(self.item_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("current_stock_locked", e))?;

        row.try_get("stock").map_err(decode_error)
    }

    async fn movements_for_reference(
        &mut self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE item_id = $1 AND reference_type = $2 AND reference_id = $3 ORDER BY id ASC"
        ))
        .bind(self.item_id.as_uuid())
        .bind(reference_type.as_str())
        .bind(reference_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movements_for_reference", e))?;

        rows.iter().map(decode_movement).collect()
    }

    async fn append(&mut self, movement: NewMovement) -> Result<StockMovement, LedgerError> {
        ensure_scope_item(self.item_id, &movement)?;
        movement.validate()?;
        insert_movement(&mut *self.tx, movement).await
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn insert_movement<'e, E>(executor: E, movement: NewMovement) -> Result<StockMovement, LedgerError>
where
    E: sqlx::PgExecutor<'e>,
{
    let reference_type = movement.reference.map(|r| r.reference_type.as_str());
    let reference_id = movement.reference.and_then(|r| r.reference_id);

    let item_id = movement.item_id;
    // The insert is skipped when it would push the item's total past BIGINT.
    let row = sqlx::query(
        r#"
        INSERT INTO stock_movements (item_id, direction, quantity, reason, reference_type, reference_id)
        SELECT $1::uuid, $2::text, $3::bigint, $4::text, $5::text, $6::uuid
        WHERE (
            SELECT COALESCE(SUM(CASE WHEN direction = 'IN' THEN quantity ELSE -quantity END), 0)
            FROM stock_movements
            WHERE item_id = $1::uuid
        ) + (CASE WHEN $2::text = 'IN' THEN $3::bigint ELSE -$3::bigint END) <= 9223372036854775807
        RETURNING id, created_at
        "#,
    )
    .bind(movement.item_id.as_uuid())
    .bind(movement.direction.as_str())
    .bind(movement.quantity)
    .bind(&movement.reason)
    .bind(reference_type)
    .bind(reference_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?
    .ok_or_else(|| LedgerError::Validation(format!("stock for item {item_id} would overflow i64")))?;

    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_error)?;
    Ok(movement.into_stored(MovementId::new(id as u64), created_at))
}

fn decode_movement(row: &sqlx::postgres::PgRow) -> Result<StockMovement, LedgerError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let item_id: Uuid = row.try_get("item_id").map_err(decode_error)?;
    let direction: String = row.try_get("direction").map_err(decode_error)?;
    let reference_type: Option<String> = row.try_get("reference_type").map_err(decode_error)?;
    let reference_id: Option<Uuid> = row.try_get("reference_id").map_err(decode_error)?;

    let direction: Direction = direction
        .parse()
        .map_err(|e| LedgerError::Storage(format!("failed to decode movement row: {e}")))?;
    let reference = reference_type
        .map(|t| {
            t.parse::<ReferenceType>().map(|reference_type| MovementReference {
                reference_type,
                reference_id,
            })
        })
        .transpose()
        .map_err(|e| LedgerError::Storage(format!("failed to decode movement row: {e}")))?;

    Ok(StockMovement {
        id: MovementId::new(id as u64),
        item_id: ItemId::from_uuid(item_id),
        direction,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        reason: row.try_get("reason").map_err(decode_error)?,
        reference,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn decode_error(err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(format!("failed to decode movement row: {err}"))
}

fn is_lock_timeout(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "55P03";
        }
    }
    false
}

/// Map SQLx errors to LedgerError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => LedgerError::Transient(msg),
                // lock_not_available outside scope acquisition still means contention
                Some("55P03") => LedgerError::Transient(msg),
                // check_violation, raise_exception (append-only trigger)
                Some("23514") | Some("P0001") => LedgerError::Validation(msg),
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::Transient(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => LedgerError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
