//! Postgres-backed stock store.
//!
//! ## Concurrency
//!
//! `commit` runs one transaction per unit of work. Level rows are written in
//! the order of [`UnitOfWork::level_writes`] (ascending `StockKey`), each as a
//! compare-and-swap:
//!
//! - new rows: `INSERT ... ON CONFLICT DO NOTHING`
//! - existing rows: `UPDATE ... WHERE id = $1 AND version = $expected`
//!
//! Zero affected rows means another writer got there first and the whole
//! transaction is abandoned with `StockError::ConcurrentModification`.
//! `lock_timeout` and `statement_timeout` are set per transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StorageErrorKind |
//! |------------|----------------------|------------------|
//! | PoolTimedOut | N/A | `Timeout` |
//! | Database | `55P03` (lock_not_available), `57014` (query_canceled) | `Timeout` |
//! | Database | `08xxx` | `Connection` |
//! | Database | `23xxx` | `Constraint` |
//! | Io / Tls / PoolClosed | N/A | `Connection` |
//! | Other | Any other | `Other` |
//!
//! ## Thread Safety
//!
//! `PostgresStockStore` is `Send + Sync`. The synchronous store traits bridge
//! onto the async driver: inside a multi-thread tokio runtime through
//! `block_in_place`, from plain threads through the runtime handle captured at
//! construction.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{field, instrument, Span};

use stockledger_core::{
    LocationId, MovementId, ProductId, StockError, StockLevelId, StockResult, StorageError,
    TenantId, UserId, VariationId,
};
use stockledger_inventory::{LotInfo, MovementType, Reference, StockKey, StockLevel, StockMovement};

use crate::config::StockEngineConfig;

use super::query::{LevelFilter, MovementFilter, MovementQueryResult, Pagination};
use super::r#trait::{LedgerStore, LevelStore, LevelWrite, StockStore, UnitOfWork};

/// Schema for `stock_levels` and `stock_movements`.
pub const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const LEVEL_COLUMNS: &str = r#"
    id, tenant_id, product_id, variation_id, location_id,
    quantity_on_hand, quantity_reserved, reorder_point, reorder_quantity, max_stock_level,
    average_cost, version, last_movement_at, last_count_at, created_at, updated_at
"#;

const MOVEMENT_COLUMNS: &str = r#"
    id, level_id, tenant_id, product_id, variation_id, location_id,
    movement_type, quantity, unit_cost, total_cost,
    reference_type, reference_id, reference_number, reason, metadata,
    batch_number, lot_number, expiry_date,
    balance_before, balance_after, created_at, created_by
"#;

const MOVEMENT_FILTER: &str = r#"
    WHERE tenant_id = $1
        AND ($2::uuid IS NULL OR product_id = $2)
        AND ($3::uuid IS NULL OR location_id = $3)
        AND ($4::uuid IS NULL OR variation_id = $4)
        AND ($5::text IS NULL OR movement_type = $5)
        AND ($6::text IS NULL OR reference_type = $6)
        AND ($7::text IS NULL OR reference_id = $7)
        AND ($8::timestamptz IS NULL OR created_at >= $8)
        AND ($9::timestamptz IS NULL OR created_at <= $9)
"#;

/// Postgres-backed stock store.
///
/// Every query carries `tenant_id` in its WHERE clause.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
    runtime: Handle,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

impl PostgresStockStore {
    /// Open a pool sized and bounded by `config`.
    pub async fn connect(config: &StockEngineConfig) -> Result<Self, StorageError> {
        let url = config
            .require_database_url()
            .map_err(|e| StorageError::connection(e.to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::from_pool(pool, config)
    }

    /// Wrap an existing pool. Must be called within a tokio runtime.
    pub fn from_pool(pool: PgPool, config: &StockEngineConfig) -> Result<Self, StorageError> {
        let runtime = Handle::try_current().map_err(|_| {
            StorageError::other("PostgresStockStore must be created inside a tokio runtime")
        })?;
        Ok(Self {
            pool: Arc::new(pool),
            runtime,
            lock_timeout_ms: config.lock_timeout_ms,
            statement_timeout_ms: config.statement_timeout_ms,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply [`MIGRATION`]. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn fetch_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StorageError> {
        let sql = format!(
            r#"
            SELECT {LEVEL_COLUMNS}
            FROM stock_levels
            WHERE tenant_id = $1
                AND product_id = $2
                AND variation_id IS NOT DISTINCT FROM $3
                AND location_id = $4
            "#
        );
        let row = sqlx::query(&sql)
            .bind(key.tenant_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.variation_id.map(|v| *v.as_uuid()))
            .bind(key.location_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_level", e))?;

        row.map(|row| decode_level(&row)).transpose()
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, level_count = field::Empty),
        err
    )]
    pub async fn fetch_levels(
        &self,
        tenant_id: TenantId,
        filter: &LevelFilter,
    ) -> Result<Vec<StockLevel>, StorageError> {
        let sql = format!(
            r#"
            SELECT {LEVEL_COLUMNS}
            FROM stock_levels
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR product_id = $2)
                AND ($3::uuid IS NULL OR location_id = $3)
                AND (NOT $4 OR quantity_on_hand > 0)
                AND (NOT $5 OR quantity_available <= reorder_point)
            ORDER BY quantity_available ASC, product_id, variation_id NULLS FIRST, location_id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(filter.product_id.map(|p| *p.as_uuid()))
            .bind(filter.location_id.map(|l| *l.as_uuid()))
            .bind(filter.in_stock_only)
            .bind(filter.low_stock_only)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_levels", e))?;

        let levels = rows.iter().map(decode_level).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("level_count", levels.len());
        Ok(levels)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    pub async fn fetch_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StorageError> {
        let product_param = filter.product_id.map(|p| *p.as_uuid());
        let location_param = filter.location_id.map(|l| *l.as_uuid());
        let variation_param = filter.variation_id.map(|v| *v.as_uuid());
        let type_param = filter.movement_type.map(|t| t.as_str());
        let reference_type_param = filter.reference_type.as_deref();
        let reference_id_param = filter.reference_id.as_deref();

        let count_sql = format!("SELECT COUNT(*) AS total FROM stock_movements {MOVEMENT_FILTER}");
        let count_row = sqlx::query(&count_sql)
            .bind(tenant_id.as_uuid())
            .bind(product_param)
            .bind(location_param)
            .bind(variation_param)
            .bind(type_param)
            .bind(reference_type_param)
            .bind(reference_id_param)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| decode_error("count", e))?;

        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            {MOVEMENT_FILTER}
            ORDER BY created_at DESC, seq DESC
            LIMIT $10 OFFSET $11
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(product_param)
            .bind(location_param)
            .bind(variation_param)
            .bind(type_param)
            .bind(reference_type_param)
            .bind(reference_id_param)
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows
            .iter()
            .map(decode_movement)
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = total > i64::from(pagination.offset) + i64::from(pagination.limit);

        Ok(MovementQueryResult {
            movements,
            total: total as u64,
            pagination,
            has_more,
        })
    }

    /// One statement, so the result is a single snapshot of the ledger.
    #[instrument(
        skip(self, filter),
        fields(tenant_id = %tenant_id, movement_count = field::Empty),
        err
    )]
    pub async fn fetch_all_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StorageError> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            {MOVEMENT_FILTER}
            ORDER BY created_at DESC, seq DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(filter.product_id.map(|p| *p.as_uuid()))
            .bind(filter.location_id.map(|l| *l.as_uuid()))
            .bind(filter.variation_id.map(|v| *v.as_uuid()))
            .bind(filter.movement_type.map(|t| t.as_str()))
            .bind(filter.reference_type.as_deref())
            .bind(filter.reference_id.as_deref())
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("scan_movements", e))?;

        let movements = rows
            .iter()
            .map(decode_movement)
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("movement_count", movements.len());
        Ok(movements)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, level_id = %level_id), err)]
    pub async fn fetch_level_movements(
        &self,
        tenant_id: TenantId,
        level_id: StockLevelId,
    ) -> Result<Vec<StockMovement>, StorageError> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE tenant_id = $1 AND level_id = $2
            ORDER BY seq ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(level_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("level_movements", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// Commit a unit of work in one transaction.
    #[instrument(
        skip(self, work),
        fields(
            level_writes = work.level_writes().len(),
            movements = work.movements().len()
        ),
        err
    )]
    pub async fn commit_work(&self, work: UnitOfWork) -> StockResult<()> {
        if work.is_empty() {
            return Ok(());
        }
        work.validate()?;

        // Dropping `tx` on an early return rolls back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let lock_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms);
        let statement_timeout = format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.statement_timeout_ms
        );
        for sql in [&lock_timeout, &statement_timeout] {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_timeouts", e))?;
        }

        let (levels, movements) = work.into_parts();
        for write in &levels {
            write_level(&mut tx, write).await?;
        }
        for movement in &movements {
            insert_movement(&mut tx, movement).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    fn block_on<F>(&self, fut: F) -> Result<F::Output, StorageError>
    where
        F: Future,
    {
        match Handle::try_current() {
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    Ok(tokio::task::block_in_place(|| current.block_on(fut)))
                }
                _ => Err(StorageError::other(
                    "PostgresStockStore cannot block inside a current-thread runtime",
                )),
            },
            Err(_) => Ok(self.runtime.block_on(fut)),
        }
    }
}

async fn write_level(tx: &mut Transaction<'_, Postgres>, write: &LevelWrite) -> StockResult<()> {
    let level = &write.level;
    let result = if write.expected_version == 0 {
        sqlx::query(
            r#"
            INSERT INTO stock_levels (
                id, tenant_id, product_id, variation_id, location_id,
                quantity_on_hand, quantity_reserved, reorder_point, reorder_quantity,
                max_stock_level, average_cost, version,
                last_movement_at, last_count_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(level.id.as_uuid())
        .bind(level.key.tenant_id.as_uuid())
        .bind(level.key.product_id.as_uuid())
        .bind(level.key.variation_id.map(|v| *v.as_uuid()))
        .bind(level.key.location_id.as_uuid())
        .bind(level.quantity_on_hand)
        .bind(level.quantity_reserved)
        .bind(level.reorder_point)
        .bind(level.reorder_quantity)
        .bind(level.max_stock_level)
        .bind(level.average_cost)
        .bind(level.version as i64)
        .bind(level.last_movement_at)
        .bind(level.last_count_at)
        .bind(level.created_at)
        .bind(level.updated_at)
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE stock_levels SET
                quantity_on_hand = $4,
                quantity_reserved = $5,
                reorder_point = $6,
                reorder_quantity = $7,
                max_stock_level = $8,
                average_cost = $9,
                version = $10,
                last_movement_at = $11,
                last_count_at = $12,
                updated_at = $13
            WHERE id = $1 AND tenant_id = $2 AND version = $3
            "#,
        )
        .bind(level.id.as_uuid())
        .bind(level.key.tenant_id.as_uuid())
        .bind(write.expected_version as i64)
        .bind(level.quantity_on_hand)
        .bind(level.quantity_reserved)
        .bind(level.reorder_point)
        .bind(level.reorder_quantity)
        .bind(level.max_stock_level)
        .bind(level.average_cost)
        .bind(level.version as i64)
        .bind(level.last_movement_at)
        .bind(level.last_count_at)
        .bind(level.updated_at)
        .execute(&mut **tx)
        .await
    };
    let result = result.map_err(|e| map_sqlx_error("write_level", e))?;

    if result.rows_affected() == 0 {
        return Err(StockError::conflict(format!(
            "stock level {} moved past version {}",
            level.key, write.expected_version
        )));
    }
    Ok(())
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    m: &StockMovement,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, level_id, tenant_id, product_id, variation_id, location_id,
            movement_type, quantity, unit_cost, total_cost,
            reference_type, reference_id, reference_number, reason, metadata,
            batch_number, lot_number, expiry_date,
            balance_before, balance_after, created_at, created_by
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
            $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
        )
        "#,
    )
    .bind(m.id.as_uuid())
    .bind(m.level_id.as_uuid())
    .bind(m.key.tenant_id.as_uuid())
    .bind(m.key.product_id.as_uuid())
    .bind(m.key.variation_id.map(|v| *v.as_uuid()))
    .bind(m.key.location_id.as_uuid())
    .bind(m.movement_type.as_str())
    .bind(m.quantity)
    .bind(m.unit_cost)
    .bind(m.total_cost)
    .bind(m.reference.as_ref().map(|r| r.reference_type.as_str()))
    .bind(m.reference.as_ref().map(|r| r.reference_id.as_str()))
    .bind(m.reference.as_ref().and_then(|r| r.reference_number.as_deref()))
    .bind(m.reason.as_deref())
    .bind(&m.metadata)
    .bind(m.lot.batch_number.as_deref())
    .bind(m.lot.lot_number.as_deref())
    .bind(m.lot.expiry_date)
    .bind(m.balance_before)
    .bind(m.balance_after)
    .bind(m.created_at)
    .bind(m.created_by.map(|u| *u.as_uuid()))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

/// Map SQLx errors to a [`StorageError`] kind.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("57014") => StorageError::timeout(msg),
                Some(code) if code.starts_with("08") => StorageError::connection(msg),
                Some(code) if code.starts_with("23") => StorageError::constraint(msg),
                _ => StorageError::other(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StorageError::timeout(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StorageError::connection(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Io(e) => StorageError::connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StorageError::connection(format!("tls error in {operation}: {e}")),
        other => StorageError::other(format!("sqlx error in {operation}: {other}")),
    }
}

fn decode_error(what: &str, err: impl core::fmt::Display) -> StorageError {
    StorageError::other(format!("failed to decode {what}: {err}"))
}

// SQLx row types

#[derive(Debug)]
struct LevelRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    product_id: uuid::Uuid,
    variation_id: Option<uuid::Uuid>,
    location_id: uuid::Uuid,
    quantity_on_hand: i64,
    quantity_reserved: i64,
    reorder_point: i64,
    reorder_quantity: i64,
    max_stock_level: Option<i64>,
    average_cost: Decimal,
    version: i64,
    last_movement_at: Option<DateTime<Utc>>,
    last_count_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LevelRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LevelRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            variation_id: row.try_get("variation_id")?,
            location_id: row.try_get("location_id")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            quantity_reserved: row.try_get("quantity_reserved")?,
            reorder_point: row.try_get("reorder_point")?,
            reorder_quantity: row.try_get("reorder_quantity")?,
            max_stock_level: row.try_get("max_stock_level")?,
            average_cost: row.try_get("average_cost")?,
            version: row.try_get("version")?,
            last_movement_at: row.try_get("last_movement_at")?,
            last_count_at: row.try_get("last_count_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<LevelRow> for StockLevel {
    fn from(row: LevelRow) -> Self {
        StockLevel {
            id: StockLevelId::from_uuid(row.id),
            key: StockKey::new(
                TenantId::from_uuid(row.tenant_id),
                ProductId::from_uuid(row.product_id),
                row.variation_id.map(VariationId::from_uuid),
                LocationId::from_uuid(row.location_id),
            ),
            quantity_on_hand: row.quantity_on_hand,
            quantity_reserved: row.quantity_reserved,
            reorder_point: row.reorder_point,
            reorder_quantity: row.reorder_quantity,
            max_stock_level: row.max_stock_level,
            average_cost: row.average_cost,
            version: row.version as u64,
            last_movement_at: row.last_movement_at,
            last_count_at: row.last_count_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct MovementRow {
    id: uuid::Uuid,
    level_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    product_id: uuid::Uuid,
    variation_id: Option<uuid::Uuid>,
    location_id: uuid::Uuid,
    movement_type: String,
    quantity: i64,
    unit_cost: Option<Decimal>,
    total_cost: Option<Decimal>,
    reference_type: Option<String>,
    reference_id: Option<String>,
    reference_number: Option<String>,
    reason: Option<String>,
    metadata: serde_json::Value,
    batch_number: Option<String>,
    lot_number: Option<String>,
    expiry_date: Option<NaiveDate>,
    balance_before: i64,
    balance_after: i64,
    created_at: DateTime<Utc>,
    created_by: Option<uuid::Uuid>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            level_id: row.try_get("level_id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            variation_id: row.try_get("variation_id")?,
            location_id: row.try_get("location_id")?,
            movement_type: row.try_get("movement_type")?,
            quantity: row.try_get("quantity")?,
            unit_cost: row.try_get("unit_cost")?,
            total_cost: row.try_get("total_cost")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            reference_number: row.try_get("reference_number")?,
            reason: row.try_get("reason")?,
            metadata: row.try_get("metadata")?,
            batch_number: row.try_get("batch_number")?,
            lot_number: row.try_get("lot_number")?,
            expiry_date: row.try_get("expiry_date")?,
            balance_before: row.try_get("balance_before")?,
            balance_after: row.try_get("balance_after")?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StorageError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type: MovementType = row
            .movement_type
            .parse()
            .map_err(|e| decode_error("movement_type", e))?;
        let reference = match (row.reference_type, row.reference_id) {
            (Some(reference_type), Some(reference_id)) => Some(Reference {
                reference_type,
                reference_id,
                reference_number: row.reference_number,
            }),
            _ => None,
        };
        Ok(StockMovement {
            id: MovementId::from_uuid(row.id),
            level_id: StockLevelId::from_uuid(row.level_id),
            key: StockKey::new(
                TenantId::from_uuid(row.tenant_id),
                ProductId::from_uuid(row.product_id),
                row.variation_id.map(VariationId::from_uuid),
                LocationId::from_uuid(row.location_id),
            ),
            movement_type,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            total_cost: row.total_cost,
            reference,
            reason: row.reason,
            metadata: row.metadata,
            lot: LotInfo {
                batch_number: row.batch_number,
                lot_number: row.lot_number,
                expiry_date: row.expiry_date,
            },
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            created_at: row.created_at,
            created_by: row.created_by.map(UserId::from_uuid),
        })
    }
}

fn decode_level(row: &PgRow) -> Result<StockLevel, StorageError> {
    LevelRow::from_row(row)
        .map(StockLevel::from)
        .map_err(|e| decode_error("stock level row", e))
}

fn decode_movement(row: &PgRow) -> Result<StockMovement, StorageError> {
    let row = MovementRow::from_row(row).map_err(|e| decode_error("movement row", e))?;
    StockMovement::try_from(row)
}

// Synchronous store traits

impl LevelStore for PostgresStockStore {
    fn load_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StorageError> {
        self.block_on(self.fetch_level(key))?
    }

    fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: &LevelFilter,
    ) -> Result<Vec<StockLevel>, StorageError> {
        self.block_on(self.fetch_levels(tenant_id, filter))?
    }
}

impl LedgerStore for PostgresStockStore {
    fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StorageError> {
        self.block_on(self.fetch_movements(tenant_id, filter, pagination))?
    }

    fn scan_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StorageError> {
        self.block_on(self.fetch_all_movements(tenant_id, filter))?
    }

    fn level_movements(
        &self,
        tenant_id: TenantId,
        level_id: StockLevelId,
    ) -> Result<Vec<StockMovement>, StorageError> {
        self.block_on(self.fetch_level_movements(tenant_id, level_id))?
    }
}

impl StockStore for PostgresStockStore {
    fn commit(&self, work: UnitOfWork) -> StockResult<()> {
        self.block_on(self.commit_work(work))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::StorageErrorKind;

    #[test]
    fn pool_errors_map_to_timeout_and_connection() {
        assert_eq!(
            map_sqlx_error("load", sqlx::Error::PoolTimedOut).kind,
            StorageErrorKind::Timeout
        );
        assert_eq!(
            map_sqlx_error("load", sqlx::Error::PoolClosed).kind,
            StorageErrorKind::Connection
        );
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            map_sqlx_error("load", sqlx::Error::Io(io)).kind,
            StorageErrorKind::Connection
        );
        assert_eq!(
            map_sqlx_error("load", sqlx::Error::RowNotFound).kind,
            StorageErrorKind::Other
        );
    }

    #[test]
    fn migration_declares_ledger_guards() {
        for fragment in [
            "GENERATED ALWAYS AS (quantity_on_hand - quantity_reserved) STORED",
            "reserved_not_exceeding_on_hand",
            "balance_arithmetic",
            "COALESCE(variation_id, '00000000-0000-0000-0000-000000000000'::uuid)",
            "stock_movements_append_only",
        ] {
            assert!(MIGRATION.contains(fragment), "missing {fragment}");
        }
    }
}
