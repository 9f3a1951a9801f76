//! Postgres-backed ledger and reservation stores.
//!
//! Schema lives in `migrations/`. Both adapters share the pool and are
//! `Send + Sync`; every method is a single statement except the ledger's
//! `update`, which follows a missed conditional write with an existence probe.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | DomainError code |
//! |------------|-----------------|------------------|
//! | Database (unique violation) on insert | `23505` | `ITEM_ALREADY_EXISTS` / `RESERVATION_ALREADY_EXISTS` |
//! | Database (check violation) | `23514` | `STORAGE_FAILURE` (the entity layer should have rejected it) |
//! | Row decode failures | N/A | `CORRUPT_RECORD` |
//! | Anything else (pool closed, network, ...) | N/A | `STORAGE_FAILURE` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use stockledger_core::{
    DomainError, DomainResult, OrderId, ProductId, ReservationId, StockItemId,
};
use stockledger_inventory::{Reservation, ReservationStatus, StockItem};

use super::ledger::LedgerStore;
use super::record::{ReservationRecord, StockItemRecord};
use super::reservation::ReservationStore;

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

/// Create the ledger tables and indexes if they do not exist yet.
pub async fn migrate(pool: &PgPool) -> DomainResult<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

const STOCK_ITEM_COLUMNS: &str =
    "id, product_id, quantity, reserved, version, created_at, updated_at";

const RESERVATION_COLUMNS: &str =
    "id, inventory_item_id, order_id, quantity, status, expires_at, created_at, updated_at";

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn exists(&self, id: StockItemId) -> DomainResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM stock_items WHERE id = $1) AS present")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stock_item_exists", e))?;
        row.try_get::<bool, _>("present")
            .map_err(|e| map_sqlx_error("stock_item_exists", e))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn load(&self, id: StockItemId) -> DomainResult<StockItem> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stock_item", e))?
        .ok_or_else(|| DomainError::item_not_found(format!("item={id}")))?;

        decode_item(&row)
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn find_by_product_id(&self, product_id: ProductId) -> DomainResult<StockItem> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items WHERE product_id = $1"
        ))
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stock_item_by_product", e))?
        .ok_or_else(|| DomainError::product_not_found(format!("product={product_id}")))?;

        decode_item(&row)
    }

    #[instrument(skip(self, ids), fields(requested = ids.len()), err)]
    async fn find_many(&self, ids: &[StockItemId]) -> DomainResult<Vec<StockItem>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items WHERE id = ANY($1)"
        ))
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_many_stock_items", e))?;

        rows.iter().map(decode_item).collect()
    }

    #[instrument(skip(self), err)]
    async fn find_low_stock(&self, threshold: i64, limit: usize) -> DomainResult<Vec<StockItem>> {
        // LIMIT NULL is unbounded in Postgres.
        let limit = (limit > 0).then_some(limit as i64);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {STOCK_ITEM_COLUMNS}
            FROM stock_items
            WHERE quantity - reserved <= $1
            ORDER BY quantity - reserved ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(threshold)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_low_stock", e))?;

        rows.iter().map(decode_item).collect()
    }

    async fn count(&self) -> DomainResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM stock_items")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_stock_items", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_stock_items", e))?;
        Ok(total.max(0) as u64)
    }

    async fn exists_by_product_id(&self, product_id: ProductId) -> DomainResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM stock_items WHERE product_id = $1) AS present",
        )
        .bind(product_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_item_exists_by_product", e))?;
        row.try_get::<bool, _>("present")
            .map_err(|e| map_sqlx_error("stock_item_exists_by_product", e))
    }

    #[instrument(skip(self, item), fields(item_id = %item.id(), product_id = %item.product_id()), err)]
    async fn save(&self, item: &StockItem) -> DomainResult<()> {
        let record = StockItemRecord::from(item);
        sqlx::query(
            r#"
            INSERT INTO stock_items (
                id,
                product_id,
                quantity,
                reserved,
                version,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.product_id)
        .bind(record.quantity)
        .bind(record.reserved)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DomainError::item_already_exists(format!(
                    "item={} product={}",
                    record.id, record.product_id
                ))
            } else {
                map_sqlx_error("insert_stock_item", e)
            }
        })?;
        Ok(())
    }

    #[instrument(
        skip(self, item),
        fields(item_id = %item.id(), expected_version = item.version()),
        err
    )]
    async fn update(&self, item: &mut StockItem) -> DomainResult<()> {
        let row = sqlx::query(
            r#"
            UPDATE stock_items
            SET quantity = $3,
                reserved = $4,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING version, updated_at
            "#,
        )
        .bind(item.id().as_uuid())
        .bind(item.version() as i64)
        .bind(item.quantity())
        .bind(item.reserved())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_stock_item", e))?;

        let Some(row) = row else {
            // Nothing matched id + version: tell a missing row apart from a lost race.
            return if self.exists(item.id()).await? {
                Err(DomainError::version_conflict(format!(
                    "item={} expected={}",
                    item.id(),
                    item.version()
                )))
            } else {
                Err(DomainError::item_not_found(format!("item={}", item.id())))
            };
        };

        let (version, updated_at) = decode_version_stamp(&row)?;
        item.mark_persisted(version, updated_at);
        Ok(())
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn delete(&self, id: StockItemId) -> DomainResult<StockItem> {
        let row = sqlx::query(&format!(
            "DELETE FROM stock_items WHERE id = $1 RETURNING {STOCK_ITEM_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_stock_item", e))?
        .ok_or_else(|| DomainError::item_not_found(format!("item={id}")))?;

        decode_item(&row)
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn increment_version(&self, id: StockItemId) -> DomainResult<StockItem> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_items
            SET version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {STOCK_ITEM_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_stock_item_version", e))?
        .ok_or_else(|| DomainError::item_not_found(format!("item={id}")))?;

        decode_item(&row)
    }
}

/// Postgres-backed reservation store.
#[derive(Debug, Clone)]
pub struct PostgresReservationStore {
    pool: Arc<PgPool>,
}

impl PostgresReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    #[instrument(skip(self), fields(reservation_id = %id), err)]
    async fn load(&self, id: ReservationId) -> DomainResult<Reservation> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_reservation", e))?
        .ok_or_else(|| DomainError::reservation_not_found(format!("reservation={id}")))?;

        decode_reservation(&row)
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn load_by_order_id(&self, order_id: OrderId) -> DomainResult<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_reservation_by_order", e))?;

        row.as_ref().map(decode_reservation).transpose()
    }

    #[instrument(
        skip(self, reservation),
        fields(reservation_id = %reservation.id(), order_id = %reservation.order_id()),
        err
    )]
    async fn save(&self, reservation: &Reservation) -> DomainResult<()> {
        let record = ReservationRecord::from(reservation);
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id,
                inventory_item_id,
                order_id,
                quantity,
                status,
                expires_at,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.inventory_item_id)
        .bind(record.order_id)
        .bind(record.quantity)
        .bind(&record.status)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DomainError::reservation_already_exists(format!(
                    "reservation={} order={}",
                    record.id, record.order_id
                ))
            } else {
                map_sqlx_error("insert_reservation", e)
            }
        })?;
        Ok(())
    }

    #[instrument(
        skip(self, reservation),
        fields(reservation_id = %reservation.id(), status = %reservation.status()),
        err
    )]
    async fn update(&self, reservation: &Reservation) -> DomainResult<()> {
        let record = ReservationRecord::from(reservation);
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2,
                expires_at = $3,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.status)
        .bind(record.expires_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::reservation_not_found(format!(
                "reservation={}",
                record.id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<Reservation>> {
        let limit = (limit > 0).then_some(limit as i64);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE status = $1 AND expires_at < $2
            ORDER BY expires_at ASC, id ASC
            LIMIT $3
            "#
        ))
        .bind(ReservationStatus::Pending.as_str())
        .bind(now)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_expired_reservations", e))?;

        rows.iter().map(decode_reservation).collect()
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    async fn find_by_item_id(
        &self,
        item_id: StockItemId,
        status: Option<ReservationStatus>,
    ) -> DomainResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE inventory_item_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(item_id.as_uuid())
        .bind(status.map(ReservationStatus::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_reservations_by_item", e))?;

        rows.iter().map(decode_reservation).collect()
    }

    async fn count_by_status(&self, status: ReservationStatus) -> DomainResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM reservations WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_reservations_by_status", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_reservations_by_status", e))?;
        Ok(total.max(0) as u64)
    }
}

fn decode_item(row: &sqlx::postgres::PgRow) -> DomainResult<StockItem> {
    let record = StockItemRecord::from_row(row)
        .map_err(|e| DomainError::corrupt_record(format!("failed to decode stock item row: {e}")))?;
    StockItem::try_from(record)
}

fn decode_reservation(row: &sqlx::postgres::PgRow) -> DomainResult<Reservation> {
    let record = ReservationRecord::from_row(row)
        .map_err(|e| DomainError::corrupt_record(format!("failed to decode reservation row: {e}")))?;
    Reservation::try_from(record)
}

fn decode_version_stamp(row: &sqlx::postgres::PgRow) -> DomainResult<(u64, DateTime<Utc>)> {
    let version: i64 = row
        .try_get("version")
        .map_err(|e| DomainError::corrupt_record(format!("failed to decode version: {e}")))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| DomainError::corrupt_record(format!("failed to decode updated_at: {e}")))?;
    let version = u64::try_from(version)
        .map_err(|_| DomainError::corrupt_record(format!("negative version {version}")))?;
    Ok((version, updated_at))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            DomainError::storage(format!("{operation}: database error"))
                .with_detail(format!("code={code} message={}", db_err.message()))
        }
        sqlx::Error::PoolClosed => DomainError::storage(format!("{operation}: pool closed")),
        sqlx::Error::PoolTimedOut => {
            DomainError::storage(format!("{operation}: timed out acquiring a connection"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DomainError::corrupt_record(format!("{operation}: {err}"))
        }
        other => DomainError::storage(format!("{operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code == "23505";
        }
    }
    false
}
