//! Flat storage representations of the ledger entities.
//!
//! These are the shapes written to Postgres rows and to cache values (as
//! JSON). Converting back into an entity re-validates it, so a corrupted row
//! surfaces as `CORRUPT_RECORD` instead of an entity that breaks its invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use stockledger_core::{
    DomainError, DomainResult, OrderId, ProductId, ReservationId, StockItemId,
};
use stockledger_inventory::{Reservation, ReservationStatus, StockItem};

/// Row shape of `stock_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub reserved: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StockItem> for StockItemRecord {
    fn from(item: &StockItem) -> Self {
        Self {
            id: *item.id().as_uuid(),
            product_id: *item.product_id().as_uuid(),
            quantity: item.quantity(),
            reserved: item.reserved(),
            version: item.version() as i64,
            created_at: item.created_at(),
            updated_at: item.updated_at(),
        }
    }
}

impl TryFrom<StockItemRecord> for StockItem {
    type Error = DomainError;

    fn try_from(record: StockItemRecord) -> DomainResult<Self> {
        let version = u64::try_from(record.version).map_err(|_| {
            DomainError::corrupt_record("negative stock item version")
                .with_detail(format!("item={} version={}", record.id, record.version))
        })?;
        StockItem::restore(
            StockItemId::from_uuid(record.id),
            ProductId::from_uuid(record.product_id),
            record.quantity,
            record.reserved,
            version,
            record.created_at,
            record.updated_at,
        )
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StockItemRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            reserved: row.try_get("reserved")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Row shape of `reservations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: Uuid,
    pub inventory_item_id: Uuid,
    pub order_id: Uuid,
    pub quantity: i64,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Reservation> for ReservationRecord {
    fn from(r: &Reservation) -> Self {
        Self {
            id: *r.id().as_uuid(),
            inventory_item_id: *r.item_id().as_uuid(),
            order_id: *r.order_id().as_uuid(),
            quantity: r.quantity(),
            status: r.status().as_str().to_string(),
            expires_at: r.expires_at(),
            created_at: r.created_at(),
            updated_at: r.updated_at(),
        }
    }
}

impl TryFrom<ReservationRecord> for Reservation {
    type Error = DomainError;

    fn try_from(record: ReservationRecord) -> DomainResult<Self> {
        let status: ReservationStatus = record.status.parse()?;
        Reservation::restore(
            ReservationId::from_uuid(record.id),
            StockItemId::from_uuid(record.inventory_item_id),
            OrderId::from_uuid(record.order_id),
            record.quantity,
            status,
            record.expires_at,
            record.created_at,
            record.updated_at,
        )
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ReservationRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            inventory_item_id: row.try_get("inventory_item_id")?,
            order_id: row.try_get("order_id")?,
            quantity: row.try_get("quantity")?,
            status: row.try_get("status")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockledger_core::{Clock, ErrorCode, SystemClock};
    use stockledger_inventory::default_reservation_ttl;

    #[test]
    fn stock_item_survives_record_and_json_round_trip() {
        let now = SystemClock.now();
        let mut item = StockItem::new(StockItemId::new(), ProductId::new(), 120, now).unwrap();
        item.reserve(45).unwrap();
        item.mark_persisted(7, now + Duration::seconds(3));

        let record = StockItemRecord::from(&item);
        let json = serde_json::to_string(&record).unwrap();
        let decoded: StockItemRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);

        let back = StockItem::try_from(decoded).unwrap();
        assert_eq!(back, item);
        assert_eq!(back.created_at(), item.created_at());
        assert_eq!(back.version(), 7);
    }

    #[test]
    fn reservation_survives_record_round_trip_with_status_string() {
        let now = SystemClock.now();
        let mut r = Reservation::new(
            ReservationId::new(),
            StockItemId::new(),
            OrderId::new(),
            3,
            default_reservation_ttl(),
            now,
        )
        .unwrap();
        r.mark_expired(r.expires_at() + Duration::seconds(1)).unwrap();

        let record = ReservationRecord::from(&r);
        assert_eq!(record.status, "expired");

        let json = serde_json::to_string(&record).unwrap();
        let back = Reservation::try_from(serde_json::from_str::<ReservationRecord>(&json).unwrap())
            .unwrap();
        assert_eq!(back, r);
        assert_eq!(back.expires_at(), r.expires_at());
    }

    #[test]
    fn corrupted_rows_are_rejected() {
        let now = SystemClock.now();
        let record = StockItemRecord {
            id: Uuid::now_v7(),
            product_id: Uuid::now_v7(),
            quantity: 3,
            reserved: 4,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            StockItem::try_from(record).unwrap_err().code(),
            ErrorCode::CorruptRecord
        );

        let record = ReservationRecord {
            id: Uuid::now_v7(),
            inventory_item_id: Uuid::now_v7(),
            order_id: Uuid::now_v7(),
            quantity: 1,
            status: "on_hold".to_string(),
            expires_at: now,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            Reservation::try_from(record).unwrap_err().code(),
            ErrorCode::CorruptRecord
        );
    }
}
