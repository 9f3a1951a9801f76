use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockledger_core::{
    Clock, DomainError, DomainResult, OrderId, ProductId, ReservationId, StockItemId, SystemClock,
};
use stockledger_inventory::{Reservation, ReservationStatus, StockItem};

use super::ledger::LedgerStore;
use super::reservation::ReservationStore;

fn poisoned() -> DomainError {
    DomainError::storage("lock poisoned")
}

#[derive(Debug, Default)]
struct LedgerRows {
    items: HashMap<StockItemId, StockItem>,
    by_product: HashMap<ProductId, StockItemId>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. The conditional write happens under one write lock,
/// which gives the same "exactly one concurrent update wins" behavior as the
/// SQL `UPDATE ... WHERE id = ? AND version = ?`.
pub struct InMemoryLedgerStore {
    rows: RwLock<LedgerRows>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` for the `updated_at` stamps written by `update`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(LedgerRows::default()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, LedgerRows>> {
        self.rows.read().map_err(|_| poisoned())
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, LedgerRows>> {
        self.rows.write().map_err(|_| poisoned())
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load(&self, id: StockItemId) -> DomainResult<StockItem> {
        self.read()?
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::item_not_found(format!("item={id}")))
    }

    async fn find_by_product_id(&self, product_id: ProductId) -> DomainResult<StockItem> {
        let rows = self.read()?;
        rows.by_product
            .get(&product_id)
            .and_then(|id| rows.items.get(id))
            .cloned()
            .ok_or_else(|| DomainError::product_not_found(format!("product={product_id}")))
    }

    async fn find_many(&self, ids: &[StockItemId]) -> DomainResult<Vec<StockItem>> {
        let rows = self.read()?;
        Ok(ids.iter().filter_map(|id| rows.items.get(id).cloned()).collect())
    }

    async fn find_low_stock(&self, threshold: i64, limit: usize) -> DomainResult<Vec<StockItem>> {
        let rows = self.read()?;
        let mut low: Vec<StockItem> = rows
            .items
            .values()
            .filter(|item| item.available() <= threshold)
            .cloned()
            .collect();
        low.sort_by_key(|item| (item.available(), item.id()));
        if limit > 0 {
            low.truncate(limit);
        }
        Ok(low)
    }

    async fn count(&self) -> DomainResult<u64> {
        Ok(self.read()?.items.len() as u64)
    }

    async fn exists_by_product_id(&self, product_id: ProductId) -> DomainResult<bool> {
        Ok(self.read()?.by_product.contains_key(&product_id))
    }

    async fn save(&self, item: &StockItem) -> DomainResult<()> {
        let mut rows = self.write()?;
        if rows.items.contains_key(&item.id()) || rows.by_product.contains_key(&item.product_id()) {
            return Err(DomainError::item_already_exists(format!(
                "item={} product={}",
                item.id(),
                item.product_id()
            )));
        }
        rows.by_product.insert(item.product_id(), item.id());
        rows.items.insert(item.id(), item.clone());
        Ok(())
    }

    async fn update(&self, item: &mut StockItem) -> DomainResult<()> {
        let now = self.clock.now();
        let mut rows = self.write()?;
        let stored = rows
            .items
            .get_mut(&item.id())
            .ok_or_else(|| DomainError::item_not_found(format!("item={}", item.id())))?;

        if stored.version() != item.version() {
            return Err(DomainError::version_conflict(format!(
                "item={} expected={} actual={}",
                item.id(),
                item.version(),
                stored.version()
            )));
        }

        item.mark_persisted(item.version() + 1, now);
        *stored = item.clone();
        Ok(())
    }

    async fn delete(&self, id: StockItemId) -> DomainResult<StockItem> {
        let mut rows = self.write()?;
        let removed = rows
            .items
            .remove(&id)
            .ok_or_else(|| DomainError::item_not_found(format!("item={id}")))?;
        rows.by_product.remove(&removed.product_id());
        Ok(removed)
    }

    async fn increment_version(&self, id: StockItemId) -> DomainResult<StockItem> {
        let now = self.clock.now();
        let mut rows = self.write()?;
        let stored = rows
            .items
            .get_mut(&id)
            .ok_or_else(|| DomainError::item_not_found(format!("item={id}")))?;
        let next = stored.version() + 1;
        stored.mark_persisted(next, now);
        Ok(stored.clone())
    }
}

#[derive(Debug, Default)]
struct ReservationRows {
    reservations: HashMap<ReservationId, Reservation>,
    by_order: HashMap<OrderId, ReservationId>,
}

/// In-memory reservation store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    rows: RwLock<ReservationRows>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, ReservationRows>> {
        self.rows.read().map_err(|_| poisoned())
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, ReservationRows>> {
        self.rows.write().map_err(|_| poisoned())
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn load(&self, id: ReservationId) -> DomainResult<Reservation> {
        self.read()?
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::reservation_not_found(format!("reservation={id}")))
    }

    async fn load_by_order_id(&self, order_id: OrderId) -> DomainResult<Option<Reservation>> {
        let rows = self.read()?;
        Ok(rows
            .by_order
            .get(&order_id)
            .and_then(|id| rows.reservations.get(id))
            .cloned())
    }

    async fn save(&self, reservation: &Reservation) -> DomainResult<()> {
        let mut rows = self.write()?;
        if rows.reservations.contains_key(&reservation.id())
            || rows.by_order.contains_key(&reservation.order_id())
        {
            return Err(DomainError::reservation_already_exists(format!(
                "reservation={} order={}",
                reservation.id(),
                reservation.order_id()
            )));
        }
        rows.by_order.insert(reservation.order_id(), reservation.id());
        rows.reservations.insert(reservation.id(), reservation.clone());
        Ok(())
    }

    async fn update(&self, reservation: &Reservation) -> DomainResult<()> {
        let mut rows = self.write()?;
        let stored = rows.reservations.get_mut(&reservation.id()).ok_or_else(|| {
            DomainError::reservation_not_found(format!("reservation={}", reservation.id()))
        })?;
        *stored = reservation.clone();
        Ok(())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<Reservation>> {
        let rows = self.read()?;
        let mut expired: Vec<Reservation> = rows
            .reservations
            .values()
            .filter(|r| r.status() == ReservationStatus::Pending && r.expires_at() < now)
            .cloned()
            .collect();
        expired.sort_by_key(|r| (r.expires_at(), r.id()));
        if limit > 0 {
            expired.truncate(limit);
        }
        Ok(expired)
    }

    async fn find_by_item_id(
        &self,
        item_id: StockItemId,
        status: Option<ReservationStatus>,
    ) -> DomainResult<Vec<Reservation>> {
        let rows = self.read()?;
        let mut matching: Vec<Reservation> = rows
            .reservations
            .values()
            .filter(|r| r.item_id() == item_id && status.is_none_or(|s| r.status() == s))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.created_at(), r.id()));
        Ok(matching)
    }

    async fn count_by_status(&self, status: ReservationStatus) -> DomainResult<u64> {
        Ok(self
            .read()?
            .reservations
            .values()
            .filter(|r| r.status() == status)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockledger_core::{ErrorCode, FixedClock};
    use stockledger_inventory::default_reservation_ttl;

    fn test_item(quantity: i64) -> StockItem {
        StockItem::new(StockItemId::new(), ProductId::new(), quantity, Utc::now()).unwrap()
    }

    fn test_reservation(item_id: StockItemId, now: DateTime<Utc>, ttl: Duration) -> Reservation {
        Reservation::new(ReservationId::new(), item_id, OrderId::new(), 2, ttl, now).unwrap()
    }

    #[tokio::test]
    async fn save_enforces_product_uniqueness() {
        let store = InMemoryLedgerStore::new();
        let item = test_item(10);
        store.save(&item).await.unwrap();

        let twin = StockItem::new(StockItemId::new(), item.product_id(), 5, Utc::now()).unwrap();
        let err = store.save(&twin).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ItemAlreadyExists);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_bumps_version_and_advances_the_caller_copy() {
        let store = InMemoryLedgerStore::new();
        let item = test_item(10);
        store.save(&item).await.unwrap();

        let mut loaded = store.load(item.id()).await.unwrap();
        loaded.reserve(3).unwrap();
        store.update(&mut loaded).await.unwrap();
        assert_eq!(loaded.version(), 2);

        let stored = store.load(item.id()).await.unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.reserved(), 3);
    }

    #[tokio::test]
    async fn concurrent_updates_from_same_version_let_exactly_one_win() {
        let store = InMemoryLedgerStore::arc();
        let item = test_item(100);
        store.save(&item).await.unwrap();

        let mut first = store.load(item.id()).await.unwrap();
        let mut second = store.load(item.id()).await.unwrap();
        first.reserve(10).unwrap();
        second.reserve(30).unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.update(&mut first).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.update(&mut second).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.code(), ErrorCode::VersionConflict);

        let winning_delta = if results[0].is_ok() { 10 } else { 30 };
        let stored = store.load(item.id()).await.unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.reserved(), winning_delta);
        assert_eq!(stored.quantity(), 100);
    }

    #[tokio::test]
    async fn update_distinguishes_missing_row_from_conflict() {
        let store = InMemoryLedgerStore::new();
        let mut ghost = test_item(1);
        assert_eq!(
            store.update(&mut ghost).await.unwrap_err().code(),
            ErrorCode::ItemNotFound
        );

        let item = test_item(5);
        store.save(&item).await.unwrap();
        store.increment_version(item.id()).await.unwrap();

        let mut stale = item.clone();
        assert_eq!(
            store.update(&mut stale).await.unwrap_err().code(),
            ErrorCode::VersionConflict
        );
        assert_eq!(stale.version(), 1);
    }

    #[tokio::test]
    async fn low_stock_is_ordered_by_available_and_limited() {
        let store = InMemoryLedgerStore::new();
        for (quantity, reserve) in [(10, 8), (4, 0), (50, 0), (3, 3)] {
            let mut item = test_item(quantity);
            if reserve > 0 {
                item.reserve(reserve).unwrap();
            }
            store.save(&item).await.unwrap();
        }

        let low = store.find_low_stock(5, 0).await.unwrap();
        let available: Vec<i64> = low.iter().map(StockItem::available).collect();
        assert_eq!(available, vec![0, 2, 4]);

        let limited = store.find_low_stock(5, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn delete_frees_the_product_id() {
        let store = InMemoryLedgerStore::new();
        let item = test_item(5);
        store.save(&item).await.unwrap();

        let removed = store.delete(item.id()).await.unwrap();
        assert_eq!(removed.id(), item.id());
        assert!(!store.exists_by_product_id(item.product_id()).await.unwrap());
        assert_eq!(
            store.find_by_product_id(item.product_id()).await.unwrap_err().code(),
            ErrorCode::ProductNotFound
        );
    }

    #[tokio::test]
    async fn update_stamps_updated_at_from_clock() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryLedgerStore::with_clock(clock.clone());
        let item = test_item(5);
        store.save(&item).await.unwrap();

        clock.advance(Duration::minutes(3));
        let mut loaded = store.load(item.id()).await.unwrap();
        loaded.add_stock(1).unwrap();
        store.update(&mut loaded).await.unwrap();
        assert_eq!(loaded.updated_at(), clock.now());
    }

    #[tokio::test]
    async fn reservation_save_rejects_duplicate_order() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let first = test_reservation(StockItemId::new(), now, default_reservation_ttl());
        store.save(&first).await.unwrap();

        let duplicate = Reservation::new(
            ReservationId::new(),
            first.item_id(),
            first.order_id(),
            1,
            default_reservation_ttl(),
            now,
        )
        .unwrap();
        assert_eq!(
            store.save(&duplicate).await.unwrap_err().code(),
            ErrorCode::ReservationAlreadyExists
        );
        assert_eq!(
            store.load_by_order_id(first.order_id()).await.unwrap().unwrap().id(),
            first.id()
        );
    }

    #[tokio::test]
    async fn find_expired_returns_pending_rows_soonest_first() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let item_id = StockItemId::new();

        let older = test_reservation(item_id, now - Duration::hours(2), Duration::minutes(10));
        let newer = test_reservation(item_id, now - Duration::hours(1), Duration::minutes(10));
        let live = test_reservation(item_id, now, Duration::minutes(10));
        let mut confirmed = test_reservation(item_id, now - Duration::hours(3), Duration::minutes(10));
        confirmed.confirm(now - Duration::hours(3)).unwrap();

        for r in [&newer, &live, &older, &confirmed] {
            store.save(r).await.unwrap();
        }

        let expired = store.find_expired(now, 0).await.unwrap();
        let ids: Vec<ReservationId> = expired.iter().map(Reservation::id).collect();
        assert_eq!(ids, vec![older.id(), newer.id()]);

        assert_eq!(store.find_expired(now, 1).await.unwrap().len(), 1);
        assert_eq!(
            store
                .find_by_item_id(item_id, Some(ReservationStatus::Pending))
                .await
                .unwrap()
                .len(),
            3
        );
        assert_eq!(
            store.count_by_status(ReservationStatus::Confirmed).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn reservation_update_requires_existing_row() {
        let store = InMemoryReservationStore::new();
        let r = test_reservation(StockItemId::new(), Utc::now(), default_reservation_ttl());
        assert_eq!(
            store.update(&r).await.unwrap_err().code(),
            ErrorCode::ReservationNotFound
        );
    }
}
