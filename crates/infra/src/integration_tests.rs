//! Integration tests for the full reservation pipeline.
//!
//! Tests: ReservationService → CachedLedgerStore → InMemoryLedgerStore, plus
//! the expiration sweeper on the same stores.
//!
//! Verifies:
//! - The order-level scenario (reserve, oversell attempt, confirm, reserve again)
//! - Cached reads never serve a stale position after a workflow write
//! - Concurrent reservations on one item: exactly one wins each version

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use stockledger_core::{ErrorCode, FixedClock, OrderId, ProductId};
    use stockledger_inventory::{ReservationStatus, default_reservation_ttl};

    use crate::cache::{CachedLedgerStore, InMemoryCache, item_key, product_key};
    use crate::publish::InMemoryStockEventPublisher;
    use crate::store::{InMemoryLedgerStore, InMemoryReservationStore, LedgerStore};
    use crate::sweeper::{ExpirationSweeper, SweeperConfig};
    use crate::workflows::ReservationService;

    type Ledger = CachedLedgerStore<Arc<InMemoryLedgerStore>, Arc<InMemoryCache>>;
    type Service = ReservationService<Arc<Ledger>, Arc<InMemoryReservationStore>>;

    struct Stack {
        service: Arc<Service>,
        ledger: Arc<Ledger>,
        cache: Arc<InMemoryCache>,
        clock: Arc<FixedClock>,
    }

    fn setup() -> Stack {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(InMemoryCache::new());
        let ledger = Arc::new(CachedLedgerStore::new(
            Arc::new(InMemoryLedgerStore::with_clock(clock.clone())),
            cache.clone(),
        ));
        let service = Arc::new(ReservationService::new(
            ledger.clone(),
            InMemoryReservationStore::arc(),
            clock.clone(),
        ));
        Stack {
            service,
            ledger,
            cache,
            clock,
        }
    }

    #[tokio::test]
    async fn order_scenario_through_the_cache() {
        let stack = setup();
        let product_id = ProductId::new();
        stack.service.create_item(product_id, 100).await.unwrap();

        let order_a = OrderId::new();
        let order_b = OrderId::new();

        let a = stack
            .service
            .reserve(product_id, order_a, 50, None)
            .await
            .unwrap();
        assert_eq!(a.available, 50);

        let err = stack
            .service
            .reserve(product_id, order_b, 60, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientStock);
        let position = stack.service.get_availability(product_id).await.unwrap();
        assert_eq!((position.quantity, position.reserved), (100, 50));

        stack.service.confirm(a.reservation_id).await.unwrap();
        let position = stack.service.get_availability(product_id).await.unwrap();
        assert_eq!((position.quantity, position.reserved), (50, 0));

        let b = stack
            .service
            .reserve(product_id, order_b, 50, None)
            .await
            .unwrap();
        assert_eq!(b.available, 0);
        let position = stack.service.get_availability(product_id).await.unwrap();
        assert_eq!(
            (position.quantity, position.reserved, position.available),
            (50, 50, 0)
        );
    }

    #[tokio::test]
    async fn cached_reads_follow_workflow_writes() {
        let stack = setup();
        let product_id = ProductId::new();
        let item = stack.service.create_item(product_id, 10).await.unwrap();

        // Warm every cached view.
        assert_eq!(stack.service.get_availability(product_id).await.unwrap().available, 10);
        assert!(stack.service.low_stock(10, 0).await.unwrap().len() == 1);
        assert!(stack.cache.contains(&product_key(product_id)));

        stack.service.add_stock(product_id, 90).await.unwrap();
        assert!(!stack.cache.contains(&item_key(item.id())));

        let position = stack.service.get_availability(product_id).await.unwrap();
        assert_eq!(position.quantity, 100);
        assert!(stack.service.low_stock(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversell() {
        let stack = setup();
        let product_id = ProductId::new();
        stack.service.create_item(product_id, 10).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let service = stack.service.clone();
            tasks.push(tokio::spawn(async move {
                service.reserve(product_id, OrderId::new(), 3, None).await
            }));
        }

        let mut booked = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => booked += 3,
                Err(e) => assert!(
                    matches!(
                        e.code(),
                        ErrorCode::VersionConflict | ErrorCode::InsufficientStock
                    ),
                    "unexpected error {e}"
                ),
            }
        }

        let item = stack.ledger.find_by_product_id(product_id).await.unwrap();
        assert!(booked <= 10);
        assert_eq!(item.reserved(), booked);
        assert!(item.reserved() <= item.quantity());
        assert_eq!(
            stack
                .service
                .reservation_counts()
                .await
                .unwrap()
                .pending as i64,
            booked / 3
        );
    }

    #[tokio::test]
    async fn sweep_after_ttl_returns_units_through_the_cache() {
        let stack = setup();
        let product_id = ProductId::new();
        stack.service.create_item(product_id, 10).await.unwrap();
        let r = stack
            .service
            .reserve(product_id, OrderId::new(), 7, None)
            .await
            .unwrap();
        assert_eq!(stack.service.get_availability(product_id).await.unwrap().available, 3);

        stack
            .clock
            .advance(default_reservation_ttl() + Duration::seconds(1));
        let publisher = Arc::new(InMemoryStockEventPublisher::new());
        let sweeper = ExpirationSweeper::new(
            stack.service.clone(),
            publisher.clone(),
            SweeperConfig::default(),
        );
        let summary = sweeper.trigger().await.unwrap();
        assert_eq!(summary.released_ids, vec![r.reservation_id]);

        assert_eq!(
            stack.service.get_availability(product_id).await.unwrap().available,
            10
        );
        assert_eq!(
            stack
                .service
                .get_reservation(r.reservation_id)
                .await
                .unwrap()
                .status(),
            ReservationStatus::Expired
        );
        assert_eq!(publisher.published().len(), 1);
    }
}
