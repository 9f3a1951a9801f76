use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::info;

use stockledger_inventory::StockReleased;

use super::{PublishError, StockEventPublisher};

/// Records published events; can be told to fail.
#[derive(Debug, Default)]
pub struct InMemoryStockEventPublisher {
    published: Mutex<Vec<StockReleased>>,
    failing: AtomicBool,
}

impl InMemoryStockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent publish fails with [`PublishError::Transport`].
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<StockReleased> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StockEventPublisher for InMemoryStockEventPublisher {
    async fn publish_stock_released(&self, event: &StockReleased) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Transport("publisher is failing".to_string()));
        }
        self.published
            .lock()
            .map_err(|_| PublishError::Transport("publisher lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Writes each event to the log instead of a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStockEventPublisher;

#[async_trait]
impl StockEventPublisher for TracingStockEventPublisher {
    async fn publish_stock_released(&self, event: &StockReleased) -> Result<(), PublishError> {
        info!(
            event_type = event.event_type(),
            reservation_id = %event.reservation_id,
            product_id = %event.product_id,
            order_id = %event.order_id,
            quantity = event.quantity,
            reason = ?event.reason,
            "stock released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{OrderId, ProductId, ReservationId, StockItemId};
    use stockledger_inventory::ReleaseReason;

    fn event() -> StockReleased {
        StockReleased {
            reservation_id: ReservationId::new(),
            item_id: StockItemId::new(),
            product_id: ProductId::new(),
            order_id: OrderId::new(),
            quantity: 4,
            reason: ReleaseReason::ReservationExpired,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_until_told_to_fail() {
        let publisher = InMemoryStockEventPublisher::new();
        let first = event();
        publisher.publish_stock_released(&first).await.unwrap();
        assert_eq!(publisher.published(), vec![first]);

        publisher.fail_all();
        assert!(matches!(
            publisher.publish_stock_released(&event()).await,
            Err(PublishError::Transport(_))
        ));
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn tracing_publisher_never_fails() {
        TracingStockEventPublisher
            .publish_stock_released(&event())
            .await
            .unwrap();
    }
}
