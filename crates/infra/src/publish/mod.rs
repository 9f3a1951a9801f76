//! Outbound stock notifications.
//!
//! Delivery is best-effort: the sweeper logs a [`PublishError`] and moves on.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockledger_inventory::StockReleased;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_pubsub;

pub use in_memory::{InMemoryStockEventPublisher, TracingStockEventPublisher};
#[cfg(feature = "redis")]
pub use redis_pubsub::RedisStockEventPublisher;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event transport failed: {0}")]
    Transport(String),

    #[error("event could not be serialized: {0}")]
    Serialize(String),
}

/// Sink for `inventory.stock.released` notifications.
#[async_trait]
pub trait StockEventPublisher: Send + Sync {
    async fn publish_stock_released(&self, event: &StockReleased) -> Result<(), PublishError>;
}

#[async_trait]
impl<P> StockEventPublisher for Arc<P>
where
    P: StockEventPublisher + ?Sized,
{
    async fn publish_stock_released(&self, event: &StockReleased) -> Result<(), PublishError> {
        (**self).publish_stock_released(event).await
    }
}
