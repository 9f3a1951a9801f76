//! Redis pub/sub publisher (optional, feature `redis`).
//!
//! Pub/sub is not durable: subscribers that are offline miss the message.
//! That matches the fire-and-forget contract of stock notifications.

use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use serde::Serialize;

use stockledger_inventory::StockReleased;

use super::{PublishError, StockEventPublisher};

/// Wire envelope: `{"event_type": "...", "payload": {...}}`.
#[derive(Serialize)]
struct Envelope<'a> {
    event_type: &'a str,
    payload: &'a StockReleased,
}

#[derive(Clone)]
pub struct RedisStockEventPublisher {
    conn: ConnectionManager,
    channel: String,
}

impl RedisStockEventPublisher {
    pub async fn connect(
        redis_url: impl AsRef<str>,
        channel: impl Into<String>,
    ) -> Result<Self, PublishError> {
        let client = ::redis::Client::open(redis_url.as_ref())
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self::from_manager(conn, channel))
    }

    pub fn from_manager(conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl core::fmt::Debug for RedisStockEventPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStockEventPublisher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StockEventPublisher for RedisStockEventPublisher {
    async fn publish_stock_released(&self, event: &StockReleased) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&Envelope {
            event_type: event.event_type(),
            payload: event,
        })
        .map_err(|e| PublishError::Serialize(e.to_string()))?;

        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(())
    }
}
