//! Key-value cache port and the cache-aside ledger decorator.
//!
//! - `in_memory`: process-local cache for tests/dev
//! - `redis`: Redis-backed cache (feature `redis`)
//! - `ledger`: [`CachedLedgerStore`], read-through / invalidate-on-write over any [`LedgerStore`]
//!
//! [`LedgerStore`]: crate::store::LedgerStore

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use stockledger_core::{ProductId, StockItemId};

pub mod in_memory;
pub mod ledger;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryCache;
pub use ledger::{CacheConfig, CachedLedgerStore};
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Failure talking to the cache. Always absorbed by callers (fail-open).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be encoded or decoded: {0}")]
    Codec(String),
}

/// String-valued cache with TTL expiry and glob-style pattern deletes.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `keys`; missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Remove every key matching a `*`-glob; returns how many were removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

#[async_trait]
impl<C> Cache for Arc<C>
where
    C: Cache + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        (**self).delete(keys).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        (**self).delete_pattern(pattern).await
    }
}

/// Pattern matching every low-stock aggregate key.
pub const LOW_STOCK_PATTERN: &str = "lowstock:*";

pub fn item_key(id: StockItemId) -> String {
    format!("item:id:{id}")
}

pub fn product_key(product_id: ProductId) -> String {
    format!("item:product:{product_id}")
}

pub fn low_stock_key(threshold: i64, limit: usize) -> String {
    format!("lowstock:{threshold}:{limit}")
}
