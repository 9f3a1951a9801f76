//! Cache-aside decorator over a [`LedgerStore`].
//!
//! Reads check the cache first and populate it on a miss; writes go to the
//! store and then invalidate. The cache is never authoritative: every cache
//! failure is logged and the call proceeds against the store alone.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use stockledger_core::{DomainResult, ProductId, StockItemId};
use stockledger_inventory::StockItem;

use super::{Cache, LOW_STOCK_PATTERN, item_key, low_stock_key, product_key};
use crate::store::{LedgerStore, StockItemRecord};

pub const DEFAULT_ITEM_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_LOW_STOCK_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL of `item:id:*` and `item:product:*` entries.
    pub item_ttl: Duration,
    /// TTL of `lowstock:*` aggregate entries.
    pub low_stock_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            item_ttl: DEFAULT_ITEM_TTL,
            low_stock_ttl: DEFAULT_LOW_STOCK_TTL,
        }
    }
}

impl CacheConfig {
    pub fn with_item_ttl(mut self, ttl: Duration) -> Self {
        self.item_ttl = ttl;
        self
    }

    pub fn with_low_stock_ttl(mut self, ttl: Duration) -> Self {
        self.low_stock_ttl = ttl;
        self
    }
}

/// [`LedgerStore`] that serves reads from a [`Cache`] when it can.
#[derive(Debug)]
pub struct CachedLedgerStore<S, C> {
    inner: S,
    cache: C,
    config: CacheConfig,
}

impl<S, C> CachedLedgerStore<S, C>
where
    S: LedgerStore,
    C: Cache,
{
    pub fn new(inner: S, cache: C) -> Self {
        Self::with_config(inner, cache, CacheConfig::default())
    }

    pub fn with_config(inner: S, cache: C, config: CacheConfig) -> Self {
        Self {
            inner,
            cache,
            config,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn cached_item(&self, key: &str) -> Option<StockItem> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed; falling back to store");
                return None;
            }
        };
        match decode_item(&raw) {
            Ok(item) => Some(item),
            Err(reason) => {
                warn!(key, reason = %reason, "discarding undecodable cache entry");
                self.forget(vec![key.to_string()]).await;
                None
            }
        }
    }

    /// Warm both lookup paths for `item`.
    async fn populate(&self, item: &StockItem) {
        let raw = match serde_json::to_string(&StockItemRecord::from(item)) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(item_id = %item.id(), error = %e, "failed to encode stock item for cache");
                return;
            }
        };
        for key in [item_key(item.id()), product_key(item.product_id())] {
            if let Err(e) = self.cache.set(&key, raw.clone(), self.config.item_ttl).await {
                warn!(key = %key, error = %e, "cache write failed");
            }
        }
    }

    async fn forget(&self, keys: Vec<String>) {
        if let Err(e) = self.cache.delete(&keys).await {
            warn!(keys = ?keys, error = %e, "cache invalidation failed");
        }
    }

    /// Drop both per-item keys and every low-stock aggregate.
    async fn invalidate(&self, id: StockItemId, product_id: ProductId) {
        self.forget(vec![item_key(id), product_key(product_id)]).await;
        match self.cache.delete_pattern(LOW_STOCK_PATTERN).await {
            Ok(removed) => debug!(item_id = %id, removed, "invalidated low-stock aggregates"),
            Err(e) => warn!(item_id = %id, error = %e, "low-stock invalidation failed"),
        }
    }
}

#[async_trait]
impl<S, C> LedgerStore for CachedLedgerStore<S, C>
where
    S: LedgerStore,
    C: Cache,
{
    async fn load(&self, id: StockItemId) -> DomainResult<StockItem> {
        if let Some(item) = self.cached_item(&item_key(id)).await {
            return Ok(item);
        }
        let item = self.inner.load(id).await?;
        self.populate(&item).await;
        Ok(item)
    }

    async fn find_by_product_id(&self, product_id: ProductId) -> DomainResult<StockItem> {
        if let Some(item) = self.cached_item(&product_key(product_id)).await {
            return Ok(item);
        }
        let item = self.inner.find_by_product_id(product_id).await?;
        self.populate(&item).await;
        Ok(item)
    }

    async fn find_many(&self, ids: &[StockItemId]) -> DomainResult<Vec<StockItem>> {
        self.inner.find_many(ids).await
    }

    async fn find_low_stock(&self, threshold: i64, limit: usize) -> DomainResult<Vec<StockItem>> {
        let key = low_stock_key(threshold, limit);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match decode_items(&raw) {
                Ok(items) => return Ok(items),
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache read failed; falling back to store"),
        }

        let items = self.inner.find_low_stock(threshold, limit).await?;
        let records: Vec<StockItemRecord> = items.iter().map(StockItemRecord::from).collect();
        match serde_json::to_string(&records) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, raw, self.config.low_stock_ttl).await {
                    warn!(key = %key, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "failed to encode low-stock result for cache"),
        }
        Ok(items)
    }

    async fn count(&self) -> DomainResult<u64> {
        self.inner.count().await
    }

    async fn exists_by_product_id(&self, product_id: ProductId) -> DomainResult<bool> {
        // A hit proves existence; absence is never cached.
        match self.cache.get(&product_key(product_id)).await {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => {}
            Err(e) => warn!(product_id = %product_id, error = %e, "cache read failed; falling back to store"),
        }
        self.inner.exists_by_product_id(product_id).await
    }

    async fn save(&self, item: &StockItem) -> DomainResult<()> {
        self.inner.save(item).await?;
        self.populate(item).await;
        // A new item may belong in any cached low-stock result.
        match self.cache.delete_pattern(LOW_STOCK_PATTERN).await {
            Ok(_) => {}
            Err(e) => warn!(item_id = %item.id(), error = %e, "low-stock invalidation failed"),
        }
        Ok(())
    }

    async fn update(&self, item: &mut StockItem) -> DomainResult<()> {
        let result = self.inner.update(item).await;
        // Invalidate on conflict too: the cached copy is the stale one.
        if result.is_ok() || result.as_ref().is_err_and(|e| e.is_conflict()) {
            self.invalidate(item.id(), item.product_id()).await;
        }
        result
    }

    async fn delete(&self, id: StockItemId) -> DomainResult<StockItem> {
        let removed = self.inner.delete(id).await?;
        self.invalidate(removed.id(), removed.product_id()).await;
        Ok(removed)
    }

    async fn increment_version(&self, id: StockItemId) -> DomainResult<StockItem> {
        let item = self.inner.increment_version(id).await?;
        self.invalidate(item.id(), item.product_id()).await;
        Ok(item)
    }
}

fn decode_item(raw: &str) -> Result<StockItem, String> {
    let record: StockItemRecord = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    StockItem::try_from(record).map_err(|e| e.to_string())
}

fn decode_items(raw: &str) -> Result<Vec<StockItem>, String> {
    let records: Vec<StockItemRecord> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    records
        .into_iter()
        .map(|r| StockItem::try_from(r).map_err(|e| e.to_string()))
        .collect()
}
