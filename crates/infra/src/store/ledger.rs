use std::sync::Arc;

use async_trait::async_trait;

use stockledger_core::{DomainResult, ProductId, StockItemId};
use stockledger_inventory::StockItem;

/// Persistence port for the stock ledger.
///
/// ## Optimistic concurrency
///
/// `update` is a single conditional write: it succeeds only if the stored
/// version still equals `item.version()`, writes the new field values, bumps
/// the stored version by one and advances the in-memory item to match.
/// When nothing matched, implementations distinguish a missing row
/// (`ITEM_NOT_FOUND`) from a row at another version (`VERSION_CONFLICT`).
///
/// Callers treat `VERSION_CONFLICT` as "reload and retry the whole workflow",
/// never as "write the same stale item again". No in-process lock is taken;
/// the conditional write is the only ordering primitive.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load by item id (`ITEM_NOT_FOUND`).
    async fn load(&self, id: StockItemId) -> DomainResult<StockItem>;

    /// Load by product id (`PRODUCT_NOT_FOUND`).
    async fn find_by_product_id(&self, product_id: ProductId) -> DomainResult<StockItem>;

    /// Load every existing item among `ids`; missing ids are skipped.
    async fn find_many(&self, ids: &[StockItemId]) -> DomainResult<Vec<StockItem>>;

    /// Items with `available <= threshold`, ascending by `available`.
    /// `limit == 0` means unbounded.
    async fn find_low_stock(&self, threshold: i64, limit: usize) -> DomainResult<Vec<StockItem>>;

    async fn count(&self) -> DomainResult<u64>;

    async fn exists_by_product_id(&self, product_id: ProductId) -> DomainResult<bool>;

    /// Insert a new item (`ITEM_ALREADY_EXISTS` on duplicate id or product id).
    async fn save(&self, item: &StockItem) -> DomainResult<()>;

    /// Conditional write, see the type-level docs.
    async fn update(&self, item: &mut StockItem) -> DomainResult<()>;

    /// Administrative hard delete; returns the removed row.
    async fn delete(&self, id: StockItemId) -> DomainResult<StockItem>;

    /// Bump the stored version without changing stock, invalidating every
    /// in-flight copy of the item. Returns the item at its new version.
    async fn increment_version(&self, id: StockItemId) -> DomainResult<StockItem>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn load(&self, id: StockItemId) -> DomainResult<StockItem> {
        (**self).load(id).await
    }

    async fn find_by_product_id(&self, product_id: ProductId) -> DomainResult<StockItem> {
        (**self).find_by_product_id(product_id).await
    }

    async fn find_many(&self, ids: &[StockItemId]) -> DomainResult<Vec<StockItem>> {
        (**self).find_many(ids).await
    }

    async fn find_low_stock(&self, threshold: i64, limit: usize) -> DomainResult<Vec<StockItem>> {
        (**self).find_low_stock(threshold, limit).await
    }

    async fn count(&self) -> DomainResult<u64> {
        (**self).count().await
    }

    async fn exists_by_product_id(&self, product_id: ProductId) -> DomainResult<bool> {
        (**self).exists_by_product_id(product_id).await
    }

    async fn save(&self, item: &StockItem) -> DomainResult<()> {
        (**self).save(item).await
    }

    async fn update(&self, item: &mut StockItem) -> DomainResult<()> {
        (**self).update(item).await
    }

    async fn delete(&self, id: StockItemId) -> DomainResult<StockItem> {
        (**self).delete(id).await
    }

    async fn increment_version(&self, id: StockItemId) -> DomainResult<StockItem> {
        (**self).increment_version(id).await
    }
}
