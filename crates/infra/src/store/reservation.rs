use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockledger_core::{DomainResult, OrderId, ReservationId, StockItemId};
use stockledger_inventory::{Reservation, ReservationStatus};

/// Persistence port for reservations.
///
/// Unlike the ledger there is no version check on `update`: a reservation row
/// is only mutated by the workflow that currently owns it.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Load by id (`RESERVATION_NOT_FOUND`).
    async fn load(&self, id: ReservationId) -> DomainResult<Reservation>;

    /// The reservation held for `order_id`, if any (at most one exists).
    async fn load_by_order_id(&self, order_id: OrderId) -> DomainResult<Option<Reservation>>;

    /// Insert (`RESERVATION_ALREADY_EXISTS` on duplicate id or order id).
    async fn save(&self, reservation: &Reservation) -> DomainResult<()>;

    /// Overwrite (`RESERVATION_NOT_FOUND` when the id is missing).
    async fn update(&self, reservation: &Reservation) -> DomainResult<()>;

    /// Pending reservations with `expires_at < now`, soonest-expired first.
    /// `limit == 0` means unbounded.
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<Reservation>>;

    /// Reservations against one item, oldest first, optionally filtered by status.
    async fn find_by_item_id(
        &self,
        item_id: StockItemId,
        status: Option<ReservationStatus>,
    ) -> DomainResult<Vec<Reservation>>;

    async fn count_by_status(&self, status: ReservationStatus) -> DomainResult<u64>;
}

#[async_trait]
impl<S> ReservationStore for Arc<S>
where
    S: ReservationStore + ?Sized,
{
    async fn load(&self, id: ReservationId) -> DomainResult<Reservation> {
        (**self).load(id).await
    }

    async fn load_by_order_id(&self, order_id: OrderId) -> DomainResult<Option<Reservation>> {
        (**self).load_by_order_id(order_id).await
    }

    async fn save(&self, reservation: &Reservation) -> DomainResult<()> {
        (**self).save(reservation).await
    }

    async fn update(&self, reservation: &Reservation) -> DomainResult<()> {
        (**self).update(reservation).await
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<Reservation>> {
        (**self).find_expired(now, limit).await
    }

    async fn find_by_item_id(
        &self,
        item_id: StockItemId,
        status: Option<ReservationStatus>,
    ) -> DomainResult<Vec<Reservation>> {
        (**self).find_by_item_id(item_id, status).await
    }

    async fn count_by_status(&self, status: ReservationStatus) -> DomainResult<u64> {
        (**self).count_by_status(status).await
    }
}
