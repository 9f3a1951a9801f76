//! Reservation workflows: reserve, confirm, release, plus stock administration.
//!
//! Each workflow loads entities, mutates copies in memory and writes them back
//! (ledger first, reservation second). The ledger write is the optimistic
//! lock; a `VERSION_CONFLICT` means the caller should rerun the whole
//! workflow. The two writes are not atomic: if the reservation write fails
//! after the ledger write succeeded, the item's `reserved` count no longer
//! matches the reservation rows. That case is logged at `error!`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use stockledger_core::{
    Clock, DomainError, DomainResult, OrderId, ProductId, ReservationId, StockItemId,
};
use stockledger_inventory::{Reservation, ReservationStatus, StockItem, default_reservation_ttl};

use crate::store::{LedgerStore, ReservationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// TTL applied when `reserve` is called without one.
    pub default_ttl: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_reservation_ttl(),
        }
    }
}

impl ReservationConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Result of a successful `reserve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReserveOutcome {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
    /// Units still available on the item after this reservation.
    pub available: i64,
}

/// Stock position of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved: i64,
    pub available: i64,
    pub version: u64,
}

impl From<&StockItem> for Availability {
    fn from(item: &StockItem) -> Self {
        Self {
            item_id: item.id(),
            product_id: item.product_id(),
            quantity: item.quantity(),
            reserved: item.reserved(),
            available: item.available(),
            version: item.version(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReservationCounts {
    pub pending: u64,
    pub confirmed: u64,
    pub released: u64,
    pub expired: u64,
}

/// How a pending reservation leaves `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Confirm,
    Release,
    Expire,
}

impl Settlement {
    fn as_str(self) -> &'static str {
        match self {
            Settlement::Confirm => "confirm",
            Settlement::Release => "release",
            Settlement::Expire => "expire",
        }
    }
}

/// Orchestrates the ledger and reservation stores.
pub struct ReservationService<L, R> {
    ledger: L,
    reservations: R,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl<L, R> ReservationService<L, R>
where
    L: LedgerStore,
    R: ReservationStore,
{
    pub fn new(ledger: L, reservations: R, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(ledger, reservations, clock, ReservationConfig::default())
    }

    pub fn with_config(
        ledger: L,
        reservations: R,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            ledger,
            reservations,
            clock,
            config,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn reservations(&self) -> &R {
        &self.reservations
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Claim `quantity` units of `product_id` for `order_id`.
    ///
    /// At most one reservation exists per order, so retrying a reserve that
    /// already went through fails with `RESERVATION_ALREADY_EXISTS` instead of
    /// double-booking.
    ///
    /// That guarantee holds for sequential retries only. The order lookup and
    /// the reservation write are separate calls, so two concurrent reserves for
    /// the same order can both pass the lookup and both bump `reserved`; the
    /// loser's `save` then fails on the unique order id with its ledger
    /// increment already written. This is the same non-atomic gap described in
    /// the module docs.
    pub async fn reserve(
        &self,
        product_id: ProductId,
        order_id: OrderId,
        quantity: i64,
        ttl: Option<Duration>,
    ) -> DomainResult<ReserveOutcome> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity(quantity));
        }

        if let Some(existing) = self.reservations.load_by_order_id(order_id).await? {
            return Err(DomainError::reservation_already_exists(format!(
                "order={order_id} reservation={}",
                existing.id()
            )));
        }

        let mut item = self.ledger.find_by_product_id(product_id).await?;
        item.reserve(quantity)?;

        let now = self.clock.now();
        let reservation = Reservation::new(
            ReservationId::new(),
            item.id(),
            order_id,
            quantity,
            ttl.unwrap_or(self.config.default_ttl),
            now,
        )?;

        self.ledger.update(&mut item).await?;

        if let Err(e) = self.reservations.save(&reservation).await {
            error!(
                item_id = %item.id(),
                order_id = %order_id,
                quantity,
                error = %e,
                "reservation write failed after ledger update; reserved count is now ahead of reservations"
            );
            return Err(e);
        }

        info!(
            reservation_id = %reservation.id(),
            item_id = %item.id(),
            order_id = %order_id,
            quantity,
            available = item.available(),
            "stock reserved"
        );

        Ok(ReserveOutcome {
            reservation_id: reservation.id(),
            expires_at: reservation.expires_at(),
            available: item.available(),
        })
    }

    /// Permanently deduct the reserved units. Expired reservations cannot be confirmed.
    pub async fn confirm(&self, reservation_id: ReservationId) -> DomainResult<Reservation> {
        let reservation = self.reservations.load(reservation_id).await?;
        let (settled, _item) = self.settle(reservation, Settlement::Confirm).await?;
        Ok(settled)
    }

    /// Return the reserved units to the available pool. Works past expiry.
    pub async fn release(&self, reservation_id: ReservationId) -> DomainResult<Reservation> {
        let reservation = self.reservations.load(reservation_id).await?;
        let (settled, _item) = self.settle(reservation, Settlement::Release).await?;
        Ok(settled)
    }

    /// Mark an expired pending reservation as `Expired` and return its units.
    ///
    /// Used by the sweeper; returns the settled reservation and the item as
    /// persisted.
    pub async fn expire(&self, reservation: Reservation) -> DomainResult<(Reservation, StockItem)> {
        self.settle(reservation, Settlement::Expire).await
    }

    async fn settle(
        &self,
        reservation: Reservation,
        settlement: Settlement,
    ) -> DomainResult<(Reservation, StockItem)> {
        let now = self.clock.now();
        match settlement {
            Settlement::Confirm => reservation.ensure_confirmable(now)?,
            Settlement::Release => reservation.ensure_releasable()?,
            // `mark_expired` below carries the full guard.
            Settlement::Expire => {}
        }

        let item = self.ledger.load(reservation.item_id()).await?;

        // Work on copies; if either transition fails nothing is persisted and
        // the loaded values are simply dropped.
        let mut next = item.clone();
        match settlement {
            Settlement::Confirm => next.confirm_reservation(reservation.quantity())?,
            Settlement::Release | Settlement::Expire => {
                next.release_reservation(reservation.quantity())?
            }
        }

        let mut settled = reservation.clone();
        match settlement {
            Settlement::Confirm => settled.confirm(now)?,
            Settlement::Release => settled.release(now)?,
            Settlement::Expire => settled.mark_expired(now)?,
        }

        self.ledger.update(&mut next).await?;

        if let Err(e) = self.reservations.update(&settled).await {
            error!(
                reservation_id = %settled.id(),
                item_id = %next.id(),
                settlement = settlement.as_str(),
                error = %e,
                "reservation write failed after ledger update; ledger and reservation disagree"
            );
            return Err(e);
        }

        info!(
            reservation_id = %settled.id(),
            item_id = %next.id(),
            settlement = settlement.as_str(),
            quantity = settled.quantity(),
            item_quantity = next.quantity(),
            reserved = next.reserved(),
            "reservation settled"
        );

        Ok((settled, next))
    }

    /// Push the expiry of an active reservation out by `by`.
    pub async fn extend_reservation(
        &self,
        reservation_id: ReservationId,
        by: Duration,
    ) -> DomainResult<Reservation> {
        let mut reservation = self.reservations.load(reservation_id).await?;
        reservation.extend(by, self.clock.now())?;
        self.reservations.update(&reservation).await?;
        debug!(
            reservation_id = %reservation_id,
            expires_at = %reservation.expires_at(),
            "reservation extended"
        );
        Ok(reservation)
    }

    pub async fn get_reservation(&self, reservation_id: ReservationId) -> DomainResult<Reservation> {
        self.reservations.load(reservation_id).await
    }

    /// Open a ledger entry for `product_id`.
    pub async fn create_item(&self, product_id: ProductId, quantity: i64) -> DomainResult<StockItem> {
        let item = StockItem::new(StockItemId::new(), product_id, quantity, self.clock.now())?;
        self.ledger.save(&item).await?;
        info!(item_id = %item.id(), product_id = %product_id, quantity, "stock item created");
        Ok(item)
    }

    /// Receive new units.
    pub async fn add_stock(&self, product_id: ProductId, quantity: i64) -> DomainResult<StockItem> {
        let mut item = self.ledger.find_by_product_id(product_id).await?;
        item.add_stock(quantity)?;
        self.ledger.update(&mut item).await?;
        info!(item_id = %item.id(), added = quantity, quantity = item.quantity(), "stock added");
        Ok(item)
    }

    /// Write off unreserved units.
    pub async fn remove_stock(&self, product_id: ProductId, quantity: i64) -> DomainResult<StockItem> {
        let mut item = self.ledger.find_by_product_id(product_id).await?;
        item.decrement_stock(quantity)?;
        self.ledger.update(&mut item).await?;
        info!(item_id = %item.id(), removed = quantity, quantity = item.quantity(), "stock removed");
        Ok(item)
    }

    pub async fn get_availability(&self, product_id: ProductId) -> DomainResult<Availability> {
        let item = self.ledger.find_by_product_id(product_id).await?;
        Ok(Availability::from(&item))
    }

    /// Items with `available <= threshold`, lowest first; `limit == 0` is unbounded.
    pub async fn low_stock(&self, threshold: i64, limit: usize) -> DomainResult<Vec<Availability>> {
        let items = self.ledger.find_low_stock(threshold, limit).await?;
        Ok(items.iter().map(Availability::from).collect())
    }

    pub async fn reservation_counts(&self) -> DomainResult<ReservationCounts> {
        let mut counts = ReservationCounts::default();
        for status in ReservationStatus::ALL {
            let n = self.reservations.count_by_status(status).await?;
            match status {
                ReservationStatus::Pending => counts.pending = n,
                ReservationStatus::Confirmed => counts.confirmed = n,
                ReservationStatus::Released => counts.released = n,
                ReservationStatus::Expired => counts.expired = n,
            }
        }
        Ok(counts)
    }
}
