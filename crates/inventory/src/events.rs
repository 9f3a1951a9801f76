//! Outbound notifications about ledger changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{OrderId, ProductId, ReservationId, StockItemId};

use crate::reservation::Reservation;

/// Why reserved units went back to the available pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    ReservationExpired,
}

/// Event: reserved units were returned to the available pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub reservation_id: ReservationId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub reason: ReleaseReason,
    pub occurred_at: DateTime<Utc>,
}

impl StockReleased {
    pub const EVENT_TYPE: &'static str = "inventory.stock.released";

    pub fn for_reservation(
        reservation: &Reservation,
        product_id: ProductId,
        reason: ReleaseReason,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id: reservation.id(),
            item_id: reservation.item_id(),
            product_id,
            order_id: reservation.order_id(),
            quantity: reservation.quantity(),
            reason,
            occurred_at,
        }
    }

    pub fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }
}
