//! Inventory ledger domain.
//!
//! Pure entities for the stock ledger and its reservations (no IO, no
//! storage, no clock reads). Persistence and orchestration live in
//! `stockledger-infra`.

pub mod events;
pub mod item;
pub mod reservation;

pub use events::{ReleaseReason, StockReleased};
pub use item::StockItem;
pub use reservation::{
    DEFAULT_RESERVATION_TTL_SECS, Reservation, ReservationStatus, default_reservation_ttl,
};
