//! Persistence ports for the ledger and its reservations, plus adapters.
//!
//! - `in_memory`: lock-protected maps for tests/dev
//! - `postgres`: SQLx-backed adapters against the tables in `migrations/`

pub mod in_memory;
pub mod ledger;
pub mod postgres;
pub mod record;
pub mod reservation;

pub use in_memory::{InMemoryLedgerStore, InMemoryReservationStore};
pub use ledger::LedgerStore;
pub use postgres::{PostgresLedgerStore, PostgresReservationStore, migrate};
pub use record::{ReservationRecord, StockItemRecord};
pub use reservation::ReservationStore;
