//! Infrastructure layer: stores, cache, event publishing, workflows, sweeper, config.

pub mod cache;
pub mod config;
pub mod publish;
pub mod store;
pub mod sweeper;
pub mod workflows;

mod integration_tests;

pub use cache::{Cache, CacheConfig, CacheError, CachedLedgerStore, InMemoryCache};
pub use config::{ConfigError, Settings};
pub use publish::{
    InMemoryStockEventPublisher, PublishError, StockEventPublisher, TracingStockEventPublisher,
};
pub use store::{
    InMemoryLedgerStore, InMemoryReservationStore, LedgerStore, PostgresLedgerStore,
    PostgresReservationStore, ReservationStore,
};
pub use sweeper::{
    ExpirationSweeper, SweepFailure, SweepSummary, SweeperConfig, SweeperHandle,
    SweeperStatsSnapshot,
};
pub use workflows::{
    Availability, ReservationConfig, ReservationCounts, ReservationService, ReserveOutcome,
};
