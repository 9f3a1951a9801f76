//! Expiration sweeper.
//!
//! Periodically releases pending reservations whose TTL has elapsed. A tick
//! only fails if the expired-reservation query itself fails; every per-item
//! error is recorded in the [`SweepSummary`] and the batch moves on.
//!
//! Ticks never overlap: a scheduled tick that finds another one running is
//! skipped, a manual [`ExpirationSweeper::trigger`] fails with
//! `SWEEP_IN_PROGRESS`.
//!
//! `tick_timeout` is a budget, not a cancellation: the expired-reservation
//! query is cut off when it exceeds it, but a reservation already being
//! settled always runs to completion. Once the budget is spent no new
//! reservation is started; the rest are reported as deferred and picked up by
//! the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stockledger_core::{DomainError, DomainResult, ErrorCode, ReservationId};
use stockledger_inventory::{ReleaseReason, StockReleased};

use crate::publish::StockEventPublisher;
use crate::store::{LedgerStore, ReservationStore};
use crate::workflows::ReservationService;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_BATCH_LIMIT: usize = 1000;
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Label used in logs and `SWEEP_IN_PROGRESS` details.
    pub name: String,
    pub interval: Duration,
    /// Max reservations handled per tick; `0` means unbounded.
    pub batch_limit: usize,
    pub tick_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            name: "reservation-expiry".to_string(),
            interval: DEFAULT_SWEEP_INTERVAL,
            batch_limit: DEFAULT_BATCH_LIMIT,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
        }
    }
}

impl SweeperConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    pub fn with_tick_timeout(mut self, tick_timeout: Duration) -> Self {
        self.tick_timeout = tick_timeout;
        self
    }
}

/// One reservation the sweeper could not release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub reservation_id: ReservationId,
    pub code: ErrorCode,
    pub reason: String,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub found: usize,
    pub released: usize,
    pub failed: usize,
    /// Found but not started because the tick budget ran out.
    pub deferred: usize,
    pub released_ids: Vec<ReservationId>,
    pub failures: Vec<SweepFailure>,
    pub deferred_ids: Vec<ReservationId>,
    pub elapsed_ms: u64,
}

/// Cumulative counters across ticks.
#[derive(Debug, Default)]
pub struct SweeperStats {
    ticks: AtomicU64,
    skipped: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
    deferred: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStatsSnapshot {
    pub ticks: u64,
    pub skipped: u64,
    pub released: u64,
    pub failed: u64,
    pub deferred: u64,
}

impl SweeperStats {
    pub fn snapshot(&self) -> SweeperStatsSnapshot {
        SweeperStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }

    fn record(&self, summary: &SweepSummary) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.released
            .fetch_add(summary.released as u64, Ordering::Relaxed);
        self.failed.fetch_add(summary.failed as u64, Ordering::Relaxed);
        self.deferred
            .fetch_add(summary.deferred as u64, Ordering::Relaxed);
    }
}

pub struct ExpirationSweeper<L, R, P> {
    service: Arc<ReservationService<L, R>>,
    publisher: P,
    config: SweeperConfig,
    guard: tokio::sync::Mutex<()>,
    stats: Arc<SweeperStats>,
}

impl<L, R, P> ExpirationSweeper<L, R, P>
where
    L: LedgerStore + 'static,
    R: ReservationStore + 'static,
    P: StockEventPublisher + 'static,
{
    pub fn new(service: Arc<ReservationService<L, R>>, publisher: P, config: SweeperConfig) -> Self {
        Self {
            service,
            publisher,
            config,
            guard: tokio::sync::Mutex::new(()),
            stats: Arc::new(SweeperStats::default()),
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    pub fn stats(&self) -> SweeperStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one tick now (the operator "sweep now" action).
    pub async fn trigger(&self) -> DomainResult<SweepSummary> {
        let Ok(_running) = self.guard.try_lock() else {
            return Err(DomainError::sweep_in_progress(&self.config.name));
        };
        self.bounded_sweep().await
    }

    /// Tick driven by the timer; skips when another tick holds the guard.
    async fn scheduled_tick(&self) {
        let Ok(_running) = self.guard.try_lock() else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(sweeper = %self.config.name, "previous sweep still running; skipping tick");
            return;
        };
        if let Err(e) = self.bounded_sweep().await {
            error!(sweeper = %self.config.name, error = %e, "sweep failed");
        }
    }

    async fn bounded_sweep(&self) -> DomainResult<SweepSummary> {
        let summary = self.sweep().await?;
        self.stats.record(&summary);
        Ok(summary)
    }

    async fn sweep(&self) -> DomainResult<SweepSummary> {
        let started = Instant::now();
        let budget = self.config.tick_timeout;
        let deadline = started.checked_add(budget);
        let now = self.service.now();

        // Only the query is cancelled on timeout; it has written nothing yet.
        let expired = tokio::time::timeout(
            budget,
            self.service
                .reservations()
                .find_expired(now, self.config.batch_limit),
        )
        .await
        .map_err(|_| DomainError::sweep_timed_out(budget.as_millis()))??;

        let mut summary = SweepSummary {
            found: expired.len(),
            ..SweepSummary::default()
        };

        if expired.is_empty() {
            summary.elapsed_ms = elapsed_ms(started);
            debug!(sweeper = %self.config.name, "no expired reservations");
            return Ok(summary);
        }

        let mut pending = expired.into_iter();
        while let Some(reservation) = pending.next() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                summary.deferred_ids.push(reservation.id());
                summary.deferred_ids.extend(pending.by_ref().map(|r| r.id()));
                warn!(
                    sweeper = %self.config.name,
                    deferred = summary.deferred_ids.len(),
                    budget_ms = budget.as_millis() as u64,
                    "sweep budget spent; deferring remaining reservations"
                );
                break;
            }
            let reservation_id = reservation.id();
            match self.service.expire(reservation).await {
                Ok((settled, item)) => {
                    summary.released_ids.push(reservation_id);
                    let event = StockReleased::for_reservation(
                        &settled,
                        item.product_id(),
                        ReleaseReason::ReservationExpired,
                        settled.updated_at(),
                    );
                    if let Err(e) = self.publisher.publish_stock_released(&event).await {
                        warn!(
                            reservation_id = %reservation_id,
                            error = %e,
                            "failed to publish stock released event"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        sweeper = %self.config.name,
                        reservation_id = %reservation_id,
                        code = %e.code(),
                        error = %e,
                        "failed to expire reservation"
                    );
                    summary.failures.push(SweepFailure {
                        reservation_id,
                        code: e.code(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.released = summary.released_ids.len();
        summary.failed = summary.failures.len();
        summary.deferred = summary.deferred_ids.len();
        summary.elapsed_ms = elapsed_ms(started);

        info!(
            sweeper = %self.config.name,
            found = summary.found,
            released = summary.released,
            failed = summary.failed,
            deferred = summary.deferred,
            elapsed_ms = summary.elapsed_ms,
            "expired reservations swept"
        );
        Ok(summary)
    }

    /// Start the periodic loop on the current tokio runtime.
    ///
    /// The first tick fires immediately. Cancellation is observed between
    /// ticks, so `shutdown` waits for an in-flight tick to finish the
    /// reservation it is settling.
    pub fn spawn(self: Arc<Self>) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let stats = Arc::clone(&self.stats);
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        SweeperHandle {
            cancel,
            join,
            stats,
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        // `interval` panics on a zero period.
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sweeper = %self.config.name,
            interval_ms = period.as_millis() as u64,
            batch_limit = self.config.batch_limit,
            "expiration sweeper starting"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.scheduled_tick().await,
            }
        }
        info!(sweeper = %self.config.name, "expiration sweeper stopped");
    }
}

/// Handle to a running sweeper loop.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<SweeperStats>,
}

impl SweeperHandle {
    pub fn stats(&self) -> SweeperStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.join.await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
