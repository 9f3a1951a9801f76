use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, OrderId, ReservationId, StockItemId};

/// Default time a pending reservation holds its units (15 minutes).
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

pub fn default_reservation_ttl() -> Duration {
    Duration::seconds(DEFAULT_RESERVATION_TTL_SECS)
}

/// Reservation lifecycle status.
///
/// `Pending` is the only non-terminal state; each reservation leaves it
/// exactly once and is never reopened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Released,
        ReservationStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(DomainError::corrupt_record(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// A TTL-bound claim on units of one stock item, held for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: ReservationId,
    item_id: StockItemId,
    order_id: OrderId,
    quantity: i64,
    status: ReservationStatus,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Open a pending reservation expiring `ttl` from `now`.
    pub fn new(
        id: ReservationId,
        item_id: StockItemId,
        order_id: OrderId,
        quantity: i64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity(quantity));
        }
        if ttl <= Duration::zero() {
            return Err(DomainError::invalid_duration("reservation ttl must be positive")
                .with_detail(format!("ttl_ms={}", ttl.num_milliseconds())));
        }
        Ok(Self {
            id,
            item_id,
            order_id,
            quantity,
            status: ReservationStatus::Pending,
            expires_at: now + ttl,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate a reservation from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ReservationId,
        item_id: StockItemId,
        order_id: OrderId,
        quantity: i64,
        status: ReservationStatus,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::corrupt_record("reservation quantity must be positive")
                .with_detail(format!("reservation={id} quantity={quantity}")));
        }
        Ok(Self {
            id,
            item_id,
            order_id,
            quantity,
            status,
            expires_at,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn item_id(&self) -> StockItemId {
        self.item_id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Pending and still within its TTL.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && !self.is_expired(now)
    }

    pub fn can_be_confirmed(&self, now: DateTime<Utc>) -> bool {
        self.is_active(now)
    }

    /// Expiry does not block an explicit release.
    pub fn can_be_released(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    /// Error explaining why the reservation cannot be confirmed, if any.
    pub fn ensure_confirmable(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ReservationStatus::Pending {
            return Err(self.not_pending());
        }
        if self.is_expired(now) {
            return Err(DomainError::reservation_expired(format!(
                "reservation={} expires_at={}",
                self.id,
                self.expires_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    pub fn ensure_releasable(&self) -> DomainResult<()> {
        if !self.can_be_released() {
            return Err(self.not_pending());
        }
        Ok(())
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_confirmable(now)?;
        self.transition(ReservationStatus::Confirmed, now);
        Ok(())
    }

    pub fn release(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_releasable()?;
        self.transition(ReservationStatus::Released, now);
        Ok(())
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ReservationStatus::Pending {
            return Err(self.not_pending());
        }
        if !self.is_expired(now) {
            return Err(DomainError::reservation_not_expired(format!(
                "reservation={} expires_at={}",
                self.id,
                self.expires_at.to_rfc3339()
            )));
        }
        self.transition(ReservationStatus::Expired, now);
        Ok(())
    }

    /// Push the expiry of an active reservation further out.
    pub fn extend(&mut self, by: Duration, now: DateTime<Utc>) -> DomainResult<()> {
        if by <= Duration::zero() {
            return Err(DomainError::invalid_duration("extension must be positive")
                .with_detail(format!("duration_ms={}", by.num_milliseconds())));
        }
        self.ensure_confirmable(now)?;
        self.expires_at += by;
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, to: ReservationStatus, now: DateTime<Utc>) {
        self.status = to;
        self.updated_at = now;
    }

    fn not_pending(&self) -> DomainError {
        DomainError::reservation_not_pending(self.status.as_str())
            .with_detail(format!("reservation={} status={}", self.id, self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::ErrorCode;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn pending(now: DateTime<Utc>) -> Reservation {
        Reservation::new(
            ReservationId::new(),
            StockItemId::new(),
            OrderId::new(),
            5,
            default_reservation_ttl(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn new_reservation_is_pending_with_ttl() {
        let now = test_time();
        let r = pending(now);
        assert_eq!(r.status(), ReservationStatus::Pending);
        assert_eq!(r.expires_at() - now, Duration::minutes(15));
        assert!(r.is_active(now));
    }

    #[test]
    fn rejects_non_positive_quantity_and_ttl() {
        let now = test_time();
        let err = Reservation::new(
            ReservationId::new(),
            StockItemId::new(),
            OrderId::new(),
            0,
            default_reservation_ttl(),
            now,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidQuantity);

        let err = Reservation::new(
            ReservationId::new(),
            StockItemId::new(),
            OrderId::new(),
            1,
            Duration::zero(),
            now,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidDuration);
    }

    #[test]
    fn expiry_is_strictly_after_expires_at() {
        let now = test_time();
        let r = pending(now);
        assert!(!r.is_expired(r.expires_at()));
        assert!(r.is_expired(r.expires_at() + Duration::microseconds(1)));
    }

    #[test]
    fn confirm_requires_active() {
        let now = test_time();
        let mut r = pending(now);
        let late = r.expires_at() + Duration::seconds(1);

        let err = r.confirm(late).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReservationExpired);
        assert_eq!(r.status(), ReservationStatus::Pending);

        r.confirm(now).unwrap();
        assert_eq!(r.status(), ReservationStatus::Confirmed);

        let err = r.confirm(now).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReservationNotPending);
    }

    #[test]
    fn release_ignores_expiry() {
        let now = test_time();
        let mut r = pending(now);
        r.release(r.expires_at() + Duration::hours(1)).unwrap();
        assert_eq!(r.status(), ReservationStatus::Released);
        assert_eq!(
            r.release(now).unwrap_err().code(),
            ErrorCode::ReservationNotPending
        );
    }

    #[test]
    fn mark_expired_requires_elapsed_ttl() {
        let now = test_time();
        let mut r = pending(now);
        assert_eq!(
            r.mark_expired(now).unwrap_err().code(),
            ErrorCode::ReservationNotExpired
        );

        let late = r.expires_at() + Duration::seconds(1);
        r.mark_expired(late).unwrap();
        assert_eq!(r.status(), ReservationStatus::Expired);
        assert_eq!(r.updated_at(), late);

        assert_eq!(
            r.mark_expired(late).unwrap_err().code(),
            ErrorCode::ReservationNotPending
        );
    }

    #[test]
    fn extend_pushes_expiry_of_active_reservation() {
        let now = test_time();
        let mut r = pending(now);
        let before = r.expires_at();
        r.extend(Duration::minutes(5), now).unwrap();
        assert_eq!(r.expires_at() - before, Duration::minutes(5));

        assert_eq!(
            r.extend(Duration::zero(), now).unwrap_err().code(),
            ErrorCode::InvalidDuration
        );

        let late = r.expires_at() + Duration::seconds(1);
        assert_eq!(
            r.extend(Duration::minutes(5), late).unwrap_err().code(),
            ErrorCode::ReservationExpired
        );
    }

    #[test]
    fn terminal_states_are_never_reopened() {
        let now = test_time();
        for terminal in [
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            let mut r = Reservation::restore(
                ReservationId::new(),
                StockItemId::new(),
                OrderId::new(),
                3,
                terminal,
                now - Duration::minutes(1),
                now - Duration::minutes(20),
                now - Duration::minutes(1),
            )
            .unwrap();
            assert!(r.confirm(now).is_err());
            assert!(r.release(now).is_err());
            assert!(r.mark_expired(now).is_err());
            assert_eq!(r.status(), terminal);
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in ReservationStatus::ALL {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert_eq!(
            "cancelled".parse::<ReservationStatus>().unwrap_err().code(),
            ErrorCode::CorruptRecord
        );
    }
}
