//! Domain error model.
//!
//! Every failure carries a stable [`ErrorCode`]. The category a failure
//! belongs to (validation, not-found, conflict, ...) is derived from that code,
//! so membership checks keep working after an error has been serialized and
//! deserialized on the other side of a process boundary.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse classification of a failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input (non-positive quantity, zero duration, ...).
    Validation,
    /// Item, product, or reservation does not exist.
    NotFound,
    /// Version mismatch or uniqueness violation.
    Conflict,
    /// The request is well-formed but the current state forbids it.
    BusinessRule,
    /// Time-based rejection (reservation TTL elapsed / not yet elapsed).
    Expired,
    /// Storage failures, corrupted records, runtime problems.
    Internal,
}

/// Stable machine-readable error code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidQuantity,
    InvalidDuration,
    ItemNotFound,
    ProductNotFound,
    ReservationNotFound,
    VersionConflict,
    ItemAlreadyExists,
    ReservationAlreadyExists,
    InsufficientStock,
    InvalidRelease,
    InvalidConfirm,
    ReservationNotPending,
    ReservationExpired,
    ReservationNotExpired,
    SweepInProgress,
    SweepTimedOut,
    StorageFailure,
    CorruptRecord,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 18] = [
        ErrorCode::InvalidQuantity,
        ErrorCode::InvalidDuration,
        ErrorCode::ItemNotFound,
        ErrorCode::ProductNotFound,
        ErrorCode::ReservationNotFound,
        ErrorCode::VersionConflict,
        ErrorCode::ItemAlreadyExists,
        ErrorCode::ReservationAlreadyExists,
        ErrorCode::InsufficientStock,
        ErrorCode::InvalidRelease,
        ErrorCode::InvalidConfirm,
        ErrorCode::ReservationNotPending,
        ErrorCode::ReservationExpired,
        ErrorCode::ReservationNotExpired,
        ErrorCode::SweepInProgress,
        ErrorCode::SweepTimedOut,
        ErrorCode::StorageFailure,
        ErrorCode::CorruptRecord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidQuantity => "INVALID_QUANTITY",
            ErrorCode::InvalidDuration => "INVALID_DURATION",
            ErrorCode::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorCode::ProductNotFound => "PRODUCT_NOT_FOUND",
            ErrorCode::ReservationNotFound => "RESERVATION_NOT_FOUND",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::ItemAlreadyExists => "ITEM_ALREADY_EXISTS",
            ErrorCode::ReservationAlreadyExists => "RESERVATION_ALREADY_EXISTS",
            ErrorCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCode::InvalidRelease => "INVALID_RELEASE",
            ErrorCode::InvalidConfirm => "INVALID_CONFIRM",
            ErrorCode::ReservationNotPending => "RESERVATION_NOT_PENDING",
            ErrorCode::ReservationExpired => "RESERVATION_EXPIRED",
            ErrorCode::ReservationNotExpired => "RESERVATION_NOT_EXPIRED",
            ErrorCode::SweepInProgress => "SWEEP_IN_PROGRESS",
            ErrorCode::SweepTimedOut => "SWEEP_TIMED_OUT",
            ErrorCode::StorageFailure => "STORAGE_FAILURE",
            ErrorCode::CorruptRecord => "CORRUPT_RECORD",
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidQuantity | ErrorCode::InvalidDuration => ErrorCategory::Validation,
            ErrorCode::ItemNotFound | ErrorCode::ProductNotFound | ErrorCode::ReservationNotFound => {
                ErrorCategory::NotFound
            }
            ErrorCode::VersionConflict
            | ErrorCode::ItemAlreadyExists
            | ErrorCode::ReservationAlreadyExists
            | ErrorCode::SweepInProgress => ErrorCategory::Conflict,
            ErrorCode::InsufficientStock
            | ErrorCode::InvalidRelease
            | ErrorCode::InvalidConfirm
            | ErrorCode::ReservationNotPending => ErrorCategory::BusinessRule,
            ErrorCode::ReservationExpired | ErrorCode::ReservationNotExpired => ErrorCategory::Expired,
            ErrorCode::SweepTimedOut | ErrorCode::StorageFailure | ErrorCode::CorruptRecord => {
                ErrorCategory::Internal
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| DomainError::corrupt_record(format!("unknown error code '{s}'")))
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic business failures plus the storage
/// failures the ports can report. Cache and event-publishing problems are
/// absorbed by the infrastructure layer and never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct DomainError {
    code: ErrorCode,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl DomainError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach contextual detail (ids, quantities) without changing the message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.category() == ErrorCategory::Conflict
    }

    pub fn is_business_rule(&self) -> bool {
        self.category() == ErrorCategory::BusinessRule
    }

    pub fn is_expired(&self) -> bool {
        self.category() == ErrorCategory::Expired
    }

    pub fn is_internal(&self) -> bool {
        self.category() == ErrorCategory::Internal
    }

    pub fn invalid_quantity(quantity: i64) -> Self {
        Self::new(ErrorCode::InvalidQuantity, "quantity must be positive")
            .with_detail(format!("quantity={quantity}"))
    }

    pub fn invalid_duration(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDuration, msg)
    }

    pub fn item_not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ItemNotFound, "stock item not found").with_detail(detail)
    }

    pub fn product_not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProductNotFound, "no stock item for product").with_detail(detail)
    }

    pub fn reservation_not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReservationNotFound, "reservation not found").with_detail(detail)
    }

    pub fn version_conflict(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VersionConflict,
            "optimistic concurrency check failed",
        )
        .with_detail(detail)
    }

    pub fn item_already_exists(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ItemAlreadyExists,
            "stock item already exists for product",
        )
        .with_detail(detail)
    }

    pub fn reservation_already_exists(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ReservationAlreadyExists,
            "reservation already exists for order",
        )
        .with_detail(detail)
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::new(ErrorCode::InsufficientStock, "insufficient stock")
            .with_detail(format!("requested={requested} available={available}"))
    }

    pub fn invalid_release(requested: i64, reserved: i64) -> Self {
        Self::new(
            ErrorCode::InvalidRelease,
            "cannot release more than reserved",
        )
        .with_detail(format!("requested={requested} reserved={reserved}"))
    }

    pub fn invalid_confirm(requested: i64, reserved: i64) -> Self {
        Self::new(
            ErrorCode::InvalidConfirm,
            "cannot confirm more than reserved",
        )
        .with_detail(format!("requested={requested} reserved={reserved}"))
    }

    pub fn reservation_not_pending(status: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReservationNotPending, "reservation is not pending")
            .with_detail(format!("status={}", status.into()))
    }

    pub fn reservation_expired(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReservationExpired, "reservation has expired").with_detail(detail)
    }

    pub fn reservation_not_expired(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ReservationNotExpired,
            "reservation has not expired yet",
        )
        .with_detail(detail)
    }

    pub fn sweep_in_progress(sweeper: impl Into<String>) -> Self {
        Self::new(ErrorCode::SweepInProgress, "a sweep is already running")
            .with_detail(format!("sweeper={}", sweeper.into()))
    }

    pub fn sweep_timed_out(timeout_ms: u128) -> Self {
        Self::new(ErrorCode::SweepTimedOut, "sweep exceeded its tick timeout")
            .with_detail(format!("timeout_ms={timeout_ms}"))
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageFailure, msg)
    }

    pub fn corrupt_record(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::CorruptRecord, msg)
    }
}
