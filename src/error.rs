use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::BookingStatus;

/// Every failure the booking core can report. Each variant maps to a stable
/// machine-readable [`code`](BookingError::code); `Display` is the
/// human-readable message.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("dates overlap existing calendar event {0}")]
    Conflict(Ulid),

    #[error("invalid date range [{start}, {end})")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("stay of {nights} nights is shorter than the {min_nights}-night minimum")]
    MinStayViolation { nights: u32, min_nights: u32 },

    #[error("villa {0} is not open for booking")]
    VillaUnavailable(Ulid),

    #[error("payment authorization failed: {0}")]
    PaymentAuthorization(String),

    #[error("payment capture failed: {0}")]
    PaymentCapture(String),

    #[error("cannot {action} a booking that is {current}")]
    InvalidState {
        current: BookingStatus,
        action: &'static str,
    },

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("not allowed: {0}")]
    Forbidden(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Conflict(_) => "conflict",
            BookingError::InvalidRange { .. } => "invalid_range",
            BookingError::MinStayViolation { .. } => "min_stay_violation",
            BookingError::VillaUnavailable(_) => "villa_unavailable",
            BookingError::PaymentAuthorization(_) => "payment_authorization_failed",
            BookingError::PaymentCapture(_) => "payment_capture_failed",
            BookingError::InvalidState { .. } => "invalid_state",
            BookingError::NotFound(_) => "not_found",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::Validation(_) => "validation_failed",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::Internal(_) => "internal",
        }
    }

    /// Whether the same call may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::PaymentCapture(_) | BookingError::Internal(_)
        )
    }

    pub(crate) fn journal(e: impl std::fmt::Display) -> Self {
        BookingError::Internal(format!("journal: {e}"))
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(e: validator::ValidationErrors) -> Self {
        BookingError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BookingError::Conflict(Ulid::nil()).code(), "conflict");
        assert_eq!(
            BookingError::MinStayViolation { nights: 2, min_nights: 5 }.code(),
            "min_stay_violation"
        );
        assert_eq!(BookingError::Internal("x".into()).code(), "internal");
    }

    #[test]
    fn messages_are_readable() {
        let e = BookingError::InvalidState {
            current: BookingStatus::Cancelled,
            action: "confirm",
        };
        assert_eq!(e.to_string(), "cannot confirm a booking that is cancelled");
        let e = BookingError::MinStayViolation { nights: 2, min_nights: 5 };
        assert_eq!(
            e.to_string(),
            "stay of 2 nights is shorter than the 5-night minimum"
        );
    }

    #[test]
    fn retryable_only_for_transient_failures() {
        assert!(BookingError::PaymentCapture("timeout".into()).is_retryable());
        assert!(!BookingError::Conflict(Ulid::nil()).is_retryable());
        assert!(!BookingError::PaymentAuthorization("declined".into()).is_retryable());
    }
}
