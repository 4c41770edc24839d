use std::str::FromStr;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::{Booking, Cents};

/// Who is asking for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Guest(Ulid),
    Host(Ulid),
    Admin,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Guest(_) => "guest",
            Actor::Host(_) => "host",
            Actor::Admin => "admin",
        }
    }
}

/// Which actors may cancel at all. A guest must also own the booking and a
/// host must own the villa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationMatrix {
    pub guest: bool,
    pub host: bool,
    pub admin: bool,
}

impl Default for CancellationMatrix {
    fn default() -> Self {
        Self {
            guest: true,
            host: true,
            admin: true,
        }
    }
}

impl CancellationMatrix {
    pub fn authorize(&self, actor: &Actor, booking: &Booking, villa_host: Ulid) -> Result<(), BookingError> {
        match *actor {
            Actor::Guest(_) if !self.guest => Err(BookingError::Forbidden("guests may not cancel")),
            Actor::Host(_) if !self.host => Err(BookingError::Forbidden("hosts may not cancel")),
            Actor::Admin if !self.admin => Err(BookingError::Forbidden("admins may not cancel")),
            Actor::Guest(id) if id != booking.guest_user_id => {
                Err(BookingError::Forbidden("booking belongs to another guest"))
            }
            Actor::Host(id) if id != villa_host => {
                Err(BookingError::Forbidden("villa belongs to another host"))
            }
            _ => Ok(()),
        }
    }
}

/// How much of the captured amount goes back on cancellation.
pub trait RefundPolicy: Send + Sync {
    /// Amount to refund, in cents. Clamped to what was paid by the caller.
    fn refund_amount(&self, booking: &Booking, actor: &Actor, today: NaiveDate) -> Cents;
}

/// Refund everything that was paid.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullRefund;

impl RefundPolicy for FullRefund {
    fn refund_amount(&self, booking: &Booking, _actor: &Actor, _today: NaiveDate) -> Cents {
        booking.paid()
    }
}

/// Refund by notice given before check-in. Host and admin cancellations
/// always refund in full.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TieredRefund {
    /// At least this many days before check-in: full refund.
    pub full_refund_days: i64,
    /// At least this many days before check-in: partial refund.
    pub partial_refund_days: i64,
    pub partial_refund_percent: f64,
}

impl Default for TieredRefund {
    fn default() -> Self {
        Self {
            full_refund_days: 30,
            partial_refund_days: 14,
            partial_refund_percent: 50.0,
        }
    }
}

impl RefundPolicy for TieredRefund {
    fn refund_amount(&self, booking: &Booking, actor: &Actor, today: NaiveDate) -> Cents {
        let paid = booking.paid();
        if !matches!(actor, Actor::Guest(_)) {
            return paid;
        }
        let notice = (booking.check_in - today).num_days();
        if notice >= self.full_refund_days {
            paid
        } else if notice >= self.partial_refund_days {
            (paid as f64 * self.partial_refund_percent / 100.0).round() as Cents
        } else {
            0
        }
    }
}

/// Parses `full` or `tiered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundPolicyKind {
    Full,
    #[default]
    Tiered,
}

impl FromStr for RefundPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "tiered" => Ok(Self::Tiered),
            other => Err(format!("unknown refund policy {other:?}")),
        }
    }
}

/// What a cancellation gave back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundInfo {
    pub booking: Booking,
    /// Gateway refund id; `None` when nothing was refunded.
    pub refund_id: Option<String>,
    pub amount: Cents,
}
