use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::BookingError;

/// Unix milliseconds.
pub type Ms = i64;

/// US cents.
pub type Cents = i64;

/// Half-open date interval `[start, end)`. For a stay, `start` is check-in
/// and `end` is check-out, so every date in the span is one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans coming from outside the core.
    pub fn parse(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if end <= start {
            return Err(BookingError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }

    /// Each night of the span, by date.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d < self.end)
    }
}

/// What a calendar event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarEventKind {
    /// Closed by the host.
    Blocked,
    /// Confirmed stay.
    Booking,
    /// Dates reserved for a booking that has not been confirmed yet.
    ManualHold,
}

impl CalendarEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarEventKind::Blocked => "blocked",
            CalendarEventKind::Booking => "booking",
            CalendarEventKind::ManualHold => "manual_hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Ulid,
    pub villa_id: Ulid,
    pub kind: CalendarEventKind,
    pub span: DateSpan,
    pub booking_id: Option<Ulid>,
    pub note: Option<String>,
    pub created_at: Ms,
}

/// In-memory calendar of one villa.
#[derive(Debug, Clone)]
pub struct VillaCalendar {
    pub villa_id: Ulid,
    /// All events, sorted by `span.start`. Non-overlapping by construction.
    pub events: Vec<CalendarEvent>,
}

impl VillaCalendar {
    pub fn new(villa_id: Ulid) -> Self {
        Self {
            villa_id,
            events: Vec::new(),
        }
    }

    /// Insert event maintaining sort order by span.start.
    pub fn insert_event(&mut self, event: CalendarEvent) {
        let pos = self
            .events
            .binary_search_by_key(&event.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.events.insert(pos, event);
    }

    pub fn remove_event(&mut self, id: Ulid) -> Option<CalendarEvent> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    pub fn get_event_mut(&mut self, id: Ulid) -> Option<&mut CalendarEvent> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    /// Return only events whose span overlaps the query window.
    /// Uses binary search to skip events starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &CalendarEvent> {
        let right_bound = self.events.partition_point(|e| e.span.start < query.end);
        self.events[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Inquiry,
    InProgress,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Inquiry => "inquiry",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// The transition table. Anything not listed is rejected.
    pub fn can_transition_to(&self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Inquiry, InProgress)
                | (Inquiry, Cancelled)
                | (InProgress, Confirmed)
                | (InProgress, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }

    pub fn transition(self, to: BookingStatus) -> Result<BookingStatus, BookingError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(BookingError::InvalidState {
                current: self,
                action: to.verb(),
            })
        }
    }

    /// The action that moves a booking into this status.
    fn verb(&self) -> &'static str {
        match self {
            BookingStatus::Inquiry => "inquire about",
            BookingStatus::InProgress => "hold",
            BookingStatus::Confirmed => "confirm",
            BookingStatus::Cancelled => "cancel",
            BookingStatus::Completed => "complete",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the total is taken when the booking is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPlan {
    /// Whole total up front.
    #[default]
    Full,
    /// Deposit now, the remaining half later.
    Split,
}

impl PaymentPlan {
    /// Amount authorized at hold time and captured on confirm.
    pub fn due_now(&self, total: Cents) -> Cents {
        match self {
            PaymentPlan::Full => total,
            PaymentPlan::Split => total - total / 2,
        }
    }

    /// Balance left after the confirm-time capture.
    pub fn balance_after_confirm(&self, total: Cents) -> Cents {
        total - self.due_now(total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCounts {
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
}

impl GuestCounts {
    /// Infants don't count against villa capacity.
    pub fn occupancy(&self) -> u32 {
        self.adults + self.children
    }
}

/// Cost of a stay. `total` is always the exact sum of the three parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub nights: u32,
    pub nightly: Vec<Cents>,
    pub total_base: Cents,
    pub total_fees: Cents,
    pub total_taxes: Cents,
    pub total: Cents,
}

/// Gateway call recorded before it is made, so a save that fails after the
/// call can be finished on retry instead of repeated blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingPayment {
    /// A capture may have gone through.
    Capture,
    /// A refund of `amount` may have gone through.
    Refund { amount: Cents },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub guest_user_id: Ulid,
    pub villa_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: GuestCounts,
    pub price: PriceBreakdown,
    pub balance: Cents,
    pub refunded: Cents,
    pub status: BookingStatus,
    pub plan: PaymentPlan,
    pub hold_expires_at: Ms,
    pub calendar_event_id: Option<Ulid>,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub pending_payment: Option<PendingPayment>,
    pub contract_signed_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub deleted_at: Option<Ms>,
}

impl Booking {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.check_in, self.check_out)
    }

    /// Amount actually captured and not yet refunded.
    pub fn paid(&self) -> Cents {
        if self.charge_id.is_none() {
            return 0;
        }
        self.plan.due_now(self.price.total) - self.refunded
    }

    pub fn hold_expired(&self, now: Ms) -> bool {
        self.hold_expires_at <= now
    }
}

// ── Villas & pricing rules (catalog snapshots) ───────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Villa {
    pub id: Ulid,
    pub host_user_id: Ulid,
    pub published: bool,
    pub base_price_per_night: Cents,
    pub cleaning_fee: Cents,
    pub service_fee_ratio: f64,
    pub damage_waiver_ratio: f64,
    pub max_guests: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Season,
    Weekend,
    Event,
    MinStay,
    DiscountWeek,
    DiscountMonth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: Ulid,
    pub villa_id: Ulid,
    pub rule_type: RuleType,
    /// Inclusive; `None` is unbounded.
    pub start_date: Option<NaiveDate>,
    /// Inclusive; `None` is unbounded.
    pub end_date: Option<NaiveDate>,
    pub adjustment_fixed: Cents,
    pub adjustment_percent: f64,
    pub min_nights: Option<u32>,
    pub priority: u32,
}

impl PricingRule {
    pub fn covers(&self, d: NaiveDate) -> bool {
        self.start_date.is_none_or(|s| s <= d) && self.end_date.is_none_or(|e| d <= e)
    }

    /// Whether this rule adjusts the price of night `d` of a stay of `nights`.
    pub fn prices_night(&self, d: NaiveDate, nights: i64) -> bool {
        if !self.covers(d) {
            return false;
        }
        match self.rule_type {
            RuleType::Season | RuleType::Event => true,
            RuleType::Weekend => matches!(d.weekday(), Weekday::Fri | Weekday::Sat),
            RuleType::DiscountWeek => nights >= 7,
            RuleType::DiscountMonth => nights >= 28,
            RuleType::MinStay => false,
        }
    }
}

/// Journal record. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CalendarReserved {
        event: CalendarEvent,
    },
    CalendarReleased {
        id: Ulid,
        villa_id: Ulid,
    },
    CalendarPromoted {
        id: Ulid,
        villa_id: Ulid,
        booking_id: Ulid,
    },
    /// Full booking snapshot; the latest one for an id wins.
    BookingSaved {
        booking: Booking,
    },
}
