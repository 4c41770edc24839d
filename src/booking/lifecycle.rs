use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use ulid::Ulid;

use crate::calendar::{CalendarStore, ReserveRequest};
use crate::catalog::VillaCatalog;
use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::BookingError;
use crate::gateway::{PaymentGateway, PaymentMetadata, Refund};
use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::observability::{self, record_operation};
use crate::pricing;
use crate::validate::{BlockRequest, HoldRequest};

use super::policy::{Actor, RefundInfo, RefundPolicy};
use super::repository::BookingRepository;

/// Attempts at saving a booking once a gateway call has gone through.
const SETTLED_SAVE_ATTEMPTS: u32 = 3;

fn refund_key(booking_id: Ulid) -> String {
    format!("refund-{booking_id}")
}

fn payment_failure(call: &'static str) {
    metrics::counter!(observability::PAYMENT_FAILURES_TOTAL, "call" => call).increment(1);
}

/// Drives bookings through hold, confirm, expire, cancel and complete,
/// keeping the calendar and the payment gateway in agreement.
///
/// Every transition of one booking runs under that booking's lock, and the
/// hold deadline is checked inside the same critical section as the status,
/// so a confirm racing an expiry past the deadline can't both win. Gateway
/// calls never run under a villa lock.
pub struct LifecycleManager {
    calendar: Arc<CalendarStore>,
    bookings: Arc<BookingRepository>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<dyn VillaCatalog>,
    clock: Arc<dyn Clock>,
    refund_policy: Arc<dyn RefundPolicy>,
    config: BookingConfig,
}

impl LifecycleManager {
    pub fn new(
        calendar: Arc<CalendarStore>,
        bookings: Arc<BookingRepository>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn VillaCatalog>,
        clock: Arc<dyn Clock>,
        refund_policy: Arc<dyn RefundPolicy>,
        config: BookingConfig,
    ) -> Self {
        Self {
            calendar,
            bookings,
            gateway,
            catalog,
            clock,
            refund_policy,
            config,
        }
    }

    pub fn calendar(&self) -> &Arc<CalendarStore> {
        &self.calendar
    }

    pub fn bookings(&self) -> &Arc<BookingRepository> {
        &self.bookings
    }

    // ── Public operations ─────────────────────────────────────────

    /// Reserve the dates, then authorize the amount due now. A failed
    /// authorization releases the reservation again.
    pub async fn create_hold(&self, guest_id: Ulid, request: &HoldRequest) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.place_hold(guest_id, request).await;
        record_operation("create_hold", started, &result);
        result
    }

    /// Capture the authorization and turn the hold into a booking event.
    pub async fn confirm(&self, booking_id: Ulid, guest_id: Ulid) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.confirm_hold(booking_id, guest_id).await;
        record_operation("confirm", started, &result);
        result
    }

    /// Reclaim a hold whose deadline passed. No-op on finished bookings.
    pub async fn expire(&self, booking_id: Ulid) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.expire_hold(booking_id).await;
        record_operation("expire", started, &result);
        result
    }

    pub async fn cancel(&self, booking_id: Ulid, actor: Actor) -> Result<RefundInfo, BookingError> {
        let started = Instant::now();
        let result = self.cancel_booking(booking_id, actor).await;
        record_operation("cancel", started, &result);
        result
    }

    /// Close a confirmed booking once its check-out date has come.
    pub async fn complete(&self, booking_id: Ulid) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.complete_stay(booking_id).await;
        record_operation("complete", started, &result);
        result
    }

    pub fn get_booking(&self, booking_id: Ulid) -> Result<Booking, BookingError> {
        self.bookings
            .get(&booking_id)
            .ok_or(BookingError::NotFound(booking_id))
    }

    /// A guest's trips, latest check-in first.
    pub fn bookings_for_guest(&self, guest_id: Ulid) -> Vec<Booking> {
        self.bookings.for_guest(guest_id)
    }

    pub async fn get_availability(&self, villa_id: Ulid, span: DateSpan) -> Result<bool, BookingError> {
        self.calendar.is_available(villa_id, span).await
    }

    /// Quote a stay without reserving anything.
    pub async fn compute_price(
        &self,
        villa_id: Ulid,
        span: DateSpan,
        guests: &GuestCounts,
    ) -> Result<PriceBreakdown, BookingError> {
        let villa = self.catalog.get_villa(villa_id).await?;
        let rules = self.catalog.pricing_rules(villa_id).await?;
        pricing::compute_price(&villa, span, guests, &rules, self.config.tax_rate)
    }

    /// Close dates on the host's own villas. All-or-nothing.
    pub async fn block_dates(
        &self,
        host_id: Ulid,
        requests: &[BlockRequest],
    ) -> Result<Vec<CalendarEvent>, BookingError> {
        let started = Instant::now();
        let result = self.block(host_id, requests).await;
        record_operation("block_dates", started, &result);
        result
    }

    /// Reopen dates the host blocked. Returns whether anything was removed.
    pub async fn unblock_dates(&self, host_id: Ulid, event_id: Ulid) -> Result<bool, BookingError> {
        let Some(event) = self.calendar.get_event(event_id).await else {
            return Ok(false);
        };
        if event.kind != CalendarEventKind::Blocked {
            return Err(BookingError::Forbidden("only blocked dates can be unblocked"));
        }
        self.check_host(host_id, event.villa_id).await?;
        self.calendar.release(event_id).await
    }

    /// In-progress bookings past their deadline, at most `limit`.
    pub fn expired_hold_ids(&self, limit: usize) -> Vec<Ulid> {
        self.bookings.expired_holds(self.clock.now_ms(), limit)
    }

    /// Release calendar events nothing should own anymore: events of
    /// cancelled bookings whose release failed, and manual holds older than
    /// the hold TTL whose booking was never saved. Returns how many were
    /// released.
    pub async fn reconcile(&self) -> usize {
        let mut released = 0;
        for (booking_id, event_id) in self.bookings.cancelled_with_event() {
            if self.calendar.villa_for_event(&event_id).is_none() {
                continue;
            }
            match self.calendar.release(event_id).await {
                Ok(true) => {
                    info!("released calendar event {event_id} of cancelled booking {booking_id}");
                    released += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("reconcile: release {event_id} failed: {e}"),
            }
        }

        let cutoff = self.clock.now_ms() - self.config.hold_ttl_ms;
        for event in self.calendar.events_of_kind(CalendarEventKind::ManualHold).await {
            let orphaned = event.booking_id.is_none_or(|b| !self.bookings.contains(&b));
            if !orphaned || event.created_at > cutoff {
                continue;
            }
            match self.calendar.release(event.id).await {
                Ok(true) => {
                    info!("released orphaned hold {} on villa {}", event.id, event.villa_id);
                    released += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("reconcile: release {} failed: {e}", event.id),
            }
        }

        if released > 0 {
            metrics::counter!(observability::ORPHANS_RELEASED_TOTAL).increment(released as u64);
        }
        released
    }

    // ── Transitions ───────────────────────────────────────────────

    async fn place_hold(&self, guest_id: Ulid, request: &HoldRequest) -> Result<Booking, BookingError> {
        let input = request.parse()?;
        let villa = self.catalog.get_villa(input.villa_id).await?;
        if !villa.published {
            return Err(BookingError::VillaUnavailable(villa.id));
        }
        let rules = self.catalog.pricing_rules(villa.id).await?;
        let price = pricing::compute_price(&villa, input.span, &input.guests, &rules, self.config.tax_rate)?;

        let booking_id = Ulid::new();
        let hold = self
            .calendar
            .reserve(
                villa.id,
                input.span,
                CalendarEventKind::ManualHold,
                Some(booking_id),
                None,
            )
            .await?;

        let due = input.plan.due_now(price.total);
        let payment_intent_id = if due > 0 {
            let metadata = PaymentMetadata {
                booking_id,
                villa_id: villa.id,
                guest_user_id: guest_id,
            };
            match self.gateway.authorize(due, &self.config.currency, &metadata).await {
                Ok(intent) => Some(intent.id),
                Err(e) => {
                    payment_failure("authorize");
                    self.roll_back_hold(hold.id).await;
                    return Err(BookingError::PaymentAuthorization(e.to_string()));
                }
            }
        } else {
            None
        };

        let now = self.clock.now_ms();
        let booking = Booking {
            id: booking_id,
            guest_user_id: guest_id,
            villa_id: villa.id,
            check_in: input.span.start,
            check_out: input.span.end,
            guests: input.guests,
            balance: price.total,
            price,
            refunded: 0,
            status: BookingStatus::InProgress,
            plan: input.plan,
            hold_expires_at: now + self.config.hold_ttl_ms,
            calendar_event_id: Some(hold.id),
            payment_intent_id,
            charge_id: None,
            pending_payment: None,
            contract_signed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        if let Err(e) = self.bookings.save(&booking).await {
            if let Some(intent) = &booking.payment_intent_id
                && let Err(void_err) = self.gateway.void(intent).await
            {
                payment_failure("void");
                error!("void of {intent} after failed save: {void_err}");
            }
            self.roll_back_hold(hold.id).await;
            return Err(e);
        }

        info!(
            "hold {} placed on villa {} for {} ({} nights, total {}), expires at {}",
            booking.id,
            booking.villa_id,
            guest_id,
            booking.price.nights,
            booking.price.total,
            booking.hold_expires_at
        );
        Ok(booking)
    }

    async fn roll_back_hold(&self, event_id: Ulid) {
        metrics::counter!(observability::HOLD_COMPENSATIONS_TOTAL).increment(1);
        match self.calendar.release(event_id).await {
            Ok(_) => warn!("rolled back calendar hold {event_id}"),
            Err(e) => error!("roll back of calendar hold {event_id} failed, left for reconcile: {e}"),
        }
    }

    async fn confirm_hold(&self, booking_id: Ulid, guest_id: Ulid) -> Result<Booking, BookingError> {
        let _guard = self.bookings.lock(booking_id).await;
        let mut booking = self.get_booking(booking_id)?;
        if booking.guest_user_id != guest_id {
            return Err(BookingError::Forbidden("booking belongs to another guest"));
        }
        let next = booking.status.transition(BookingStatus::Confirmed)?;
        let now = self.clock.now_ms();
        if booking.hold_expired(now) {
            return Err(BookingError::InvalidState {
                current: booking.status,
                action: "confirm an expired hold of",
            });
        }
        let event_id = booking
            .calendar_event_id
            .ok_or_else(|| BookingError::Internal(format!("booking {booking_id} holds no dates")))?;

        // A retry after a failed promote finds the charge already recorded.
        if booking.charge_id.is_none()
            && let Some(intent) = booking.payment_intent_id.clone()
        {
            self.mark_pending(&mut booking, PendingPayment::Capture).await?;
            let charge = self.gateway.capture(&intent).await.map_err(|e| {
                payment_failure("capture");
                BookingError::PaymentCapture(e.to_string())
            })?;
            booking.charge_id = Some(charge.id);
            booking.pending_payment = None;
        }

        if let Err(e) = self.calendar.promote(event_id, booking.id).await {
            // Keep the capture on record so an expiry refunds instead of voids.
            if booking.charge_id.is_some() {
                booking.updated_at = now;
                if let Err(save_err) = self.save_settled(&booking).await {
                    error!("booking {booking_id}: recording capture failed: {save_err}");
                }
            }
            return Err(BookingError::Internal(format!(
                "promote of calendar event {event_id} failed: {e}"
            )));
        }

        booking.status = next;
        booking.contract_signed_at = Some(now);
        booking.balance = booking.plan.balance_after_confirm(booking.price.total);
        booking.updated_at = now;
        self.save_settled(&booking).await?;
        info!(
            "booking {booking_id} confirmed, balance {}",
            booking.balance
        );
        Ok(booking)
    }

    async fn expire_hold(&self, booking_id: Ulid) -> Result<Booking, BookingError> {
        let guard = self.bookings.lock(booking_id).await;
        let mut booking = self.get_booking(booking_id)?;
        if booking.status.is_terminal() {
            return Ok(booking);
        }
        if booking.status != BookingStatus::InProgress {
            return Err(BookingError::InvalidState {
                current: booking.status,
                action: "expire",
            });
        }
        let now = self.clock.now_ms();
        if !booking.hold_expired(now) {
            return Err(BookingError::InvalidState {
                current: booking.status,
                action: "expire a still valid hold of",
            });
        }

        self.settle_unconfirmed(&mut booking).await?;
        booking.status = booking.status.transition(BookingStatus::Cancelled)?;
        booking.balance = 0;
        booking.updated_at = now;
        self.save_settled(&booking).await?;
        self.release_calendar(&booking).await;
        drop(guard);
        self.bookings.forget_lock(booking_id);

        metrics::counter!(observability::HOLDS_EXPIRED_TOTAL).increment(1);
        info!("hold {booking_id} expired");
        Ok(booking)
    }

    async fn cancel_booking(&self, booking_id: Ulid, actor: Actor) -> Result<RefundInfo, BookingError> {
        let guard = self.bookings.lock(booking_id).await;
        let mut booking = self.get_booking(booking_id)?;
        let villa_host = match actor {
            Actor::Host(_) => self.catalog.get_villa(booking.villa_id).await?.host_user_id,
            _ => booking.guest_user_id,
        };
        self.config.cancellation.authorize(&actor, &booking, villa_host)?;
        let next = booking.status.transition(BookingStatus::Cancelled)?;

        let refund = match booking.status {
            BookingStatus::Confirmed => self.refund_confirmed(&mut booking, &actor).await?,
            _ => self.settle_unconfirmed(&mut booking).await?,
        };

        booking.status = next;
        booking.balance = 0;
        booking.updated_at = self.clock.now_ms();
        self.save_settled(&booking).await?;
        self.release_calendar(&booking).await;
        drop(guard);
        self.bookings.forget_lock(booking_id);

        let amount = refund.as_ref().map_or(0, |r| r.amount);
        info!(
            "booking {booking_id} cancelled by {}, refunded {amount}",
            actor.as_str()
        );
        Ok(RefundInfo {
            booking,
            refund_id: refund.map(|r| r.id),
            amount,
        })
    }

    async fn complete_stay(&self, booking_id: Ulid) -> Result<Booking, BookingError> {
        let guard = self.bookings.lock(booking_id).await;
        let mut booking = self.get_booking(booking_id)?;
        let next = booking.status.transition(BookingStatus::Completed)?;
        if booking.check_out > self.clock.today() {
            return Err(BookingError::InvalidState {
                current: booking.status,
                action: "complete before check-out",
            });
        }
        booking.status = next;
        booking.updated_at = self.clock.now_ms();
        self.bookings.save(&booking).await?;
        drop(guard);
        self.bookings.forget_lock(booking_id);
        info!("booking {booking_id} completed");
        Ok(booking)
    }

    async fn block(&self, host_id: Ulid, requests: &[BlockRequest]) -> Result<Vec<CalendarEvent>, BookingError> {
        if requests.len() > MAX_BATCH_SIZE {
            return Err(BookingError::LimitExceeded("batch too large"));
        }
        let parsed = requests
            .iter()
            .map(BlockRequest::parse)
            .collect::<Result<Vec<ReserveRequest>, _>>()?;

        let mut villa_ids: Vec<Ulid> = parsed.iter().map(|r| r.villa_id).collect();
        villa_ids.sort();
        villa_ids.dedup();
        for villa_id in villa_ids {
            self.check_host(host_id, villa_id).await?;
        }

        let created = self.calendar.reserve_batch(parsed).await?;
        info!("host {host_id} blocked {} date ranges", created.len());
        Ok(created)
    }

    // ── Helpers ───────────────────────────────────────────────────

    async fn check_host(&self, host_id: Ulid, villa_id: Ulid) -> Result<(), BookingError> {
        let villa = self.catalog.get_villa(villa_id).await?;
        if villa.host_user_id != host_id {
            return Err(BookingError::Forbidden("villa belongs to another host"));
        }
        Ok(())
    }

    /// Record a gateway call on the stored booking before making it, so a
    /// retry after a lost save knows the call may have gone through.
    async fn mark_pending(&self, booking: &mut Booking, pending: PendingPayment) -> Result<(), BookingError> {
        if booking.pending_payment == Some(pending) {
            return Ok(());
        }
        booking.pending_payment = Some(pending);
        booking.updated_at = self.clock.now_ms();
        self.bookings.save(booking).await
    }

    /// Save a booking whose gateway call already went through, retrying a
    /// few times. If every attempt fails the stored booking still carries
    /// its pending payment, and the next attempt finishes the call instead
    /// of repeating it.
    async fn save_settled(&self, booking: &Booking) -> Result<(), BookingError> {
        let mut attempt = 1;
        loop {
            match self.bookings.save(booking).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SETTLED_SAVE_ATTEMPTS => {
                    warn!("booking {}: save after payment failed (attempt {attempt}): {e}", booking.id);
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "booking {}: save after payment failed, left pending {:?}: {e}",
                        booking.id, booking.pending_payment
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Hand back the money of a booking that never got confirmed: void the
    /// authorization, or refund a capture a failed confirm left behind.
    /// On gateway failure the stored booking keeps its status and any
    /// pending payment for the next attempt.
    async fn settle_unconfirmed(&self, booking: &mut Booking) -> Result<Option<Refund>, BookingError> {
        let booking_id = booking.id;
        let Some(intent) = booking.payment_intent_id.clone() else {
            return Ok(None);
        };
        if booking.charge_id.is_none() {
            let voided = self.gateway.void(&intent).await;
            match (voided, booking.pending_payment) {
                (Ok(()), _) => {
                    booking.pending_payment = None;
                    return Ok(None);
                }
                // The capture of an interrupted confirm went through; take
                // its charge and refund it below.
                (Err(_), Some(PendingPayment::Capture)) => {
                    let charge = self.gateway.capture(&intent).await.map_err(|e| {
                        payment_failure("capture");
                        BookingError::Internal(format!("capture for booking {booking_id}: {e}"))
                    })?;
                    booking.charge_id = Some(charge.id);
                    booking.pending_payment = None;
                }
                (Err(e), _) => {
                    payment_failure("void");
                    return Err(BookingError::Internal(format!("void for booking {booking_id}: {e}")));
                }
            }
        }
        let amount = match booking.pending_payment {
            Some(PendingPayment::Refund { amount }) => amount,
            _ => booking.paid(),
        };
        if amount <= 0 {
            return Ok(None);
        }
        self.refund_once(booking, &intent, amount).await.map(Some)
    }

    /// Refund a confirmed booking per the refund policy. A refund left
    /// pending by an earlier attempt keeps its amount.
    async fn refund_confirmed(&self, booking: &mut Booking, actor: &Actor) -> Result<Option<Refund>, BookingError> {
        let amount = match booking.pending_payment {
            Some(PendingPayment::Refund { amount }) => amount,
            _ => self
                .refund_policy
                .refund_amount(booking, actor, self.clock.today())
                .min(booking.paid())
                .max(0),
        };
        if amount == 0 {
            return Ok(None);
        }
        let Some(intent) = booking.payment_intent_id.clone() else {
            return Ok(None);
        };
        self.refund_once(booking, &intent, amount).await.map(Some)
    }

    /// Mark the refund pending, then refund under the booking's idempotency
    /// key so a repeat after a lost save can't refund twice.
    async fn refund_once(&self, booking: &mut Booking, intent: &str, amount: Cents) -> Result<Refund, BookingError> {
        let booking_id = booking.id;
        self.mark_pending(booking, PendingPayment::Refund { amount }).await?;
        let refund = self
            .gateway
            .refund(intent, amount, &refund_key(booking_id))
            .await
            .map_err(|e| {
                payment_failure("refund");
                BookingError::Internal(format!("refund for booking {booking_id}: {e}"))
            })?;
        booking.refunded += refund.amount;
        booking.pending_payment = None;
        Ok(refund)
    }

    /// Release a finished booking's dates. A failure is left for
    /// [`reconcile`](Self::reconcile).
    async fn release_calendar(&self, booking: &Booking) {
        let Some(event_id) = booking.calendar_event_id else {
            return;
        };
        if let Err(e) = self.calendar.release(event_id).await {
            warn!(
                "booking {}: release of calendar event {event_id} failed, left for reconcile: {e}",
                booking.id
            );
        }
    }
}
