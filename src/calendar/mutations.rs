use std::collections::HashMap;

use ulid::Ulid;

use crate::error::BookingError;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_note, validate_span};
use super::{CalendarStore, apply_to_calendar};

/// One range to reserve in a batch.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub villa_id: Ulid,
    pub span: DateSpan,
    pub kind: CalendarEventKind,
    pub booking_id: Option<Ulid>,
    pub note: Option<String>,
}

impl CalendarStore {
    /// Reserve `span` on a villa. Fails with `Conflict` if any event overlaps.
    pub async fn reserve(
        &self,
        villa_id: Ulid,
        span: DateSpan,
        kind: CalendarEventKind,
        booking_id: Option<Ulid>,
        note: Option<String>,
    ) -> Result<CalendarEvent, BookingError> {
        validate_span(&span)?;
        validate_note(note.as_deref())?;

        let txn = self.journal.begin().await;
        let cal = self.calendar(villa_id);
        let mut guard = cal.write().await;
        if guard.events.len() >= MAX_EVENTS_PER_VILLA {
            return Err(BookingError::LimitExceeded("too many calendar events on villa"));
        }

        check_no_conflict(&guard, &span, None)?;

        let event = CalendarEvent {
            id: Ulid::new(),
            villa_id,
            kind,
            span,
            booking_id,
            note,
            created_at: self.clock.now_ms(),
        };
        let record = Event::CalendarReserved { event: event.clone() };
        self.persist_and_apply(&txn, &mut guard, &record).await?;
        Ok(event)
    }

    /// Reserve several ranges at once. All-or-nothing: if any range conflicts
    /// with the calendar or with another range of the batch, none is
    /// committed. Ranges may span different villas.
    pub async fn reserve_batch(
        &self,
        requests: Vec<ReserveRequest>,
    ) -> Result<Vec<CalendarEvent>, BookingError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(BookingError::LimitExceeded("batch too large"));
        }
        for r in &requests {
            validate_span(&r.span)?;
            validate_note(r.note.as_deref())?;
        }

        let txn = self.journal.begin().await;

        // Lock in sorted villa order so overlapping batches can't deadlock.
        let mut villa_ids: Vec<Ulid> = requests.iter().map(|r| r.villa_id).collect();
        villa_ids.sort();
        villa_ids.dedup();

        let mut guards = Vec::with_capacity(villa_ids.len());
        let mut slot = HashMap::new();
        for villa_id in &villa_ids {
            let guard = self.calendar(*villa_id).write_owned().await;
            if guard.events.len() + requests.len() > MAX_EVENTS_PER_VILLA {
                return Err(BookingError::LimitExceeded("too many calendar events on villa"));
            }
            slot.insert(*villa_id, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate against current state and within the batch.
        let mut by_villa: HashMap<Ulid, Vec<DateSpan>> = HashMap::new();
        for r in &requests {
            check_no_conflict(&guards[slot[&r.villa_id]], &r.span, None)?;
            let taken = by_villa.entry(r.villa_id).or_default();
            if taken.iter().any(|s| s.overlaps(&r.span)) {
                return Err(BookingError::Validation(format!(
                    "batch ranges overlap on villa {}",
                    r.villa_id
                )));
            }
            taken.push(r.span);
        }

        // Phase 2: commit.
        let now = self.clock.now_ms();
        let mut created = Vec::with_capacity(requests.len());
        for r in requests {
            let event = CalendarEvent {
                id: Ulid::new(),
                villa_id: r.villa_id,
                kind: r.kind,
                span: r.span,
                booking_id: r.booking_id,
                note: r.note,
                created_at: now,
            };
            let record = Event::CalendarReserved { event: event.clone() };
            txn.append(&record).await?;
            let guard = &mut guards[slot[&r.villa_id]];
            apply_to_calendar(guard, &record, &self.event_to_villa);
            self.notify.send(r.villa_id, &record);
            created.push(event);
        }
        Ok(created)
    }

    /// Remove an event. Idempotent: an unknown or already released id is a
    /// no-op. Returns whether anything was removed.
    pub async fn release(&self, event_id: Ulid) -> Result<bool, BookingError> {
        let txn = self.journal.begin().await;
        let Some(mut guard) = self.resolve_event_write(&event_id).await else {
            return Ok(false);
        };
        // A concurrent release may have won while we waited for the lock.
        if !guard.events.iter().any(|e| e.id == event_id) {
            return Ok(false);
        }
        let record = Event::CalendarReleased {
            id: event_id,
            villa_id: guard.villa_id,
        };
        self.persist_and_apply(&txn, &mut guard, &record).await?;
        Ok(true)
    }

    /// Turn a manual hold into a booking event, in place. The dates don't
    /// change, so no conflict check is needed.
    pub async fn promote(
        &self,
        event_id: Ulid,
        booking_id: Ulid,
    ) -> Result<CalendarEvent, BookingError> {
        let txn = self.journal.begin().await;
        let mut guard = self
            .resolve_event_write(&event_id)
            .await
            .ok_or(BookingError::NotFound(event_id))?;
        let current = guard
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .ok_or(BookingError::NotFound(event_id))?;

        match current.kind {
            CalendarEventKind::ManualHold => {}
            // Retry of a promote that already landed.
            CalendarEventKind::Booking if current.booking_id == Some(booking_id) => {
                return Ok(current);
            }
            other => {
                return Err(BookingError::Internal(format!(
                    "calendar event {event_id} is {}, not a manual hold",
                    other.as_str()
                )));
            }
        }

        let record = Event::CalendarPromoted {
            id: event_id,
            villa_id: guard.villa_id,
            booking_id,
        };
        self.persist_and_apply(&txn, &mut guard, &record).await?;
        Ok(CalendarEvent {
            kind: CalendarEventKind::Booking,
            booking_id: Some(booking_id),
            ..current
        })
    }
}
