//! Calendar store: the single source of truth for which dates of which villa
//! are taken.
//!
//! Each villa's calendar sits behind its own `RwLock`. Conflict check,
//! journal append and insert all happen under the villa's write lock, so of
//! several racing reservations for overlapping dates at most one wins.
//! Different villas never contend.

mod availability;
mod conflict;
mod mutations;
mod queries;

pub use availability::{merge_overlapping, subtract_ranges};
pub use mutations::ReserveRequest;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::BookingError;
use crate::journal::{Journal, JournalTxn};
use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedCalendar = Arc<RwLock<VillaCalendar>>;

pub struct CalendarStore {
    calendars: DashMap<Ulid, SharedCalendar>,
    /// Reverse lookup: calendar event id → villa id.
    event_to_villa: DashMap<Ulid, Ulid>,
    journal: Arc<Journal>,
    notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
}

/// Apply a record to one villa's calendar (caller holds the lock).
fn apply_to_calendar(cal: &mut VillaCalendar, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CalendarReserved { event } => {
            index.insert(event.id, event.villa_id);
            cal.insert_event(event.clone());
        }
        Event::CalendarReleased { id, .. } => {
            cal.remove_event(*id);
            index.remove(id);
        }
        Event::CalendarPromoted { id, booking_id, .. } => {
            if let Some(e) = cal.get_event_mut(*id) {
                e.kind = CalendarEventKind::Booking;
                e.booking_id = Some(*booking_id);
            }
        }
        Event::BookingSaved { .. } => {}
    }
}

/// Villa a calendar record belongs to; `None` for booking records.
fn event_villa_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::CalendarReserved { event } => Some(event.villa_id),
        Event::CalendarReleased { villa_id, .. } | Event::CalendarPromoted { villa_id, .. } => {
            Some(*villa_id)
        }
        Event::BookingSaved { .. } => None,
    }
}

impl CalendarStore {
    /// Build the store from replayed journal records.
    pub fn new(
        journal: Arc<Journal>,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        replayed: &[Event],
    ) -> Self {
        let store = Self {
            calendars: DashMap::new(),
            event_to_villa: DashMap::new(),
            journal,
            notify,
            clock,
        };
        for event in replayed {
            let Some(villa_id) = event_villa_id(event) else { continue };
            let cal = store.calendar(villa_id);
            // Sole owner during replay, so the lock is always free. Never
            // block here: this may run inside an async context.
            if let Ok(mut guard) = cal.try_write() {
                apply_to_calendar(&mut guard, event, &store.event_to_villa);
            }
        }
        store
    }

    /// Calendar of `villa_id`, created empty on first use.
    fn calendar(&self, villa_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(villa_id)
            .or_insert_with(|| Arc::new(RwLock::new(VillaCalendar::new(villa_id))))
            .clone()
    }

    fn existing_calendar(&self, villa_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(villa_id).map(|e| e.value().clone())
    }

    pub fn villa_for_event(&self, event_id: &Ulid) -> Option<Ulid> {
        self.event_to_villa.get(event_id).map(|e| *e.value())
    }

    /// Journal-append, apply and notify in one call.
    async fn persist_and_apply(
        &self,
        txn: &JournalTxn<'_>,
        cal: &mut VillaCalendar,
        event: &Event,
    ) -> Result<(), BookingError> {
        txn.append(event).await?;
        apply_to_calendar(cal, event, &self.event_to_villa);
        self.notify.send(cal.villa_id, event);
        Ok(())
    }

    /// Look up an event's villa and take that calendar's write lock.
    /// `None` if the event is unknown.
    async fn resolve_event_write(
        &self,
        event_id: &Ulid,
    ) -> Option<OwnedRwLockWriteGuard<VillaCalendar>> {
        let villa_id = self.villa_for_event(event_id)?;
        let cal = self.existing_calendar(&villa_id)?;
        Some(cal.write_owned().await)
    }

    /// Records recreating the current calendars. Call while holding the
    /// journal's compaction guard.
    pub async fn snapshot(&self) -> Vec<Event> {
        let cals: Vec<SharedCalendar> = self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for cal in cals {
            let guard = cal.read().await;
            events.extend(guard.events.iter().map(|e| Event::CalendarReserved { event: e.clone() }));
        }
        events
    }
}
