use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::error::BookingError;
use crate::journal::Journal;
use crate::model::*;

/// Durable booking table plus one transition lock per booking.
///
/// Records are whole snapshots: every save journals the full booking and the
/// latest one for an id wins on replay. Readers get clones and never take
/// the transition lock.
pub struct BookingRepository {
    records: DashMap<Ulid, Booking>,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
    journal: Arc<Journal>,
}

impl BookingRepository {
    pub fn new(journal: Arc<Journal>, replayed: &[Event]) -> Self {
        let records = DashMap::new();
        for event in replayed {
            if let Event::BookingSaved { booking } = event {
                records.insert(booking.id, booking.clone());
            }
        }
        Self {
            records,
            locks: DashMap::new(),
            journal,
        }
    }

    /// Take the transition lock of `booking_id`. Every status change of a
    /// booking happens under this lock, taken before the journal gate.
    pub async fn lock(&self, booking_id: Ulid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(booking_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a finished booking once nobody holds or waits
    /// on it. Terminal bookings never change again, so a fresh lock later is
    /// harmless.
    pub fn forget_lock(&self, booking_id: Ulid) {
        self.locks
            .remove_if(&booking_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn get(&self, booking_id: &Ulid) -> Option<Booking> {
        self.records.get(booking_id).map(|b| b.value().clone())
    }

    /// Every booking of one guest, latest check-in first.
    pub fn for_guest(&self, guest_id: Ulid) -> Vec<Booking> {
        let mut trips: Vec<Booking> = self
            .records
            .iter()
            .filter(|b| b.guest_user_id == guest_id)
            .map(|b| b.value().clone())
            .collect();
        trips.sort_unstable_by(|a, b| b.check_in.cmp(&a.check_in).then(b.id.cmp(&a.id)));
        trips
    }

    pub fn contains(&self, booking_id: &Ulid) -> bool {
        self.records.contains_key(booking_id)
    }

    /// Journal and store a booking snapshot. Callers hold its lock.
    pub async fn save(&self, booking: &Booking) -> Result<(), BookingError> {
        let txn = self.journal.begin().await;
        txn.append(&Event::BookingSaved {
            booking: booking.clone(),
        })
        .await?;
        self.records.insert(booking.id, booking.clone());
        Ok(())
    }

    /// Ids of in-progress bookings whose hold deadline has passed, oldest
    /// deadline first, at most `limit`.
    pub fn expired_holds(&self, now: Ms, limit: usize) -> Vec<Ulid> {
        let mut due: Vec<(Ms, Ulid)> = self
            .records
            .iter()
            .filter(|b| b.status == BookingStatus::InProgress && b.hold_expired(now))
            .map(|b| (b.hold_expires_at, b.id))
            .collect();
        due.sort_unstable();
        due.truncate(limit);
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Cancelled bookings paired with the calendar event they reserved.
    pub fn cancelled_with_event(&self) -> Vec<(Ulid, Ulid)> {
        self.records
            .iter()
            .filter(|b| b.status == BookingStatus::Cancelled)
            .filter_map(|b| b.calendar_event_id.map(|e| (b.id, e)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records recreating every booking. Call while holding the journal's
    /// compaction guard.
    pub fn snapshot(&self) -> Vec<Event> {
        self.records
            .iter()
            .map(|b| Event::BookingSaved {
                booking: b.value().clone(),
            })
            .collect()
    }
}
