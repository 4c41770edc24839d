use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::booking::{BookingRepository, LifecycleManager};
use crate::calendar::CalendarStore;
use crate::error::BookingError;
use crate::journal::Journal;
use crate::limits::MAX_EXPIRE_PER_SWEEP;
use crate::observability;

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Lost to a concurrent confirm or cancel.
    pub skipped: usize,
    pub failed: usize,
    pub reconciled: usize,
}

/// Expire every overdue hold once, then reconcile the calendar.
pub async fn sweep_once(lifecycle: &LifecycleManager) -> SweepReport {
    let started = Instant::now();
    let mut report = SweepReport::default();
    for booking_id in lifecycle.expired_hold_ids(MAX_EXPIRE_PER_SWEEP) {
        match lifecycle.expire(booking_id).await {
            Ok(_) => report.expired += 1,
            Err(e @ BookingError::InvalidState { .. }) => {
                debug!("sweeper skip {booking_id}: {e}");
                report.skipped += 1;
            }
            Err(e) => {
                error!("sweeper: expire {booking_id} failed, retrying next tick: {e}");
                metrics::counter!(observability::SWEEP_FAILURES_TOTAL).increment(1);
                report.failed += 1;
            }
        }
    }
    report.reconciled = lifecycle.reconcile().await;
    metrics::histogram!(observability::SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if report.expired > 0 {
        info!("swept {} expired holds", report.expired);
    }
    report
}

/// Background task that reclaims expired holds every `every`.
pub async fn run_sweeper(lifecycle: Arc<LifecycleManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&lifecycle).await;
    }
}

/// Rewrite the journal as a snapshot of current state if enough appends
/// piled up since the last compaction. Returns whether it compacted.
pub async fn compact_if_needed(
    journal: &Journal,
    calendar: &CalendarStore,
    bookings: &BookingRepository,
    threshold: u64,
) -> Result<bool, BookingError> {
    let appends = journal.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    let guard = journal.lock_for_compaction().await;
    let mut snapshot = calendar.snapshot().await;
    snapshot.extend(bookings.snapshot());
    let records = snapshot.len();
    guard.compact(snapshot).await?;
    info!("compacted journal: {appends} appends down to {records} records");
    Ok(true)
}

/// Background task that checks for compaction every 30 seconds.
pub async fn run_compactor(
    journal: Arc<Journal>,
    calendar: Arc<CalendarStore>,
    bookings: Arc<BookingRepository>,
    threshold: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&journal, &calendar, &bookings, threshold).await {
            error!("compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::TieredRefund;
    use crate::catalog::InMemoryCatalog;
    use crate::clock::ManualClock;
    use crate::config::BookingConfig;
    use crate::gateway::MockPaymentGateway;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::validate::HoldRequest;
    use std::path::{Path, PathBuf};
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("villabook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    struct Setup {
        lifecycle: Arc<LifecycleManager>,
        journal: Arc<Journal>,
        clock: Arc<ManualClock>,
        gateway: Arc<MockPaymentGateway>,
        villa_id: Ulid,
    }

    fn setup(path: &Path) -> Setup {
        let (journal, replay) = Journal::open(path).unwrap();
        let journal = Arc::new(journal);
        let clock = Arc::new(ManualClock::at("2026-01-01".parse().unwrap()));
        let calendar = Arc::new(CalendarStore::new(
            journal.clone(),
            Arc::new(NotifyHub::new()),
            clock.clone(),
            &replay.events,
        ));
        let bookings = Arc::new(BookingRepository::new(journal.clone(), &replay.events));
        let catalog = Arc::new(InMemoryCatalog::new());
        let villa_id = Ulid::new();
        catalog.upsert_villa(Villa {
            id: villa_id,
            host_user_id: Ulid::new(),
            published: true,
            base_price_per_night: 50_000,
            cleaning_fee: 0,
            service_fee_ratio: 0.0,
            damage_waiver_ratio: 0.0,
            max_guests: 4,
        });
        let gateway = Arc::new(MockPaymentGateway::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            calendar,
            bookings,
            gateway.clone(),
            catalog,
            clock.clone(),
            Arc::new(TieredRefund::default()),
            BookingConfig::default(),
        ));
        Setup {
            lifecycle,
            journal,
            clock,
            gateway,
            villa_id,
        }
    }

    fn request(villa_id: Ulid, day: u64) -> HoldRequest {
        let start = "2026-03-01".parse::<chrono::NaiveDate>().unwrap() + chrono::Days::new(day * 2);
        HoldRequest {
            villa_id,
            check_in: start,
            check_out: start + chrono::Days::new(1),
            adults: 1,
            children: 0,
            infants: 0,
            plan: PaymentPlan::Full,
        }
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_holds() {
        let s = setup(&test_wal_path("sweep.wal"));
        let guest = Ulid::new();
        let old = s.lifecycle.create_hold(guest, &request(s.villa_id, 0)).await.unwrap();
        let confirmed = s.lifecycle.create_hold(guest, &request(s.villa_id, 1)).await.unwrap();
        s.lifecycle.confirm(confirmed.id, guest).await.unwrap();

        s.clock.advance(10 * 60 * 1000);
        let fresh = s.lifecycle.create_hold(guest, &request(s.villa_id, 2)).await.unwrap();
        s.clock.advance(5 * 60 * 1000);

        let report = sweep_once(&s.lifecycle).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 0);

        let status = |id| s.lifecycle.get_booking(id).unwrap().status;
        assert_eq!(status(old.id), BookingStatus::Cancelled);
        assert_eq!(status(confirmed.id), BookingStatus::Confirmed);
        assert_eq!(status(fresh.id), BookingStatus::InProgress);
        assert_eq!(s.lifecycle.calendar().events(s.villa_id).await.len(), 2);

        // Nothing left to do.
        assert_eq!(sweep_once(&s.lifecycle).await, SweepReport::default());
    }

    #[tokio::test]
    async fn failed_expiry_is_retried_next_pass() {
        let s = setup(&test_wal_path("sweep_retry.wal"));
        let held = s
            .lifecycle
            .create_hold(Ulid::new(), &request(s.villa_id, 0))
            .await
            .unwrap();
        s.clock.advance(15 * 60 * 1000);

        s.gateway.fail_void(true);
        let report = sweep_once(&s.lifecycle).await;
        assert_eq!(report.failed, 1);
        assert_eq!(
            s.lifecycle.get_booking(held.id).unwrap().status,
            BookingStatus::InProgress
        );

        s.gateway.fail_void(false);
        assert_eq!(sweep_once(&s.lifecycle).await.expired, 1);
    }

    #[tokio::test]
    async fn background_sweeper_ticks() {
        let s = setup(&test_wal_path("sweep_task.wal"));
        let held = s
            .lifecycle
            .create_hold(Ulid::new(), &request(s.villa_id, 0))
            .await
            .unwrap();
        s.clock.advance(15 * 60 * 1000);

        let task = tokio::spawn(run_sweeper(s.lifecycle.clone(), Duration::from_millis(20)));
        for _ in 0..100 {
            if s.lifecycle.get_booking(held.id).unwrap().status == BookingStatus::Cancelled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();
        assert_eq!(
            s.lifecycle.get_booking(held.id).unwrap().status,
            BookingStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn compaction_keeps_state_and_resets_counter() {
        let path = test_wal_path("compact.wal");
        let (booking, events) = {
            let s = setup(&path);
            let guest = Ulid::new();
            for day in 0..5 {
                let b = s.lifecycle.create_hold(guest, &request(s.villa_id, day)).await.unwrap();
                s.lifecycle.cancel(b.id, crate::booking::Actor::Admin).await.unwrap();
            }
            let kept = s.lifecycle.create_hold(guest, &request(s.villa_id, 9)).await.unwrap();
            s.lifecycle.confirm(kept.id, guest).await.unwrap();

            let calendar = s.lifecycle.calendar().clone();
            let bookings = s.lifecycle.bookings().clone();
            assert!(!compact_if_needed(&s.journal, &calendar, &bookings, 1_000).await.unwrap());
            assert!(compact_if_needed(&s.journal, &calendar, &bookings, 5).await.unwrap());
            assert_eq!(s.journal.appends_since_compact().await, 0);

            (
                s.lifecycle.get_booking(kept.id).unwrap(),
                calendar.events(s.villa_id).await,
            )
        };

        let s = setup(&path);
        assert_eq!(s.lifecycle.get_booking(booking.id).unwrap(), booking);
        assert_eq!(s.lifecycle.bookings().len(), 6);
        // setup() registers a fresh villa id, so look the events up by the old one.
        assert_eq!(s.lifecycle.calendar().events(events[0].villa_id).await, events);
    }
}
