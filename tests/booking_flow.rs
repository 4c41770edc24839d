use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use villabook::booking::{Actor, BookingRepository, LifecycleManager, TieredRefund};
use villabook::calendar::CalendarStore;
use villabook::catalog::InMemoryCatalog;
use villabook::clock::{Clock, ManualClock};
use villabook::config::BookingConfig;
use villabook::gateway::MockPaymentGateway;
use villabook::journal::Journal;
use villabook::model::*;
use villabook::notify::NotifyHub;
use villabook::sweeper;
use villabook::validate::HoldRequest;

// ── Test infrastructure ──────────────────────────────────────

const VILLA: &str = "01HZX3K8V1Q2W3E4R5T6Y7Z8A9";
const HOST: &str = "01HZX3K8V1Q2W3E4R5T6Y7Z8B0";

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("villabook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_catalog(dir: &Path) -> PathBuf {
    let path = dir.join("catalog.json");
    let seed = format!(
        r#"{{
            "villas": [{{
                "id": "{VILLA}",
                "host_user_id": "{HOST}",
                "published": true,
                "base_price_per_night": 100000,
                "cleaning_fee": 20000,
                "service_fee_ratio": 0.1,
                "damage_waiver_ratio": 0.035,
                "max_guests": 6
            }}],
            "rules": [{{
                "villa_id": "{VILLA}",
                "rule_type": "min_stay",
                "start_date": "2026-06-01",
                "end_date": "2026-08-31",
                "min_nights": 5,
                "priority": 1
            }}]
        }}"#
    );
    std::fs::write(&path, seed).unwrap();
    path
}

struct Service {
    lifecycle: Arc<LifecycleManager>,
    notify: Arc<NotifyHub>,
    journal: Arc<Journal>,
}

/// The payment provider outlives restarts, so callers share one gateway.
fn start(dir: &Path, clock: Arc<ManualClock>, gateway: Arc<MockPaymentGateway>) -> Service {
    let (journal, replay) = Journal::open(&dir.join("villabook.wal")).unwrap();
    let journal = Arc::new(journal);
    let notify = Arc::new(NotifyHub::new());
    let calendar = Arc::new(CalendarStore::new(
        journal.clone(),
        notify.clone(),
        clock.clone(),
        &replay.events,
    ));
    let bookings = Arc::new(BookingRepository::new(journal.clone(), &replay.events));
    let catalog = InMemoryCatalog::from_json_file(&write_catalog(dir)).unwrap();
    let lifecycle = Arc::new(LifecycleManager::new(
        calendar,
        bookings,
        gateway,
        Arc::new(catalog),
        clock,
        Arc::new(TieredRefund::default()),
        BookingConfig::default(),
    ));
    Service {
        lifecycle,
        notify,
        journal,
    }
}

fn villa() -> Ulid {
    VILLA.parse().unwrap()
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn hold_request(check_in: &str, check_out: &str) -> HoldRequest {
    serde_json::from_str(&format!(
        r#"{{"villa_id":"{VILLA}","check_in":"{check_in}","check_out":"{check_out}","adults":2,"children":1}}"#
    ))
    .unwrap()
}

async fn next_change(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no calendar change within 2s")
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn full_stay_lifecycle_is_broadcast() {
    let dir = data_dir();
    let clock = Arc::new(ManualClock::at(d("2026-01-01")));
    let svc = start(&dir, clock.clone(), Arc::new(MockPaymentGateway::new()));
    let mut changes = svc.notify.subscribe(villa());
    let guest = Ulid::new();

    let held = svc
        .lifecycle
        .create_hold(guest, &hold_request("2026-03-10", "2026-03-13"))
        .await
        .unwrap();
    assert_eq!(held.price.total, 390_500);
    let Event::CalendarReserved { event } = next_change(&mut changes).await else {
        panic!("expected a reservation");
    };
    assert_eq!(event.kind, CalendarEventKind::ManualHold);
    assert_eq!(Some(event.id), held.calendar_event_id);

    svc.lifecycle.confirm(held.id, guest).await.unwrap();
    assert_eq!(
        next_change(&mut changes).await,
        Event::CalendarPromoted {
            id: event.id,
            villa_id: villa(),
            booking_id: held.id,
        }
    );

    let info = svc
        .lifecycle
        .cancel(held.id, Actor::Host(HOST.parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(info.amount, 390_500);
    assert_eq!(
        next_change(&mut changes).await,
        Event::CalendarReleased {
            id: event.id,
            villa_id: villa(),
        }
    );
}

#[tokio::test]
async fn seeded_min_stay_rule_is_enforced() {
    let dir = data_dir();
    let svc = start(
        &dir,
        Arc::new(ManualClock::at(d("2026-01-01"))),
        Arc::new(MockPaymentGateway::new()),
    );
    let err = svc
        .lifecycle
        .create_hold(Ulid::new(), &hold_request("2026-07-10", "2026-07-12"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "min_stay_violation");
    assert!(
        svc.lifecycle
            .get_availability(villa(), DateSpan::new(d("2026-07-10"), d("2026-07-12")))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn holds_survive_restart_and_expire_afterwards() {
    let dir = data_dir();
    let clock = Arc::new(ManualClock::at(d("2026-01-01")));
    let gateway = Arc::new(MockPaymentGateway::new());
    let (held, confirmed) = {
        let svc = start(&dir, clock.clone(), gateway.clone());
        let guest = Ulid::new();
        let held = svc
            .lifecycle
            .create_hold(Ulid::new(), &hold_request("2026-02-01", "2026-02-04"))
            .await
            .unwrap();
        let other = svc
            .lifecycle
            .create_hold(guest, &hold_request("2026-02-10", "2026-02-12"))
            .await
            .unwrap();
        let confirmed = svc.lifecycle.confirm(other.id, guest).await.unwrap();
        (held, confirmed)
    };

    // Down for an hour.
    clock.advance(60 * 60 * 1000);
    let svc = start(&dir, clock.clone(), gateway.clone());
    assert_eq!(svc.lifecycle.get_booking(held.id).unwrap(), held);
    assert_eq!(svc.lifecycle.get_booking(confirmed.id).unwrap(), confirmed);
    assert!(held.hold_expired(clock.now_ms()));

    let report = sweeper::sweep_once(&svc.lifecycle).await;
    assert_eq!(report.expired, 1);
    let intent = held.payment_intent_id.as_deref().unwrap();
    assert!(gateway.intent(intent).unwrap().voided);
    assert_eq!(
        svc.lifecycle.get_booking(held.id).unwrap().status,
        BookingStatus::Cancelled
    );
    // The freed dates are bookable again.
    svc.lifecycle
        .create_hold(Ulid::new(), &hold_request("2026-02-01", "2026-02-04"))
        .await
        .unwrap();
}

#[tokio::test]
async fn compacted_journal_restarts_to_same_state() {
    let dir = data_dir();
    let clock = Arc::new(ManualClock::at(d("2026-01-01")));
    let gateway = Arc::new(MockPaymentGateway::new());
    let (ids, events) = {
        let svc = start(&dir, clock.clone(), gateway.clone());
        let mut ids = Vec::new();
        for week in 0..4u64 {
            let check_in = d("2026-04-01") + chrono::Days::new(week * 7);
            let req = HoldRequest {
                check_in,
                check_out: check_in + chrono::Days::new(3),
                ..hold_request("2026-04-01", "2026-04-04")
            };
            let guest = Ulid::new();
            let b = svc.lifecycle.create_hold(guest, &req).await.unwrap();
            if week % 2 == 0 {
                svc.lifecycle.confirm(b.id, guest).await.unwrap();
            }
            ids.push(b.id);
        }
        let compacted = sweeper::compact_if_needed(
            &svc.journal,
            svc.lifecycle.calendar(),
            svc.lifecycle.bookings(),
            1,
        )
        .await
        .unwrap();
        assert!(compacted);
        let bookings: Vec<Booking> = ids
            .iter()
            .map(|id| svc.lifecycle.get_booking(*id).unwrap())
            .collect();
        (bookings, svc.lifecycle.calendar().events(villa()).await)
    };

    let svc = start(&dir, clock, gateway);
    for b in &ids {
        assert_eq!(&svc.lifecycle.get_booking(b.id).unwrap(), b);
    }
    assert_eq!(svc.lifecycle.calendar().events(villa()).await, events);
}
