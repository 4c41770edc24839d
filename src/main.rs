use std::sync::Arc;

use tracing::{info, warn};

use villabook::booking::{BookingRepository, FullRefund, LifecycleManager, RefundPolicy, RefundPolicyKind};
use villabook::calendar::CalendarStore;
use villabook::catalog::InMemoryCatalog;
use villabook::clock::SystemClock;
use villabook::config::Config;
use villabook::gateway::MockPaymentGateway;
use villabook::journal::Journal;
use villabook::notify::NotifyHub;
use villabook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    villabook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let journal_path = config.journal_path();
    let (journal, replay) = Journal::open(&journal_path)?;
    let journal = Arc::new(journal);

    let clock = Arc::new(SystemClock);
    let notify = Arc::new(NotifyHub::new());
    let calendar = Arc::new(CalendarStore::new(
        journal.clone(),
        notify,
        clock.clone(),
        &replay.events,
    ));
    let bookings = Arc::new(BookingRepository::new(journal.clone(), &replay.events));

    let catalog = match &config.catalog_path {
        Some(path) => InMemoryCatalog::from_json_file(path)?,
        None => {
            warn!("VILLABOOK_CATALOG not set, starting with an empty villa catalog");
            InMemoryCatalog::new()
        }
    };
    let villas = catalog.villa_count();

    // No provider integration ships with the core.
    warn!("using the in-memory payment gateway");
    let gateway = Arc::new(MockPaymentGateway::new());

    let refund_policy: Arc<dyn RefundPolicy> = match config.booking.refund_policy {
        RefundPolicyKind::Full => Arc::new(FullRefund),
        RefundPolicyKind::Tiered => Arc::new(config.booking.refund),
    };

    let lifecycle = Arc::new(LifecycleManager::new(
        calendar.clone(),
        bookings.clone(),
        gateway,
        Arc::new(catalog),
        clock,
        refund_policy,
        config.booking.clone(),
    ));

    info!("villabook started");
    info!("  journal: {} ({} records replayed)", journal_path.display(), replay.events.len());
    info!("  bookings: {}, villas: {villas}", bookings.len());
    info!("  hold ttl: {}s, sweep every {:?}", config.booking.hold_ttl_ms / 1000, config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Reclaim holds that expired while we were down before taking new work.
    let report = sweeper::sweep_once(&lifecycle).await;
    if report.expired > 0 || report.reconciled > 0 {
        info!(
            "startup sweep: {} expired, {} reconciled",
            report.expired, report.reconciled
        );
    }

    let sweeper_task = tokio::spawn(sweeper::run_sweeper(lifecycle.clone(), config.sweep_interval));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        journal.clone(),
        calendar.clone(),
        bookings.clone(),
        config.compact_threshold,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping background tasks");
    sweeper_task.abort();
    compactor_task.abort();

    // Leave a compact journal behind so the next start replays quickly.
    if let Err(e) = sweeper::compact_if_needed(&journal, &calendar, &bookings, 1).await {
        warn!("final compaction failed: {e}");
    }

    info!("villabook stopped");
    Ok(())
}
