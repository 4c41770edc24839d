use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::booking::{CancellationMatrix, RefundPolicyKind, TieredRefund};
use crate::model::Ms;

/// Runtime settings, read from `VILLABOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Optional JSON file seeding the in-memory villa catalog.
    pub catalog_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub booking: BookingConfig,
    pub sweep_interval: Duration,
    /// Journal appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
}

/// Policy knobs of the booking lifecycle.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub hold_ttl_ms: Ms,
    pub tax_rate: f64,
    pub currency: String,
    pub cancellation: CancellationMatrix,
    pub refund_policy: RefundPolicyKind,
    /// Tiers used when `refund_policy` is `tiered`.
    pub refund: TieredRefund,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_ttl_ms: 15 * 60 * 1000,
            tax_rate: 0.10,
            currency: "usd".into(),
            cancellation: CancellationMatrix::default(),
            refund_policy: RefundPolicyKind::default(),
            refund: TieredRefund::default(),
        }
    }
}

fn var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = BookingConfig::default();
        let refund_defaults = defaults.refund;
        let matrix_defaults = defaults.cancellation;
        Self {
            data_dir: env::var("VILLABOOK_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            catalog_path: env::var("VILLABOOK_CATALOG").ok().map(PathBuf::from),
            metrics_port: var("VILLABOOK_METRICS_PORT"),
            booking: BookingConfig {
                hold_ttl_ms: var::<u64>("VILLABOOK_HOLD_TTL_SECS")
                    .map_or(defaults.hold_ttl_ms, |s| s as Ms * 1000),
                tax_rate: var("VILLABOOK_TAX_RATE").unwrap_or(defaults.tax_rate),
                currency: env::var("VILLABOOK_CURRENCY").unwrap_or(defaults.currency),
                cancellation: CancellationMatrix {
                    guest: var("VILLABOOK_CANCEL_BY_GUEST").unwrap_or(matrix_defaults.guest),
                    host: var("VILLABOOK_CANCEL_BY_HOST").unwrap_or(matrix_defaults.host),
                    admin: var("VILLABOOK_CANCEL_BY_ADMIN").unwrap_or(matrix_defaults.admin),
                },
                refund_policy: var("VILLABOOK_REFUND_POLICY").unwrap_or(defaults.refund_policy),
                refund: TieredRefund {
                    full_refund_days: var("VILLABOOK_FULL_REFUND_DAYS")
                        .unwrap_or(refund_defaults.full_refund_days),
                    partial_refund_days: var("VILLABOOK_PARTIAL_REFUND_DAYS")
                        .unwrap_or(refund_defaults.partial_refund_days),
                    partial_refund_percent: var("VILLABOOK_PARTIAL_REFUND_PERCENT")
                        .unwrap_or(refund_defaults.partial_refund_percent),
                },
            },
            sweep_interval: Duration::from_millis(
                var("VILLABOOK_SWEEP_INTERVAL_MS").unwrap_or(5_000),
            ),
            compact_threshold: var("VILLABOOK_COMPACT_THRESHOLD").unwrap_or(1_000),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("villabook.wal")
    }
}
