use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive update-loop metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    cycles: AtomicU64,
    groups_scanned: AtomicU64,
    scan_failures: AtomicU64,
    fan_outs_aborted: AtomicU64,
    purged_binaries: AtomicU64,
}

impl Telemetry {
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_scanned(&self) {
        self.groups_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan_failure(&self) {
        self.scan_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fan_out_abort(&self) {
        self.fan_outs_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purged_binaries(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.purged_binaries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn groups_scanned(&self) -> u64 {
        self.groups_scanned.load(Ordering::Relaxed)
    }

    pub fn scan_failures(&self) -> u64 {
        self.scan_failures.load(Ordering::Relaxed)
    }

    pub fn fan_outs_aborted(&self) -> u64 {
        self.fan_outs_aborted.load(Ordering::Relaxed)
    }

    pub fn purged_binaries(&self) -> u64 {
        self.purged_binaries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            groups_scanned: self.groups_scanned.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
            fan_outs_aborted: self.fan_outs_aborted.load(Ordering::Relaxed),
            purged_binaries: self.purged_binaries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub cycles: u64,
    pub groups_scanned: u64,
    pub scan_failures: u64,
    pub fan_outs_aborted: u64,
    pub purged_binaries: u64,
}

/// Spawns a background task that periodically logs cycle throughput, scan
/// counts, and purge totals until the token is cancelled.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "newsweave::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        target: "newsweave::metrics",
                        cycles = snapshot.cycles,
                        groups_scanned = snapshot.groups_scanned,
                        scan_failures = snapshot.scan_failures,
                        fan_outs_aborted = snapshot.fan_outs_aborted,
                        purged_binaries = snapshot.purged_binaries,
                        "update loop metrics snapshot"
                    );
                }
            }
        }
    })
}
