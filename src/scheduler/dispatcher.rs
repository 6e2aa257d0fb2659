//! Bounded fan-out of one-shot group scans.
//!
//! Every scan runs on a freshly spawned task that executes exactly one scan
//! and is then discarded, so no worker state survives from one group into
//! the next. Panics are caught per task and surface as ordinary failures.

use crate::runtime::protocol::UpdateProtocol;
use crate::runtime::telemetry::Telemetry;
use crate::store::GroupName;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of one fan-out phase.
///
/// `attempted` counts the scans that were actually spawned; `abandoned`
/// counts in-flight scans aborted by the teardown plus queued scans that
/// were never spawned. In a fan-out with no failures and no cancellation,
/// `attempted == succeeded == |groups|`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl FanOutReport {
    pub fn clean(&self) -> bool {
        self.failed == 0 && self.abandoned == 0
    }
}

/// Fans a worklist out to single-use scan workers, at most `update_threads`
/// at a time.
///
/// Failure contract: the first failed scan tears the whole fan-out down.
/// The error is logged with its full chain, still-running sibling scans are
/// aborted and queued scans are dropped, and the abandonment is reported in
/// the returned [`FanOutReport`]. Failing the cycle fast is preferred over
/// letting a wedged scan pin it open; callers that need every group scanned
/// re-attempt on the next cycle.
pub struct Dispatcher {
    update_threads: usize,
    telemetry: Arc<Telemetry>,
}

impl Dispatcher {
    pub fn new(update_threads: usize, telemetry: Arc<Telemetry>) -> Self {
        Self {
            update_threads: update_threads.max(1),
            telemetry,
        }
    }

    pub fn update_threads(&self) -> usize {
        self.update_threads
    }

    /// Dispatches every group to a one-shot worker and waits for resolution.
    ///
    /// Returns once all scans finished, the first failure triggered the
    /// teardown, or `shutdown` was cancelled.
    pub async fn fan_out<P: UpdateProtocol>(
        &self,
        protocol: &Arc<RwLock<P>>,
        groups: impl IntoIterator<Item = GroupName>,
        shutdown: &CancellationToken,
    ) -> FanOutReport {
        let mut pending: VecDeque<GroupName> = groups.into_iter().collect();
        let mut report = FanOutReport::default();
        let mut scans: JoinSet<(GroupName, Result<()>)> = JoinSet::new();

        loop {
            while scans.len() < self.update_threads {
                let Some(group) = pending.pop_front() else {
                    break;
                };
                report.attempted += 1;
                scans.spawn(one_shot_scan(Arc::clone(protocol), group));
            }

            if scans.is_empty() {
                break;
            }

            tokio::select! {
                joined = scans.join_next() => {
                    let Some(joined) = joined else { break };
                    if !self.observe(joined, &mut report) {
                        self.teardown(&mut scans, &mut pending, &mut report).await;
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        in_flight = scans.len(),
                        queued = pending.len(),
                        "shutdown requested during fan-out; aborting remaining scans"
                    );
                    self.teardown(&mut scans, &mut pending, &mut report).await;
                    break;
                }
            }
        }

        report
    }

    /// Records one joined scan. Returns false when the result must trigger
    /// the fail-fast teardown.
    fn observe(
        &self,
        joined: Result<(GroupName, Result<()>), tokio::task::JoinError>,
        report: &mut FanOutReport,
    ) -> bool {
        match joined {
            Ok((group, Ok(()))) => {
                report.succeeded += 1;
                self.telemetry.record_group_scanned();
                tracing::debug!(group = %group, "group scan finished");
                true
            }
            Ok((group, Err(err))) => {
                report.failed += 1;
                self.telemetry.record_scan_failure();
                tracing::error!(
                    group = %group,
                    error = ?err,
                    "group scan failed; tearing down the scan pool"
                );
                false
            }
            Err(join_err) if join_err.is_cancelled() => {
                report.abandoned += 1;
                true
            }
            Err(join_err) => {
                report.failed += 1;
                self.telemetry.record_scan_failure();
                tracing::error!(
                    error = %join_err,
                    "scan task terminated unexpectedly; tearing down the scan pool"
                );
                false
            }
        }
    }

    /// Aborts everything still in flight, drains the join results, and
    /// counts never-spawned groups as abandoned.
    async fn teardown(
        &self,
        scans: &mut JoinSet<(GroupName, Result<()>)>,
        pending: &mut VecDeque<GroupName>,
        report: &mut FanOutReport,
    ) {
        scans.abort_all();
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok((group, Ok(()))) => {
                    report.succeeded += 1;
                    self.telemetry.record_group_scanned();
                    tracing::debug!(group = %group, "group scan finished during teardown");
                }
                Ok((group, Err(err))) => {
                    report.failed += 1;
                    self.telemetry.record_scan_failure();
                    tracing::error!(group = %group, error = ?err, "group scan failed");
                }
                Err(join_err) if join_err.is_cancelled() => {
                    report.abandoned += 1;
                }
                Err(join_err) => {
                    report.failed += 1;
                    self.telemetry.record_scan_failure();
                    tracing::error!(error = %join_err, "scan task terminated unexpectedly");
                }
            }
        }

        report.abandoned += pending.len();
        pending.clear();
        self.telemetry.record_fan_out_abort();
    }
}

/// Runs exactly one scan on the current task. The protocol read lock is only
/// held while the scan future is created, never while it runs.
async fn one_shot_scan<P: UpdateProtocol>(
    protocol: Arc<RwLock<P>>,
    group: GroupName,
) -> (GroupName, Result<()>) {
    let scan = {
        let protocol = protocol.read().await;
        protocol.scan(group.clone())
    };

    let result = match AssertUnwindSafe(scan).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow!(
            "scan of {group} panicked: {}",
            panic_message(panic.as_ref())
        )),
    };

    (group, result)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
