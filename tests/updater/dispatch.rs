use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{group_set, init_tracing, Journal, RecordingProtocol};
use anyhow::Result;
use newsweave::{Dispatcher, Telemetry};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn dispatcher(update_threads: usize) -> (Dispatcher, Arc<Telemetry>) {
    let telemetry = Arc::new(Telemetry::default());
    (Dispatcher::new(update_threads, telemetry.clone()), telemetry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_attempts_every_group_within_the_cap() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let protocol =
        RecordingProtocol::new(journal.clone()).with_scan_delay(Duration::from_millis(50));
    let probe = protocol.probe();
    let protocol = Arc::new(RwLock::new(protocol));

    let (dispatcher, telemetry) = dispatcher(2);
    let shutdown = CancellationToken::new();
    let report = dispatcher
        .fan_out(
            &protocol,
            group_set(&["alt.binaries.alpha", "alt.binaries.beta", "alt.binaries.gamma"]),
            &shutdown,
        )
        .await;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 3);
    assert!(report.clean(), "{report:?}");
    assert_eq!(journal.count_with_prefix("scan:"), 3);
    assert!(
        probe.peak() <= 2,
        "no more than two scans may overlap, saw {}",
        probe.peak()
    );
    assert_eq!(telemetry.groups_scanned(), 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_serializes_scans() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let protocol =
        RecordingProtocol::new(journal.clone()).with_scan_delay(Duration::from_millis(10));
    let probe = protocol.probe();
    let protocol = Arc::new(RwLock::new(protocol));

    let (dispatcher, _telemetry) = dispatcher(1);
    let shutdown = CancellationToken::new();
    let report = dispatcher
        .fan_out(
            &protocol,
            group_set(&["alt.binaries.alpha", "alt.binaries.beta", "alt.binaries.gamma"]),
            &shutdown,
        )
        .await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(probe.peak(), 1, "scans must run strictly one at a time");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_failure_tears_down_inflight_and_queued_scans() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let protocol = RecordingProtocol::new(journal.clone())
        .with_gated_scan("a.hold")
        .with_failing_scan("b.fail");
    let protocol = Arc::new(RwLock::new(protocol));

    let (dispatcher, telemetry) = dispatcher(2);
    let shutdown = CancellationToken::new();
    let report = dispatcher
        .fan_out(
            &protocol,
            group_set(&["a.hold", "b.fail", "c.rest", "d.rest"]),
            &shutdown,
        )
        .await;

    assert_eq!(report.attempted, 2, "only the first two scans are spawned");
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(
        report.abandoned, 3,
        "the gated sibling and both queued groups are abandoned: {report:?}"
    );
    assert!(journal.contains("scan-failed:b.fail"));
    assert_eq!(telemetry.fan_outs_aborted(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_scan_is_reported_as_a_failure() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let protocol = RecordingProtocol::new(journal.clone()).with_panicking_scan("a.panic");
    let protocol = Arc::new(RwLock::new(protocol));

    let (dispatcher, telemetry) = dispatcher(1);
    let shutdown = CancellationToken::new();
    let report = dispatcher
        .fan_out(&protocol, group_set(&["a.panic", "b.rest"]), &shutdown)
        .await;

    assert_eq!(report.attempted, 1);
    assert_eq!(report.failed, 1, "the panic surfaces as a task failure");
    assert_eq!(report.abandoned, 1, "the queued group is abandoned");
    assert_eq!(telemetry.scan_failures(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_aborts_the_fan_out() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let protocol = RecordingProtocol::new(journal.clone()).with_all_scans_gated();
    let protocol = Arc::new(RwLock::new(protocol));

    let (dispatcher, _telemetry) = dispatcher(2);
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = dispatcher
        .fan_out(
            &protocol,
            group_set(&["alt.binaries.alpha", "alt.binaries.beta", "alt.binaries.gamma"]),
            &shutdown,
        )
        .await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.abandoned, 3, "{report:?}");

    Ok(())
}
