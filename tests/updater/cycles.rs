use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{init_tracing, Journal, RecordingProtocol};
use crate::support::memory::MemoryStore;
use anyhow::{Context, Result};
use newsweave::{CyclePhase, CycleScheduler, ExitReason, Runner, UpdaterConfig};
use tokio::time::{timeout, Instant};

fn config(update_wait: Duration) -> Result<UpdaterConfig> {
    UpdaterConfig::builder()
        .update_threads(2)
        .update_wait(update_wait)
        .dead_binary_age_days(3)
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_worklist_terminates_without_dispatch_or_sleep() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));
    let protocol = RecordingProtocol::new(journal.clone());
    let mut scheduler = CycleScheduler::new(config(Duration::from_secs(60))?, store, protocol);
    let mut phases = scheduler.phase_watch();

    let started = Instant::now();
    let reason = scheduler.run().await?;

    assert_eq!(reason, ExitReason::WorklistEmpty);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "an empty worklist must not sleep"
    );
    assert!(
        journal.snapshot().is_empty(),
        "no scan or stage may run on an empty worklist: {:?}",
        journal.snapshot()
    );
    assert_eq!(*phases.borrow_and_update(), CyclePhase::Terminated);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cycle_runs_stages_in_order_after_fan_out() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));
    store.activate("alt.binaries.sounds");
    store.activate("alt.binaries.pictures");
    store.activate("alt.binaries.archives");
    store.deactivate_after_lists(1);

    let protocol =
        RecordingProtocol::new(journal.clone()).with_scan_delay(Duration::from_millis(20));
    let probe = protocol.probe();
    let mut scheduler = CycleScheduler::new(config(Duration::from_millis(10))?, store, protocol);
    let telemetry = scheduler.telemetry();

    let reason = scheduler.run().await?;
    assert_eq!(reason, ExitReason::WorklistEmpty);

    let events = journal.snapshot();
    let assemble_pos = events
        .iter()
        .position(|e| e == "assemble")
        .context("assemble must run")?;
    let group_pos = events
        .iter()
        .position(|e| e == "group")
        .context("group must run")?;
    let cleanup_pos = events
        .iter()
        .position(|e| e == "cleanup")
        .context("cleanup must run")?;

    let scan_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.starts_with("scan:"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(scan_positions.len(), 3, "every group is scanned: {events:?}");
    assert!(
        scan_positions.iter().all(|&i| i < assemble_pos),
        "fan-out must fully resolve before the pipeline starts: {events:?}"
    );
    assert!(
        assemble_pos < group_pos && group_pos < cleanup_pos,
        "stage order violated: {events:?}"
    );

    assert!(
        probe.peak() <= 2,
        "at most update_threads scans may overlap, saw {}",
        probe.peak()
    );
    assert_eq!(telemetry.cycles(), 1);
    assert_eq!(telemetry.groups_scanned(), 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_failure_does_not_gate_the_pipeline() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));
    store.activate("alt.binaries.sounds");
    store.activate("alt.binaries.pictures");
    store.deactivate_after_lists(1);

    let protocol =
        RecordingProtocol::new(journal.clone()).with_failing_scan("alt.binaries.pictures");
    let mut scheduler = CycleScheduler::new(config(Duration::from_millis(10))?, store, protocol);
    let telemetry = scheduler.telemetry();

    let reason = scheduler.run().await?;
    assert_eq!(reason, ExitReason::WorklistEmpty);

    assert!(journal.contains("assemble"), "{:?}", journal.snapshot());
    assert!(journal.contains("group"), "{:?}", journal.snapshot());
    assert!(journal.contains("cleanup"), "{:?}", journal.snapshot());
    assert_eq!(telemetry.scan_failures(), 1);
    assert_eq!(telemetry.fan_outs_aborted(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn assemble_failure_is_fatal_and_skips_later_stages() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));
    store.activate("alt.binaries.sounds");

    let protocol = RecordingProtocol::new(journal.clone()).with_failing_assemble();
    let mut scheduler = CycleScheduler::new(config(Duration::from_millis(10))?, store, protocol);

    let err = scheduler.run().await.unwrap_err();
    assert!(
        format!("{err}").contains("Assemble"),
        "error should name the failing stage: {err}"
    );
    assert!(
        !journal.contains("group") && !journal.contains("cleanup"),
        "later stages must not run after a stage error: {:?}",
        journal.snapshot()
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worklist_failure_is_fatal() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));
    store.fail_worklist();

    let protocol = RecordingProtocol::new(journal.clone());
    let mut scheduler = CycleScheduler::new(config(Duration::from_millis(10))?, store, protocol);

    let err = scheduler.run().await.unwrap_err();
    assert!(
        format!("{err}").contains("Worklist"),
        "error should name the worklist query: {err}"
    );
    assert!(journal.snapshot().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_during_sleep_stops_the_loop() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));
    store.activate("alt.binaries.sounds");

    let protocol = RecordingProtocol::new(journal.clone());
    let mut scheduler = CycleScheduler::new(config(Duration::from_secs(30))?, store, protocol);
    let mut phases = scheduler.phase_watch();
    let token = scheduler.cancellation_token();
    let telemetry = scheduler.telemetry();

    let handle = tokio::spawn(async move { scheduler.run().await });

    timeout(
        Duration::from_secs(5),
        phases.wait_for(|phase| *phase == CyclePhase::Sleeping),
    )
    .await
    .context("scheduler never reached the sleeping phase")??;
    token.cancel();

    let reason = timeout(Duration::from_secs(5), handle)
        .await
        .context("scheduler did not stop after cancellation")???;
    assert_eq!(reason, ExitReason::ShutdownRequested);
    assert_eq!(telemetry.cycles(), 1, "exactly one cycle ran");
    assert_eq!(journal.count_with_prefix("assemble"), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_invokes_the_shutdown_hook_on_natural_exit() -> Result<()> {
    init_tracing();
    let journal = Journal::new();
    let store = Arc::new(MemoryStore::new(journal.clone()));

    let protocol = RecordingProtocol::new(journal.clone());
    let mut runner = Runner::new(config(Duration::from_millis(10))?, store, protocol);

    let reason = runner.run().await?;
    assert_eq!(reason, ExitReason::WorklistEmpty);
    assert_eq!(journal.snapshot(), vec!["shutdown"]);
    assert_eq!(runner.telemetry().cycles(), 0);

    Ok(())
}
