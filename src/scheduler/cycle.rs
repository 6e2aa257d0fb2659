//! The update-loop state machine.
//!
//! Each cycle re-queries the set of active groups, fans them out to one-shot
//! scan workers, runs the sequential pipeline, and sleeps. An empty worklist
//! terminates the loop; a cancelled shutdown token stops it gracefully at
//! the next cycle boundary or mid-sleep.

use crate::runtime::config::UpdaterConfig;
use crate::runtime::protocol::{Stage, StageError, UpdateProtocol};
use crate::runtime::telemetry::Telemetry;
use crate::scheduler::dispatcher::Dispatcher;
use crate::scheduler::pipeline::Pipeline;
use crate::store::Store;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Phase the scheduler is currently in, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Dispatching,
    Pipelining,
    Sleeping,
    Terminated,
}

/// Why the update loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No groups were active at the start of a cycle.
    WorklistEmpty,
    /// The shutdown token was cancelled.
    ShutdownRequested,
}

pub struct CycleScheduler<P: UpdateProtocol, S: Store> {
    config: UpdaterConfig,
    store: Arc<S>,
    protocol: Arc<RwLock<P>>,
    dispatcher: Dispatcher,
    pipeline: Pipeline<P, S>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    phase_tx: watch::Sender<CyclePhase>,
}

impl<P: UpdateProtocol, S: Store> CycleScheduler<P, S> {
    /// Creates a scheduler with its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to integrate with an existing
    /// shutdown mechanism.
    pub fn new(config: UpdaterConfig, store: Arc<S>, protocol: P) -> Self {
        Self::with_cancellation_token(config, store, protocol, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        config: UpdaterConfig,
        store: Arc<S>,
        protocol: P,
        shutdown: CancellationToken,
    ) -> Self {
        let protocol = Arc::new(RwLock::new(protocol));
        let telemetry = Arc::new(Telemetry::default());
        let dispatcher = Dispatcher::new(config.update_threads(), telemetry.clone());
        let pipeline = Pipeline::new(
            protocol.clone(),
            Arc::clone(&store),
            config.dead_binary_age_days(),
            telemetry.clone(),
        );
        let (phase_tx, _) = watch::channel(CyclePhase::Idle);

        Self {
            config,
            store,
            protocol,
            dispatcher,
            pipeline,
            telemetry,
            shutdown,
            phase_tx,
        }
    }

    /// Returns a reference to the scheduler's configuration.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Returns the protocol instance wrapped in an `RwLock`.
    pub fn protocol(&self) -> &Arc<RwLock<P>> {
        &self.protocol
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Returns a clone of the shutdown token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribes to phase transitions.
    pub fn phase_watch(&self) -> watch::Receiver<CyclePhase> {
        self.phase_tx.subscribe()
    }

    /// Drives the loop until the worklist empties, the token is cancelled,
    /// or a worklist/stage error surfaces (fatal, returned to the caller).
    pub async fn run(&mut self) -> Result<ExitReason> {
        tracing::info!(
            update_threads = self.config.update_threads(),
            update_wait_secs = self.config.update_wait().as_secs(),
            dead_binary_age_days = self.config.dead_binary_age_days(),
            "starting update loop"
        );

        loop {
            self.enter(CyclePhase::Idle);
            if self.shutdown.is_cancelled() {
                tracing::info!("shutdown requested; stopping the update loop");
                return self.terminate(ExitReason::ShutdownRequested);
            }

            let groups = self
                .store
                .list_active_groups()
                .await
                .map_err(|err| StageError::new(Stage::Worklist, err))?;
            if groups.is_empty() {
                tracing::info!("no groups active; stopping the update loop");
                return self.terminate(ExitReason::WorklistEmpty);
            }

            self.enter(CyclePhase::Dispatching);
            let report = self
                .dispatcher
                .fan_out(&self.protocol, groups, &self.shutdown)
                .await;
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                abandoned = report.abandoned,
                "group fan-out resolved"
            );
            if self.shutdown.is_cancelled() {
                tracing::info!("shutdown requested; stopping the update loop");
                return self.terminate(ExitReason::ShutdownRequested);
            }

            self.enter(CyclePhase::Pipelining);
            let summary = self.pipeline.run_once().await?;
            self.telemetry.record_cycle();
            tracing::debug!(
                purged_binaries = summary.purged_binaries,
                "cycle pipeline finished"
            );

            self.enter(CyclePhase::Sleeping);
            let wait = self.config.update_wait();
            tracing::info!(seconds = wait.as_secs(), "sleeping between update cycles");
            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested while sleeping");
                    return self.terminate(ExitReason::ShutdownRequested);
                }
            }
        }
    }

    fn terminate(&self, reason: ExitReason) -> Result<ExitReason> {
        self.enter(CyclePhase::Terminated);
        Ok(reason)
    }

    fn enter(&self, phase: CyclePhase) {
        tracing::trace!(?phase, "cycle phase change");
        self.phase_tx.send_replace(phase);
    }
}
