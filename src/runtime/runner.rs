use crate::runtime::config::UpdaterConfig;
use crate::runtime::protocol::UpdateProtocol;
use crate::runtime::telemetry::{self, Telemetry};
use crate::scheduler::cycle::{CycleScheduler, ExitReason};
use crate::store::Store;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Coordinates the update-loop lifecycle: drives the scheduler, owns the
/// root [`CancellationToken`], runs the metrics reporter, handles OS signals
/// for graceful shutdowns, and invokes the protocol shutdown hook on every
/// exit path.
pub struct Runner<P: UpdateProtocol, S: Store> {
    scheduler: CycleScheduler<P, S>,
    shutdown: CancellationToken,
}

impl<P: UpdateProtocol, S: Store> Runner<P, S> {
    /// Creates a new runner and wires a root [`CancellationToken`] that
    /// propagates through the scheduler, the fan-out, and the reporter.
    pub fn new(config: UpdaterConfig, store: Arc<S>, protocol: P) -> Self {
        let shutdown = CancellationToken::new();
        let scheduler =
            CycleScheduler::with_cancellation_token(config, store, protocol, shutdown.clone());
        Self {
            scheduler,
            shutdown,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.scheduler.telemetry()
    }

    /// Runs the loop until it terminates on its own (empty worklist, token
    /// cancellation, or a fatal error).
    pub async fn run(&mut self) -> Result<ExitReason> {
        let (reporter_token, reporter) = self.start_reporter();
        let outcome = self.scheduler.run().await;
        self.finish(outcome, reporter_token, reporter).await
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the loop terminates on
    /// its own. Ctrl-C requests a graceful stop; in-flight scans are aborted
    /// and the loop exits at its next suspension point.
    pub async fn run_until_ctrl_c(&mut self) -> Result<ExitReason> {
        let (reporter_token, reporter) = self.start_reporter();
        let shutdown = self.shutdown.clone();

        let outcome = {
            let run = self.scheduler.run();
            tokio::pin!(run);

            tokio::select! {
                outcome = &mut run => outcome,
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; requesting a graceful stop");
                    shutdown.cancel();
                    run.await
                }
            }
        };

        self.finish(outcome, reporter_token, reporter).await
    }

    fn start_reporter(&self) -> (CancellationToken, JoinHandle<()>) {
        let reporter_token = self.shutdown.child_token();
        let reporter = telemetry::spawn_metrics_reporter(
            self.scheduler.telemetry(),
            reporter_token.clone(),
            self.scheduler.config().metrics_interval(),
        );
        (reporter_token, reporter)
    }

    async fn finish(
        &self,
        outcome: Result<ExitReason>,
        reporter_token: CancellationToken,
        reporter: JoinHandle<()>,
    ) -> Result<ExitReason> {
        reporter_token.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        let hook = {
            let mut protocol = self.scheduler.protocol().write().await;
            protocol.shutdown().await
        };

        match (outcome, hook) {
            (Ok(reason), Ok(())) => {
                tracing::info!(?reason, "update loop stopped");
                Ok(reason)
            }
            (Ok(_), Err(err)) => Err(err).context("failed to shut down update protocol"),
            (Err(err), hook_result) => {
                if let Err(hook_err) = hook_result {
                    tracing::warn!(
                        error = %hook_err,
                        "update protocol shutdown failed after a fatal cycle error"
                    );
                }
                Err(err)
            }
        }
    }
}
