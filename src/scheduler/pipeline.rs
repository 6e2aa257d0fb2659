//! Sequential post-processing pipeline run once per cycle, after fan-out.

use crate::runtime::protocol::{Stage, StageError, UpdateProtocol};
use crate::runtime::telemetry::Telemetry;
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-cycle result of the pipeline phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub purged_binaries: u64,
}

/// Runs the fixed stage sequence: assemble binaries from raw parts, group
/// binaries into releases, then purge dead binaries from the store.
///
/// Stages are single-threaded and strictly ordered; a stage error aborts the
/// cycle and is fatal to the caller.
pub struct Pipeline<P: UpdateProtocol, S: Store> {
    protocol: Arc<RwLock<P>>,
    store: Arc<S>,
    dead_binary_age_days: u32,
    telemetry: Arc<Telemetry>,
}

impl<P: UpdateProtocol, S: Store> Pipeline<P, S> {
    pub fn new(
        protocol: Arc<RwLock<P>>,
        store: Arc<S>,
        dead_binary_age_days: u32,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            protocol,
            store,
            dead_binary_age_days,
            telemetry,
        }
    }

    pub async fn run_once(&self) -> Result<PipelineSummary, StageError> {
        {
            let mut protocol = self.protocol.write().await;
            protocol
                .assemble()
                .await
                .map_err(|err| StageError::new(Stage::Assemble, err))?;
        }
        tracing::debug!("assemble stage finished");

        {
            let mut protocol = self.protocol.write().await;
            protocol
                .group_releases()
                .await
                .map_err(|err| StageError::new(Stage::Group, err))?;
        }
        tracing::debug!("release grouping stage finished");

        let cutoff = retention_cutoff(Utc::now(), self.dead_binary_age_days);
        let purged = self
            .store
            .delete_binaries_posted_before(cutoff)
            .await
            .map_err(|err| StageError::new(Stage::Cleanup, err))?;
        if purged > 0 {
            tracing::info!(purged, %cutoff, "purged dead binaries");
        }
        self.telemetry.record_purged_binaries(purged);

        Ok(PipelineSummary {
            purged_binaries: purged,
        })
    }
}

/// Computes the cleanup cutoff: binaries posted at or before it are dead.
pub fn retention_cutoff(now: DateTime<Utc>, age_days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(age_days))
}
