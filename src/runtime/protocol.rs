use crate::store::GroupName;
use anyhow::Error as AnyError;
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;

pub type ScanFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;
pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Enumerates the sequential phases that can fail fatally inside a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Worklist,
    Assemble,
    Group,
    Cleanup,
}

/// Error surfaced by the worklist query or a pipeline stage. Every instance
/// is fatal to the update loop; only scan failures are recovered from.
#[derive(Debug)]
pub struct StageError {
    stage: Stage,
    source: AnyError,
}

impl StageError {
    pub fn new(stage: Stage, source: AnyError) -> Self {
        Self { stage, source }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for StageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} stage error: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Trait implemented by the indexing logic driven by the update loop.
pub trait UpdateProtocol: Send + Sync + 'static {
    /// Scans one group for new articles. Executed by fan-out workers, one
    /// call per worker; always async so it can perform NNTP and DB I/O.
    fn scan(&self, group: GroupName) -> ScanFuture;

    /// Assembles freshly ingested raw parts into binaries. Executed
    /// sequentially on the orchestrator after fan-out resolves.
    fn assemble<'a>(&'a mut self) -> StageFuture<'a>;

    /// Groups assembled binaries into releases. Runs after `assemble`.
    fn group_releases<'a>(&'a mut self) -> StageFuture<'a>;

    /// Called once when the loop exits to allow graceful cleanup (flush
    /// buffers, close connections, etc.).
    fn shutdown<'a>(&'a mut self) -> StageFuture<'a>;
}
