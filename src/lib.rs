pub mod runtime;
pub mod scheduler;
pub mod store;

pub use runtime::config::{
    resolve_run_mode, RunMode, UpdaterConfig, UpdaterConfigBuilder, UpdaterConfigParams,
};
pub use runtime::protocol::{ScanFuture, Stage, StageError, StageFuture, UpdateProtocol};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use scheduler::cycle::{CyclePhase, CycleScheduler, ExitReason};
pub use scheduler::dispatcher::{Dispatcher, FanOutReport};
pub use scheduler::pipeline::{retention_cutoff, Pipeline, PipelineSummary};
pub use store::{BinaryRecord, GroupName, Store, StoreFuture};
