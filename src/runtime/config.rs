use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_UPDATE_WAIT_SECS: u64 = 300;
const DEFAULT_DEAD_BINARY_AGE_DAYS: u32 = 3;

/// Runtime configuration for the update loop.
///
/// All instances must be constructed via [`UpdaterConfig::builder`] or
/// [`UpdaterConfig::new`] so invariants are validated before any consumer
/// observes the values. Components receive the configuration explicitly at
/// construction time; nothing reads it through ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    update_threads: usize,
    update_wait: Duration,
    dead_binary_age_days: u32,
    metrics_interval: Duration,
    pid_file: Option<PathBuf>,
}

pub struct UpdaterConfigParams {
    pub update_threads: usize,
    pub update_wait: Duration,
    pub dead_binary_age_days: u32,
    pub metrics_interval: Duration,
    pub pid_file: Option<PathBuf>,
}

impl UpdaterConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> UpdaterConfigBuilder {
        UpdaterConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`UpdaterConfig::builder`] when most values use defaults.
    pub fn new(params: UpdaterConfigParams) -> Result<Self> {
        let UpdaterConfigParams {
            update_threads,
            update_wait,
            dead_binary_age_days,
            metrics_interval,
            pid_file,
        } = params;

        let config = Self {
            update_threads,
            update_wait,
            dead_binary_age_days,
            metrics_interval,
            pid_file,
        };

        config.validate()?;
        Ok(config)
    }

    /// Maximum number of concurrent group scans per cycle.
    pub fn update_threads(&self) -> usize {
        self.update_threads
    }

    /// Fixed sleep between cycles.
    pub fn update_wait(&self) -> Duration {
        self.update_wait
    }

    /// Retention window before a binary becomes eligible for cleanup.
    pub fn dead_binary_age_days(&self) -> u32 {
        self.dead_binary_age_days
    }

    /// Interval used by the metrics reporter task.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Pid file path, if one is configured. Only consulted for background mode.
    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.update_threads == 0 {
            bail!("update_threads must be greater than 0");
        }

        if self.update_wait.is_zero() {
            bail!("update_wait must be greater than 0");
        }

        if self.dead_binary_age_days == 0 {
            bail!("dead_binary_age_days must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct UpdaterConfigBuilder {
    update_threads: Option<usize>,
    update_wait: Option<Duration>,
    dead_binary_age_days: Option<u32>,
    metrics_interval: Option<Duration>,
    pid_file: Option<PathBuf>,
}

impl UpdaterConfigBuilder {
    pub fn update_threads(mut self, threads: usize) -> Self {
        self.update_threads = Some(threads);
        self
    }

    pub fn update_wait(mut self, wait: Duration) -> Self {
        self.update_wait = Some(wait);
        self
    }

    pub fn dead_binary_age_days(mut self, days: u32) -> Self {
        self.dead_binary_age_days = Some(days);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn build(self) -> Result<UpdaterConfig> {
        let params = UpdaterConfigParams {
            update_threads: self.update_threads.context("update_threads is required")?,
            update_wait: self
                .update_wait
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPDATE_WAIT_SECS)),
            dead_binary_age_days: self
                .dead_binary_age_days
                .unwrap_or(DEFAULT_DEAD_BINARY_AGE_DAYS),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            pid_file: self.pid_file,
        };

        UpdaterConfig::new(params)
    }
}

/// How the process was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Foreground,
    Background { pid_file: PathBuf },
}

/// Resolves the run mode from the command flags and the configuration.
///
/// Background mode requires a pid file; the command-line path takes
/// precedence over the configured one, and the absence of both is a
/// configuration error. Callers must not enter the update loop when this
/// returns an error.
pub fn resolve_run_mode(
    background: bool,
    pid_file_flag: Option<PathBuf>,
    config: &UpdaterConfig,
) -> Result<RunMode> {
    if !background {
        return Ok(RunMode::Foreground);
    }

    match pid_file_flag.or_else(|| config.pid_file().map(Path::to_path_buf)) {
        Some(pid_file) => Ok(RunMode::Background { pid_file }),
        None => bail!(
            "a pid file is required to run in the background; supply one on the \
             command line or set pid_file in the configuration"
        ),
    }
}
