//! Runnable update daemon wired to an in-memory store.
//!
//! Scans are simulated: each one deposits a fake binary for the current
//! cycle, so the assemble/group/cleanup stages and the dead-binary purge are
//! visible in the logs. Set `NEWSWEAVE_MAX_CYCLES` to let the worklist drain
//! and watch the natural empty-worklist exit; otherwise stop with Ctrl-C.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use newsweave::{
    resolve_run_mode, BinaryRecord, GroupName, RunMode, Runner, ScanFuture, StageFuture, Store,
    StoreFuture, UpdateProtocol, UpdaterConfig,
};
use tokio::time::sleep;

const DEFAULT_UPDATE_THREADS: usize = 2;
const DEFAULT_UPDATE_WAIT_SECS: u64 = 10;
const DEFAULT_DEAD_BINARY_AGE_DAYS: u32 = 3;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

const SEED_GROUPS: [&str; 3] = [
    "alt.binaries.sounds",
    "alt.binaries.pictures",
    "alt.binaries.archives",
];

#[derive(Parser, Debug)]
#[command(name = "start", about = "Usenet index update daemon")]
struct Args {
    /// Run in the background (requires a pid file).
    #[arg(short = 'd', long)]
    daemonize: bool,

    /// Pid file path used with --daemonize; overrides NEWSWEAVE_PID_FILE.
    #[arg(short = 'p', long)]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_demo_tracing();
    let args = Args::parse();

    let update_threads =
        parse_env_with_default("NEWSWEAVE_UPDATE_THREADS", DEFAULT_UPDATE_THREADS)?;
    let update_wait_secs =
        parse_env_with_default("NEWSWEAVE_UPDATE_WAIT_SECS", DEFAULT_UPDATE_WAIT_SECS)?;
    let dead_binary_age_days = parse_env_with_default(
        "NEWSWEAVE_DEAD_BINARY_AGE_DAYS",
        DEFAULT_DEAD_BINARY_AGE_DAYS,
    )?;
    let max_cycles = parse_optional_env::<usize>("NEWSWEAVE_MAX_CYCLES")?;

    let mut builder = UpdaterConfig::builder()
        .update_threads(update_threads)
        .update_wait(Duration::from_secs(update_wait_secs))
        .dead_binary_age_days(dead_binary_age_days)
        .metrics_interval(Duration::from_secs(30));
    if let Some(path) = env::var_os("NEWSWEAVE_PID_FILE") {
        builder = builder.pid_file(PathBuf::from(path));
    }
    let config = builder.build()?;

    let mode = resolve_run_mode(args.daemonize, args.pid_file, &config)?;
    let pid_file = match &mode {
        RunMode::Background { pid_file } => {
            fs::write(pid_file, std::process::id().to_string())
                .with_context(|| format!("failed to write pid file {}", pid_file.display()))?;
            tracing::info!(
                pid_file = %pid_file.display(),
                "pid file written; process supervision is left to the caller"
            );
            Some(pid_file.clone())
        }
        RunMode::Foreground => None,
    };

    let store = Arc::new(DemoStore::seeded(dead_binary_age_days, max_cycles));
    let protocol = DemoProtocol::new(store.clone());
    let mut runner = Runner::new(config, store, protocol);

    let outcome = runner.run_until_ctrl_c().await;

    if let Some(path) = pid_file {
        if let Err(err) = fs::remove_file(&path) {
            tracing::warn!(error = %err, "failed to remove pid file");
        }
    }

    let reason = outcome?;
    tracing::info!(?reason, "update daemon stopped");
    Ok(())
}

fn init_demo_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    newsweave::init_tracing();
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_optional_env(key)?.unwrap_or(default))
}

fn parse_optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

struct DemoInner {
    groups: BTreeSet<GroupName>,
    binaries: Vec<BinaryRecord>,
    list_calls: usize,
    max_cycles: Option<usize>,
}

/// In-memory stand-in for the indexer database.
struct DemoStore {
    inner: Mutex<DemoInner>,
}

impl DemoStore {
    fn seeded(dead_binary_age_days: u32, max_cycles: Option<usize>) -> Self {
        let groups = SEED_GROUPS.iter().copied().map(GroupName::from).collect();
        let stale_age = chrono::Duration::days(i64::from(dead_binary_age_days) + 7);
        let binaries = vec![
            BinaryRecord::new("lost.archive.part01.rar", Utc::now() - stale_age),
            BinaryRecord::new("fresh.sample.part01.rar", Utc::now()),
        ];
        Self {
            inner: Mutex::new(DemoInner {
                groups,
                binaries,
                list_calls: 0,
                max_cycles,
            }),
        }
    }

    fn insert_binary(&self, record: BinaryRecord) {
        self.inner.lock().unwrap().binaries.push(record);
    }

    fn binary_count(&self) -> usize {
        self.inner.lock().unwrap().binaries.len()
    }
}

impl Store for DemoStore {
    fn list_active_groups(&self) -> StoreFuture<'_, BTreeSet<GroupName>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.list_calls += 1;
            if let Some(limit) = inner.max_cycles {
                if inner.list_calls > limit {
                    return Ok(BTreeSet::new());
                }
            }
            Ok(inner.groups.clone())
        })
    }

    fn delete_binaries_posted_before(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.binaries.len();
            inner.binaries.retain(|record| !record.expired_by(cutoff));
            Ok((before - inner.binaries.len()) as u64)
        })
    }
}

/// Simulated indexing logic: every scan deposits one fake binary.
struct DemoProtocol {
    store: Arc<DemoStore>,
    cycle: u64,
}

impl DemoProtocol {
    fn new(store: Arc<DemoStore>) -> Self {
        Self { store, cycle: 0 }
    }
}

impl UpdateProtocol for DemoProtocol {
    fn scan(&self, group: GroupName) -> ScanFuture {
        let store = Arc::clone(&self.store);
        Box::pin(async move {
            sleep(Duration::from_millis(25)).await;
            let name = format!("{group}.yEnc.{}", Utc::now().timestamp_millis());
            store.insert_binary(BinaryRecord::new(name, Utc::now()));
            tracing::info!(group = %group, "scanned group for new articles");
            Ok(())
        })
    }

    fn assemble<'a>(&'a mut self) -> StageFuture<'a> {
        self.cycle += 1;
        let cycle = self.cycle;
        let binaries = self.store.binary_count();
        Box::pin(async move {
            tracing::info!(cycle, binaries, "assembled raw parts into binaries");
            Ok(())
        })
    }

    fn group_releases<'a>(&'a mut self) -> StageFuture<'a> {
        Box::pin(async {
            tracing::info!("grouped binaries into releases");
            Ok(())
        })
    }

    fn shutdown<'a>(&'a mut self) -> StageFuture<'a> {
        Box::pin(async {
            tracing::info!("indexing state flushed");
            Ok(())
        })
    }
}
