//! Driver core: configuration, lifecycle, and the two execution flavors.
//!
//! Both drivers share one observable contract (callbacks, queue semantics,
//! dispatch); they differ only in parallelism. The serial driver drains the
//! queue on cancellation; the parallel driver leaves pending work in place
//! so a persistent-queue variant can resume it.

mod callbacks;
mod dispatch;
mod parallel;
mod queue;
mod serial;

pub use callbacks::{
    ArchiveSinkFn, Callbacks, DataFn, DuplicateCheck, InvalidDataFn, RunCompleteFn, RunStartFn,
    StructuralErrorFn, TransientExceptionFn,
};
pub use parallel::ParallelDriver;
pub use queue::{Enqueue, RequestQueue};
pub use serial::Driver;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manager::RetryConfig;

/// Cooperative cancellation signal.
///
/// Clone freely; all clones observe the same flag. The drivers check it
/// before each queue pop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub requests_fetched: usize,
    pub data_items: usize,
    pub invalid_items: usize,
    pub archived: usize,
    pub duplicates_skipped: usize,
    pub transient_failures: usize,
    pub structural_failures: usize,
}

/// Run counters shared across workers.
#[derive(Clone, Default)]
pub(crate) struct SharedStats(Arc<StatsInner>);

#[derive(Default)]
struct StatsInner {
    requests_fetched: AtomicUsize,
    data_items: AtomicUsize,
    invalid_items: AtomicUsize,
    archived: AtomicUsize,
    duplicates_skipped: AtomicUsize,
    transient_failures: AtomicUsize,
    structural_failures: AtomicUsize,
}

impl SharedStats {
    pub fn add_fetched(&self) {
        self.0.requests_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_data(&self) {
        self.0.data_items.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_invalid(&self) {
        self.0.invalid_items.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_archived(&self) {
        self.0.archived.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_duplicate(&self) {
        self.0.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transient(&self) {
        self.0.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_structural(&self) {
        self.0.structural_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStats {
        RunStats {
            requests_fetched: self.0.requests_fetched.load(Ordering::Relaxed),
            data_items: self.0.data_items.load(Ordering::Relaxed),
            invalid_items: self.0.invalid_items.load(Ordering::Relaxed),
            archived: self.0.archived.load(Ordering::Relaxed),
            duplicates_skipped: self.0.duplicates_skipped.load(Ordering::Relaxed),
            transient_failures: self.0.transient_failures.load(Ordering::Relaxed),
            structural_failures: self.0.structural_failures.load(Ordering::Relaxed),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    std::env::temp_dir().join("docketfetch_files")
}

fn default_workers() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

/// Retry policy parameters, JSON-configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Directory the archive sink writes under.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Worker count for the parallel driver.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Fixed courtesy delay after each fetch.
    #[serde(default)]
    pub request_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// When set, the manager is wrapped in exponential-backoff retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            workers: default_workers(),
            request_timeout_secs: default_timeout_secs(),
            request_delay_ms: 0,
            user_agent: None,
            retry: None,
        }
    }
}

impl DriverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}
