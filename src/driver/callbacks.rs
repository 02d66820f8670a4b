//! Driver callback table.
//!
//! Every callback is optional. Absent a failure callback, the failure is
//! fatal to the run; absent `on_archive`, the default file sink is used;
//! absent `duplicate_check`, the queue keeps an in-memory seen-set.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{AssumptionError, DriverError, TransientError};
use crate::item::DeferredValidation;

use super::RunStatus;

pub type RunStartFn = Box<dyn Fn(&str) + Send + Sync>;
pub type RunCompleteFn = Box<dyn Fn(&str, RunStatus, Option<&DriverError>) + Send + Sync>;
pub type DataFn = Box<dyn Fn(Value) + Send + Sync>;
pub type InvalidDataFn = Box<dyn Fn(&DeferredValidation) + Send + Sync>;
/// Returns true to continue the run, false to stop it.
pub type StructuralErrorFn = Box<dyn Fn(&AssumptionError) -> bool + Send + Sync>;
/// Returns true to continue the run, false to stop it.
pub type TransientExceptionFn = Box<dyn Fn(&TransientError) -> bool + Send + Sync>;
/// (bytes, url, expected_type, storage_dir) -> persisted path.
pub type ArchiveSinkFn =
    Box<dyn Fn(&[u8], &str, Option<&str>, &Path) -> std::io::Result<PathBuf> + Send + Sync>;
/// Returns true to enqueue the key, false to skip it as a duplicate.
///
/// Handed to the queue at run start (see the driver builders); kept out of
/// [`Callbacks`] because it is stateful.
pub type DuplicateCheck = Box<dyn FnMut(&str) -> bool + Send>;

/// Optional driver callbacks.
#[derive(Default)]
pub struct Callbacks {
    pub on_run_start: Option<RunStartFn>,
    pub on_run_complete: Option<RunCompleteFn>,
    pub on_data: Option<DataFn>,
    pub on_invalid_data: Option<InvalidDataFn>,
    pub on_structural_error: Option<StructuralErrorFn>,
    pub on_transient_exception: Option<TransientExceptionFn>,
    pub on_archive: Option<ArchiveSinkFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_run_start(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_run_start = Some(Box::new(f));
        self
    }

    pub fn on_run_complete(
        mut self,
        f: impl Fn(&str, RunStatus, Option<&DriverError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_run_complete = Some(Box::new(f));
        self
    }

    pub fn on_data(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    pub fn on_invalid_data(
        mut self,
        f: impl Fn(&DeferredValidation) + Send + Sync + 'static,
    ) -> Self {
        self.on_invalid_data = Some(Box::new(f));
        self
    }

    pub fn on_structural_error(
        mut self,
        f: impl Fn(&AssumptionError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_structural_error = Some(Box::new(f));
        self
    }

    pub fn on_transient_exception(
        mut self,
        f: impl Fn(&TransientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_transient_exception = Some(Box::new(f));
        self
    }

    pub fn on_archive(
        mut self,
        f: impl Fn(&[u8], &str, Option<&str>, &Path) -> std::io::Result<PathBuf>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.on_archive = Some(Box::new(f));
        self
    }

}
