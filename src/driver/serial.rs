//! Serial driver.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::manager::{HttpManager, RequestManager, RetryManager};
use crate::scraper::{Invocation, Registry, Scraper};
use crate::speculation::{SpeculationEngine, SpeculationOverrides};

use super::callbacks::DuplicateCheck;
use super::dispatch::{self, ExecutionContext};
use super::queue::RequestQueue;
use super::{Callbacks, CancelSignal, DriverConfig, RunStats, RunStatus, SharedStats};

/// Single-threaded driver.
///
/// `run()` blocks from seeding to completion; suspension points are exactly
/// the HTTP calls. Cancellation is observed at the top of each cycle and
/// drains the queue, so "stop immediately" holds.
pub struct Driver {
    scraper: Arc<dyn Scraper>,
    config: DriverConfig,
    callbacks: Arc<Callbacks>,
    cancel: CancelSignal,
    invocations: Vec<Invocation>,
    overrides: HashMap<String, SpeculationOverrides>,
    duplicate_check: Option<DuplicateCheck>,
    manager: Option<Arc<dyn RequestManager>>,
}

impl Driver {
    pub fn new(scraper: Arc<dyn Scraper>, config: DriverConfig) -> Self {
        Self {
            scraper,
            config,
            callbacks: Arc::new(Callbacks::default()),
            cancel: CancelSignal::new(),
            invocations: Vec::new(),
            overrides: HashMap::new(),
            duplicate_check: None,
            manager: None,
        }
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Typed entry invocations dispatched at seeding.
    pub fn with_invocations(mut self, invocations: Vec<Invocation>) -> Self {
        self.invocations = invocations;
        self
    }

    /// Per-speculator range and tolerance overrides.
    pub fn with_speculation_overrides(
        mut self,
        overrides: HashMap<String, SpeculationOverrides>,
    ) -> Self {
        self.overrides = overrides;
        self
    }

    /// Substitute the default in-memory seen-set.
    pub fn with_duplicate_check(mut self, check: impl FnMut(&str) -> bool + Send + 'static) -> Self {
        self.duplicate_check = Some(Box::new(check));
        self
    }

    /// Substitute the transport, e.g. a retry wrapper or a test double.
    pub fn with_manager(mut self, manager: Arc<dyn RequestManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    fn build_manager(&self) -> Arc<dyn RequestManager> {
        if let Some(manager) = &self.manager {
            return Arc::clone(manager);
        }
        let http = HttpManager::with_options(
            self.config.request_timeout(),
            self.config.request_delay(),
            self.config.user_agent.as_deref(),
            self.scraper.tls(),
        );
        match &self.config.retry {
            Some(policy) => Arc::new(RetryManager::new(Arc::new(http), policy.to_config())),
            None => Arc::new(http),
        }
    }

    /// Process to completion: queue empty, cancellation, or a fatal error.
    ///
    /// `on_run_complete` fires on every exit path.
    pub async fn run(&mut self) -> Result<RunStats, DriverError> {
        let registry = Arc::new(Registry::for_scraper(self.scraper.as_ref()));
        let name = registry.scraper_name().to_string();

        if let Some(callback) = &self.callbacks.on_run_start {
            callback(&name);
        }
        info!(scraper = %name, "run starting");

        let result = self.run_inner(registry).await;

        match &result {
            Ok(stats) => {
                info!(scraper = %name, fetched = stats.requests_fetched, "run completed");
                if let Some(callback) = &self.callbacks.on_run_complete {
                    callback(&name, RunStatus::Completed, None);
                }
            }
            Err(err) => {
                warn!(scraper = %name, error = %err, "run failed");
                if let Some(callback) = &self.callbacks.on_run_complete {
                    callback(&name, RunStatus::Error, Some(err));
                }
            }
        }
        result
    }

    async fn run_inner(&mut self, registry: Arc<Registry>) -> Result<RunStats, DriverError> {
        let stats = SharedStats::default();
        let ctx = ExecutionContext {
            scraper: Arc::clone(&self.scraper),
            registry: Arc::clone(&registry),
            manager: self.build_manager(),
            callbacks: Arc::clone(&self.callbacks),
            storage_dir: self.config.storage_dir.clone(),
            stats: stats.clone(),
        };
        let queue = Mutex::new(RequestQueue::new(self.duplicate_check.take()));
        let speculation = Mutex::new(SpeculationEngine::for_registry(&registry, &self.overrides));

        dispatch::seed(&ctx, &queue, &speculation, &self.invocations).await?;

        loop {
            if self.cancel.is_cancelled() {
                let dropped = queue.lock().await.drain();
                debug!(dropped, "cancellation observed, queue drained");
                break;
            }
            let popped = queue.lock().await.pop();
            let Some(request) = popped else {
                break;
            };
            dispatch::process_request(&ctx, &queue, &speculation, request).await?;
        }

        Ok(stats.snapshot())
    }
}
