//! Parallel driver: a fixed-size pool of cooperative workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

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

/// How long an idle worker waits for in-flight peers to enqueue more work.
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Worker-pool driver sharing one priority queue and one HTTP client.
///
/// Ordering is per-priority FIFO at enqueue time; between workers there is
/// no execution-order guarantee. On cancellation each worker completes its
/// current request and exits; the queue is not drained, preserving pending
/// work for persistent-queue variants.
pub struct ParallelDriver {
    scraper: Arc<dyn Scraper>,
    config: DriverConfig,
    callbacks: Arc<Callbacks>,
    cancel: CancelSignal,
    invocations: Vec<Invocation>,
    overrides: HashMap<String, SpeculationOverrides>,
    duplicate_check: Option<DuplicateCheck>,
    manager: Option<Arc<dyn RequestManager>>,
}

impl ParallelDriver {
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

    pub fn with_invocations(mut self, invocations: Vec<Invocation>) -> Self {
        self.invocations = invocations;
        self
    }

    pub fn with_speculation_overrides(
        mut self,
        overrides: HashMap<String, SpeculationOverrides>,
    ) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_duplicate_check(mut self, check: impl FnMut(&str) -> bool + Send + 'static) -> Self {
        self.duplicate_check = Some(Box::new(check));
        self
    }

    pub fn with_manager(mut self, manager: Arc<dyn RequestManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    fn build_manager(&self) -> Arc<dyn RequestManager> {
        if let Some(manager) = &self.manager {
            return Arc::clone(manager);
        }
        // One shared client keeps connection pooling across workers.
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

    /// Process to completion with `workers` cooperative tasks.
    ///
    /// `on_run_complete` fires on every exit path.
    pub async fn run(&mut self) -> Result<RunStats, DriverError> {
        let registry = Arc::new(Registry::for_scraper(self.scraper.as_ref()));
        let name = registry.scraper_name().to_string();

        if let Some(callback) = &self.callbacks.on_run_start {
            callback(&name);
        }
        info!(scraper = %name, workers = self.config.workers, "run starting");

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
        let ctx = Arc::new(ExecutionContext {
            scraper: Arc::clone(&self.scraper),
            registry: Arc::clone(&registry),
            manager: self.build_manager(),
            callbacks: Arc::clone(&self.callbacks),
            storage_dir: self.config.storage_dir.clone(),
            stats: stats.clone(),
        });
        let queue = Arc::new(Mutex::new(RequestQueue::new(self.duplicate_check.take())));
        let speculation = Arc::new(Mutex::new(SpeculationEngine::for_registry(
            &registry,
            &self.overrides,
        )));

        dispatch::seed(&ctx, &queue, &speculation, &self.invocations).await?;

        let workers = self.config.workers.max(1);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let halted = Arc::new(AtomicBool::new(false));
        let halt_error: Arc<Mutex<Option<DriverError>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = Arc::clone(&ctx);
            let queue = Arc::clone(&queue);
            let speculation = Arc::clone(&speculation);
            let cancel = self.cancel.clone();
            let in_flight = Arc::clone(&in_flight);
            let halted = Arc::clone(&halted);
            let halt_error = Arc::clone(&halt_error);

            handles.push(tokio::spawn(async move {
                loop {
                    // Cancellation and halt are observed between requests;
                    // the current fetch-and-dispatch always completes.
                    if cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
                        break;
                    }

                    let popped = {
                        let mut queue = queue.lock().await;
                        let request = queue.pop();
                        if request.is_some() {
                            in_flight.fetch_add(1, Ordering::SeqCst);
                        }
                        request
                    };

                    let Some(request) = popped else {
                        if in_flight.load(Ordering::SeqCst) == 0 {
                            break;
                        }
                        tokio::time::sleep(IDLE_BACKOFF).await;
                        continue;
                    };

                    let result =
                        dispatch::process_request(&ctx, &queue, &speculation, request).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);

                    if let Err(err) = result {
                        let mut slot = halt_error.lock().await;
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                        halted.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                debug!(worker_id, "worker exiting");
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        if let Some(err) = halt_error.lock().await.take() {
            return Err(err);
        }
        Ok(stats.snapshot())
    }
}
