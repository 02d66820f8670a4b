//! The fetch-and-dispatch cycle shared by both drivers.
//!
//! One cycle resolves a request through the manager, invokes the named
//! continuation, and routes every yielded item: data to the data callback
//! (after any deferred validation), requests back to the queue, failures to
//! their typed callbacks. Dispatch of one item completes before the next is
//! pulled from the step's stream.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::archive::default_archive_sink;
use crate::error::{AssumptionError, Disposition, DriverError};
use crate::item::{ParsedData, ScrapeItem};
use crate::manager::RequestManager;
use crate::request::{Request, DEFAULT_PRIORITY};
use crate::response::{ArchiveResponse, Response};
use crate::scraper::{Invocation, Registry, Scraper, StepContext, StepSpec};
use crate::speculation::SpeculationEngine;

use super::queue::{Enqueue, RequestQueue};
use super::{Callbacks, SharedStats};

/// Everything one cycle needs, shared across workers.
pub(crate) struct ExecutionContext {
    pub scraper: Arc<dyn Scraper>,
    pub registry: Arc<Registry>,
    pub manager: Arc<dyn RequestManager>,
    pub callbacks: Arc<Callbacks>,
    pub storage_dir: PathBuf,
    pub stats: SharedStats,
}

/// Priority a request inherits from its continuation's step.
pub(crate) fn continuation_priority(registry: &Registry, request: &Request) -> i32 {
    registry
        .get_continuation(&request.continuation)
        .map(|step| step.priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

/// Enqueue a request. A deduplication skip of a speculative probe counts as
/// a failure for its speculator, which may issue a replacement probe.
pub(crate) async fn enqueue(
    ctx: &ExecutionContext,
    queue: &Mutex<RequestQueue>,
    speculation: &Mutex<SpeculationEngine>,
    request: Request,
    step_priority: i32,
) {
    let mut pending = Some((request, step_priority));
    while let Some((request, priority)) = pending.take() {
        let probe_identity = request
            .speculator()
            .map(|name| (name.to_string(), request.speculative_id().unwrap_or(0)));

        if queue.lock().await.push(request, priority) == Enqueue::Duplicate {
            ctx.stats.add_duplicate();
            if let Some((name, id)) = probe_identity {
                let next = speculation.lock().await.record(&name, id, false);
                if let Some(probe) = next {
                    let priority = continuation_priority(&ctx.registry, &probe);
                    pending = Some((probe, priority));
                }
            }
        }
    }
}

/// Seed the queue: typed entry invocations first, then every speculator.
pub(crate) async fn seed(
    ctx: &ExecutionContext,
    queue: &Mutex<RequestQueue>,
    speculation: &Mutex<SpeculationEngine>,
    invocations: &[Invocation],
) -> Result<(), DriverError> {
    let seeds = ctx.registry.initial_seed(invocations)?;
    debug!(count = seeds.len(), "seeding entry requests");
    for request in seeds {
        enqueue(ctx, queue, speculation, request, DEFAULT_PRIORITY).await;
    }

    let probes = speculation.lock().await.seed();
    debug!(count = probes.len(), "seeding speculative probes");
    for probe in probes {
        let priority = continuation_priority(&ctx.registry, &probe);
        enqueue(ctx, queue, speculation, probe, priority).await;
    }
    Ok(())
}

/// Record a speculative request's outcome, enqueuing any extension probe.
async fn record_speculation(
    ctx: &ExecutionContext,
    queue: &Mutex<RequestQueue>,
    speculation: &Mutex<SpeculationEngine>,
    request: &Request,
    success: bool,
) {
    let Some(name) = request.speculator() else {
        return;
    };
    let id = request.speculative_id().unwrap_or(0);
    let next = speculation.lock().await.record(name, id, success);
    if let Some(probe) = next {
        let priority = continuation_priority(&ctx.registry, &probe);
        enqueue(ctx, queue, speculation, probe, priority).await;
    }
}

/// Fetch one request and dispatch everything its continuation yields.
///
/// `Err` stops the run with that error; resolved failures return `Ok` and
/// the caller moves on to the next request.
pub(crate) async fn process_request(
    ctx: &ExecutionContext,
    queue: &Mutex<RequestQueue>,
    speculation: &Mutex<SpeculationEngine>,
    request: Request,
) -> Result<(), DriverError> {
    let step = ctx
        .registry
        .get_continuation(&request.continuation)
        .cloned()
        .ok_or_else(|| DriverError::UnknownContinuation(request.continuation.clone()))?;

    let request = Arc::new(request);
    let response = match ctx
        .manager
        .fetch(Arc::clone(&request), step.encoding.as_deref())
        .await
    {
        Ok(response) => response,
        Err(err) => {
            ctx.stats.add_transient();
            record_speculation(ctx, queue, speculation, &request, false).await;
            let disposition = match &ctx.callbacks.on_transient_exception {
                Some(callback) => Disposition::from_continue(callback(&err)),
                None => Disposition::Halt,
            };
            return match disposition {
                Disposition::Skip => {
                    warn!(url = %err.url(), error = %err, "transient failure resolved, skipping request");
                    Ok(())
                }
                Disposition::Halt => Err(err.into()),
            };
        }
    };
    ctx.stats.add_fetched();

    if request.is_speculative() {
        let success = response.is_success() && !ctx.scraper.fails_successfully(&response);
        record_speculation(ctx, queue, speculation, &request, success).await;
    }

    let context = if request.archive {
        let path = persist_archive(ctx, &response)?;
        ctx.stats.add_archived();
        StepContext::from_archive(ArchiveResponse::new(response, path.to_string_lossy()))
    } else {
        StepContext::new(response, None)
    };

    run_step(ctx, queue, speculation, &step, context).await
}

/// Persist an archive response body through the configured sink.
fn persist_archive(ctx: &ExecutionContext, response: &Response) -> Result<PathBuf, DriverError> {
    let expected_type = response.request.expected_type.as_deref();
    let result = match &ctx.callbacks.on_archive {
        Some(sink) => sink(
            &response.body,
            &response.final_url,
            expected_type,
            &ctx.storage_dir,
        ),
        None => default_archive_sink(
            &response.body,
            &response.final_url,
            expected_type,
            &ctx.storage_dir,
        ),
    };
    result.map_err(|source| DriverError::Archive {
        url: response.final_url.clone(),
        source,
    })
}

/// Invoke a step and dispatch its yields one at a time.
async fn run_step(
    ctx: &ExecutionContext,
    queue: &Mutex<RequestQueue>,
    speculation: &Mutex<SpeculationEngine>,
    step: &StepSpec,
    context: StepContext,
) -> Result<(), DriverError> {
    let response = context.shared_response();
    let mut stream = step.invoke(context);
    while let Some(item) = stream.next().await {
        match item {
            Ok(item) => dispatch_item(ctx, queue, speculation, step, &response, item).await?,
            // A failure mid-sequence ends the sequence, like one up front.
            Err(err) => return handle_structural(ctx, err),
        }
    }
    Ok(())
}

/// Route one yielded item by kind.
async fn dispatch_item(
    ctx: &ExecutionContext,
    queue: &Mutex<RequestQueue>,
    speculation: &Mutex<SpeculationEngine>,
    step: &StepSpec,
    response: &Response,
    item: ScrapeItem,
) -> Result<(), DriverError> {
    match item {
        ScrapeItem::Nothing => Ok(()),
        ScrapeItem::Data(ParsedData::Value(value)) => {
            deliver_data(ctx, value);
            Ok(())
        }
        ScrapeItem::Data(ParsedData::Deferred(deferred)) => match deferred.confirm() {
            Ok(value) => {
                deliver_data(ctx, value);
                Ok(())
            }
            Err(failure) => {
                ctx.stats.add_invalid();
                match &ctx.callbacks.on_invalid_data {
                    Some(callback) => {
                        warn!(schema = %failure.schema, "document failed validation");
                        callback(&deferred);
                        Ok(())
                    }
                    None => Err(AssumptionError::DataFormat(failure).into()),
                }
            }
        },
        ScrapeItem::Request(child) => {
            let resolved = if child.nonnavigating && !child.archive {
                child.resolve_from_request(&response.request)
            } else {
                child.resolve_from_response(response)
            };
            match resolved {
                Ok(resolved) => {
                    enqueue(ctx, queue, speculation, resolved, step.priority).await;
                    Ok(())
                }
                Err(DriverError::Url { url, message }) => handle_structural(
                    ctx,
                    AssumptionError::scraper(
                        format!("yielded request has an unresolvable URL: {message}"),
                        url,
                    ),
                ),
                Err(other) => Err(other),
            }
        }
    }
}

fn deliver_data(ctx: &ExecutionContext, value: Value) {
    ctx.stats.add_data();
    match &ctx.callbacks.on_data {
        Some(callback) => callback(value),
        None => debug!("parsed datum dropped: no data callback configured"),
    }
}

/// Report a structural failure; the callback's boolean decides the run.
fn handle_structural(ctx: &ExecutionContext, err: AssumptionError) -> Result<(), DriverError> {
    ctx.stats.add_structural();
    let disposition = match &ctx.callbacks.on_structural_error {
        Some(callback) => Disposition::from_continue(callback(&err)),
        None => Disposition::Halt,
    };
    match disposition {
        Disposition::Skip => {
            warn!(error = %err, "structural failure resolved, continuing");
            Ok(())
        }
        Disposition::Halt => Err(err.into()),
    }
}
