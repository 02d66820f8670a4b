//! docketfetch - declarative scraper execution engine.
//!
//! A scraper declares typed entry points, named parsing steps, and
//! speculative ID probes; the driver owns a priority request queue and
//! drives the scraper through its HTTP interaction graph, collecting
//! structured results while handling deduplication, retries, speculation,
//! and graceful interruption.

pub mod archive;
pub mod driver;
pub mod error;
pub mod item;
pub mod manager;
pub mod request;
pub mod response;
pub mod schema;
pub mod scraper;
pub mod speculation;

pub use driver::{
    Callbacks, CancelSignal, Driver, DriverConfig, ParallelDriver, RetryPolicy, RunStats,
    RunStatus,
};
pub use error::{
    AssumptionError, DataFormatFailure, Disposition, DriverError, FieldError, ScraperFailure,
    SelectorKind, StructureFailure, TransientError,
};
pub use item::{DeferredValidation, ParsedData, ScrapeItem};
pub use manager::{HttpManager, RequestManager, RetryConfig, RetryManager, TlsOptions};
pub use request::{resolve_url, Body, DedupKey, Permanent, Request, RequestBuilder};
pub use response::{ArchiveResponse, Response};
pub use schema::{FieldKind, FieldSpec, RecordSchema};
pub use scraper::{
    items, nothing, EntryParam, EntrySpec, Invocation, ParamKind, Registry, Scraper, SpeculatorSpec,
    StepContext, StepSpec, StepStream,
};
pub use speculation::{SpeculationEngine, SpeculationOverrides};
