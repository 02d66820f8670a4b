//! Scraper surface consumed by the driver.
//!
//! A scraper declares typed entry points, named parsing steps, and
//! speculative probes by registering them on a [`Registry`]. The driver
//! builds the registry once at construction and resolves continuations by
//! name, which keeps requests serializable.

mod context;

pub use context::StepContext;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde_json::{json, Map, Value};

use crate::error::{AssumptionError, DataFormatFailure, DriverError, FieldError, Result};
use crate::item::ScrapeItem;
use crate::manager::TlsOptions;
use crate::request::{Request, DEFAULT_PRIORITY};
use crate::response::Response;
use crate::schema::{FieldKind, RecordSchema};

/// Lazy sequence of items produced by one parsing step.
///
/// The driver dispatches each item before pulling the next, so structural
/// failures raised mid-sequence surface at the same layer as up-front ones.
pub type StepStream = BoxStream<'static, std::result::Result<ScrapeItem, AssumptionError>>;

/// A parsing step body.
pub type StepFn = Arc<dyn Fn(StepContext) -> StepStream + Send + Sync>;

/// An entry-point body: validated parameters to seed requests.
pub type EntryFn = Arc<
    dyn Fn(&Map<String, Value>) -> std::result::Result<Vec<Request>, AssumptionError>
        + Send
        + Sync,
>;

/// A speculator body: integer ID to probe request.
pub type SpeculatorFn = Arc<dyn Fn(u64) -> Request + Send + Sync>;

/// Wrap an eager item list as a step stream.
pub fn items(items: Vec<ScrapeItem>) -> StepStream {
    Box::pin(futures::stream::iter(items.into_iter().map(Ok)))
}

/// A step stream that yields nothing.
pub fn nothing() -> StepStream {
    items(Vec::new())
}

/// A user-supplied scraper: declarative metadata plus parsing code.
///
/// Scrapers are treated as effectively immutable during a run; parsing steps
/// must not mutate shared scraper state.
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    /// Declare entries, steps, and speculators.
    fn register(&self, registry: &mut Registry);

    /// Soft-404 detector: returns true when a response with a successful
    /// status code actually means "not found".
    fn fails_successfully(&self, _response: &Response) -> bool {
        false
    }

    /// TLS overrides passed to the request manager.
    fn tls(&self) -> Option<TlsOptions> {
        None
    }
}

/// A registered parsing step.
#[derive(Clone)]
pub struct StepSpec {
    pub name: String,
    /// Applied to yielded requests that do not set their own priority.
    pub priority: i32,
    /// Charset override applied when decoding the response body.
    pub encoding: Option<String>,
    func: StepFn,
}

impl StepSpec {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(StepContext) -> StepStream + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            encoding: None,
            func: Arc::new(func),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub(crate) fn invoke(&self, context: StepContext) -> StepStream {
        (self.func)(context)
    }
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Kind of one entry parameter.
#[derive(Debug, Clone)]
pub enum ParamKind {
    String,
    Integer,
    Date,
    /// Parameter is a mapping validated against a record schema.
    Model(RecordSchema),
}

/// One declared entry parameter.
#[derive(Debug, Clone)]
pub struct EntryParam {
    pub name: String,
    pub kind: ParamKind,
}

impl EntryParam {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A registered entry point.
#[derive(Clone)]
pub struct EntrySpec {
    pub name: String,
    pub params: Vec<EntryParam>,
    /// True for entries that only trigger speculative probing.
    pub speculative: bool,
    func: EntryFn,
}

impl EntrySpec {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Map<String, Value>) -> std::result::Result<Vec<Request>, AssumptionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            speculative: false,
            func: Arc::new(func),
        }
    }

    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(EntryParam::new(name, kind));
        self
    }

    pub fn speculative(mut self) -> Self {
        self.speculative = true;
        self
    }
}

impl std::fmt::Debug for EntrySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntrySpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("speculative", &self.speculative)
            .finish()
    }
}

/// A registered speculator over a sequential ID space.
#[derive(Clone)]
pub struct SpeculatorSpec {
    pub name: String,
    /// Highest ID known to exist.
    pub highest_observed: u64,
    /// Greatest gap between consecutive present IDs ever observed; governs
    /// the stopping heuristic.
    pub largest_observed_gap: u64,
    /// Documentation only.
    pub observation_date: Option<NaiveDate>,
    func: SpeculatorFn,
}

impl SpeculatorSpec {
    pub fn new(name: impl Into<String>, func: impl Fn(u64) -> Request + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            highest_observed: 1,
            largest_observed_gap: 10,
            observation_date: None,
            func: Arc::new(func),
        }
    }

    pub fn highest_observed(mut self, id: u64) -> Self {
        self.highest_observed = id.max(1);
        self
    }

    pub fn largest_observed_gap(mut self, gap: u64) -> Self {
        self.largest_observed_gap = gap;
        self
    }

    pub fn observed_on(mut self, date: NaiveDate) -> Self {
        self.observation_date = Some(date);
        self
    }

    /// Build the probe request for one ID, stamped as speculative.
    pub(crate) fn probe(&self, id: u64) -> Request {
        let mut request = (self.func)(id);
        request.speculator = Some(self.name.clone());
        request.speculator_id = Some(id);
        request
    }
}

impl std::fmt::Debug for SpeculatorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeculatorSpec")
            .field("name", &self.name)
            .field("highest_observed", &self.highest_observed)
            .field("largest_observed_gap", &self.largest_observed_gap)
            .field("observation_date", &self.observation_date)
            .finish()
    }
}

/// One typed entry invocation: `{entry_name: {param: value, ...}}`.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub entry: String,
    pub params: Map<String, Value>,
}

impl Invocation {
    pub fn new(entry: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            entry: entry.into(),
            params,
        }
    }

    /// Parse the single-key mapping form.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .filter(|map| map.len() == 1)
            .ok_or_else(|| {
                DriverError::Assumption(AssumptionError::scraper(
                    "invocation must be a single-key mapping",
                    "",
                ))
            })?;
        let (entry, params) = object.iter().next().expect("len checked above");
        let params = params
            .as_object()
            .cloned()
            .ok_or_else(|| {
                DriverError::Assumption(AssumptionError::scraper(
                    format!("parameters for entry `{entry}` must be a mapping"),
                    "",
                ))
            })?;
        Ok(Self::new(entry.clone(), params))
    }
}

/// Declarative metadata and code for one scraper, built once per run.
pub struct Registry {
    name: String,
    steps: HashMap<String, StepSpec>,
    entries: Vec<EntrySpec>,
    speculators: Vec<SpeculatorSpec>,
}

impl Registry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: HashMap::new(),
            entries: Vec::new(),
            speculators: Vec::new(),
        }
    }

    /// Build the registry for a scraper.
    pub fn for_scraper(scraper: &dyn Scraper) -> Self {
        let mut registry = Self::new(scraper.name());
        scraper.register(&mut registry);
        registry
    }

    pub fn scraper_name(&self) -> &str {
        &self.name
    }

    pub fn add_step(&mut self, step: StepSpec) -> &mut Self {
        self.steps.insert(step.name.clone(), step);
        self
    }

    pub fn add_entry(&mut self, entry: EntrySpec) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn add_speculator(&mut self, speculator: SpeculatorSpec) -> &mut Self {
        self.speculators.push(speculator);
        self
    }

    /// Resolve a continuation name to its registered step.
    pub fn get_continuation(&self, name: &str) -> Option<&StepSpec> {
        self.steps.get(name)
    }

    pub fn list_entries(&self) -> &[EntrySpec] {
        &self.entries
    }

    pub fn list_speculators(&self) -> &[SpeculatorSpec] {
        &self.speculators
    }

    /// Step metadata sorted by name.
    pub fn list_steps(&self) -> Vec<&StepSpec> {
        let mut steps: Vec<&StepSpec> = self.steps.values().collect();
        steps.sort_by(|a, b| a.name.cmp(&b.name));
        steps
    }

    /// Machine-readable description of this scraper's entries.
    pub fn schema(&self) -> Value {
        let mut entries = Map::new();
        for entry in &self.entries {
            let mut properties = Map::new();
            for param in &entry.params {
                let rendered = match &param.kind {
                    ParamKind::String => json!({"type": "string"}),
                    ParamKind::Integer => json!({"type": "integer"}),
                    ParamKind::Date => json!({"type": "string", "format": "date"}),
                    ParamKind::Model(schema) => schema.to_json_schema(),
                };
                properties.insert(param.name.clone(), rendered);
            }
            entries.insert(
                entry.name.clone(),
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": entry.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
                    "speculative": entry.speculative,
                }),
            );
        }
        json!({
            "title": self.name,
            "entries": entries,
        })
    }

    /// Dispatch typed invocations to their entries, collecting seed requests.
    pub fn initial_seed(&self, invocations: &[Invocation]) -> Result<Vec<Request>> {
        let mut seeds = Vec::new();
        for invocation in invocations {
            let entry = self
                .entries
                .iter()
                .find(|e| e.name == invocation.entry)
                .ok_or_else(|| DriverError::UnknownEntry(invocation.entry.clone()))?;
            let params = validate_params(entry, &invocation.params)
                .map_err(AssumptionError::DataFormat)?;
            let requests = (entry.func)(&params).map_err(DriverError::Assumption)?;
            seeds.extend(requests);
        }
        Ok(seeds)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("entries", &self.entries)
            .field("speculators", &self.speculators)
            .finish()
    }
}

/// Coerce and validate supplied parameters against an entry's declaration.
fn validate_params(
    entry: &EntrySpec,
    supplied: &Map<String, Value>,
) -> std::result::Result<Map<String, Value>, DataFormatFailure> {
    let mut errors = Vec::new();
    let mut validated = Map::new();

    for param in &entry.params {
        let value = match supplied.get(&param.name) {
            Some(value) if !value.is_null() => value,
            _ => {
                errors.push(FieldError::new(&param.name, "required parameter is missing"));
                continue;
            }
        };
        match &param.kind {
            ParamKind::String => coerce_into(FieldKind::String, param, value, &mut validated, &mut errors),
            ParamKind::Integer => coerce_into(FieldKind::Integer, param, value, &mut validated, &mut errors),
            ParamKind::Date => coerce_into(FieldKind::Date, param, value, &mut validated, &mut errors),
            ParamKind::Model(schema) => match value.as_object() {
                Some(document) => match schema.validate(document, None) {
                    Ok(value) => {
                        validated.insert(param.name.clone(), value);
                    }
                    Err(failure) => {
                        for error in failure.errors {
                            errors.push(FieldError::new(
                                format!("{}.{}", param.name, error.field),
                                error.message,
                            ));
                        }
                    }
                },
                None => errors.push(FieldError::new(
                    &param.name,
                    format!("expected a mapping for model `{}`", schema.name),
                )),
            },
        }
    }

    for name in supplied.keys() {
        if !entry.params.iter().any(|p| &p.name == name) {
            errors.push(FieldError::new(name, "unknown parameter"));
        }
    }

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(DataFormatFailure {
            errors,
            document: Value::Object(supplied.clone()),
            schema: entry.name.clone(),
            url: None,
        })
    }
}

fn coerce_into(
    kind: FieldKind,
    param: &EntryParam,
    value: &Value,
    validated: &mut Map<String, Value>,
    errors: &mut Vec<FieldError>,
) {
    match kind.coerce(value) {
        Some(value) => {
            validated.insert(param.name.clone(), value);
        }
        None => errors.push(FieldError::new(
            &param.name,
            format!("expected {}, got {value}", kind.as_str()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> Registry {
        let mut registry = Registry::new("appellate_docket");
        registry.add_entry(
            EntrySpec::new("by_docket", |params| {
                let docket = params["docket"].as_str().unwrap_or_default();
                Ok(vec![Request::get(format!(
                    "https://example.com/dockets/{docket}"
                ))
                .continuation("parse_docket")
                .build()])
            })
            .param("docket", ParamKind::String),
        );
        registry.add_step(StepSpec::new("parse_docket", |_ctx| nothing()).with_priority(5));
        registry
    }

    #[test]
    fn test_initial_seed_dispatches_to_entry() {
        let registry = sample_registry();
        let mut params = Map::new();
        params.insert("docket".to_string(), json!("22-101"));

        let seeds = registry
            .initial_seed(&[Invocation::new("by_docket", params)])
            .unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].url, "https://example.com/dockets/22-101");
    }

    #[test]
    fn test_initial_seed_coerces_primitives() {
        let registry = sample_registry();
        let mut params = Map::new();
        params.insert("docket".to_string(), json!(22101));

        let seeds = registry
            .initial_seed(&[Invocation::new("by_docket", params)])
            .unwrap();
        assert_eq!(seeds[0].url, "https://example.com/dockets/22101");
    }

    #[test]
    fn test_initial_seed_rejects_unknown_entry() {
        let registry = sample_registry();
        let result = registry.initial_seed(&[Invocation::new("nope", Map::new())]);
        assert!(matches!(result, Err(DriverError::UnknownEntry(name)) if name == "nope"));
    }

    #[test]
    fn test_initial_seed_rejects_unknown_parameter() {
        let registry = sample_registry();
        let mut params = Map::new();
        params.insert("docket".to_string(), json!("22-101"));
        params.insert("tribunal".to_string(), json!("x"));

        let result = registry.initial_seed(&[Invocation::new("by_docket", params)]);
        assert!(matches!(
            result,
            Err(DriverError::Assumption(AssumptionError::DataFormat(_)))
        ));
    }

    #[test]
    fn test_invocation_from_single_key_mapping() {
        let parsed =
            Invocation::from_value(&json!({"by_docket": {"docket": "22-101"}})).unwrap();
        assert_eq!(parsed.entry, "by_docket");
        assert_eq!(parsed.params["docket"], json!("22-101"));

        assert!(Invocation::from_value(&json!({"a": {}, "b": {}})).is_err());
        assert!(Invocation::from_value(&json!("by_docket")).is_err());
    }

    #[test]
    fn test_schema_document_lists_entries() {
        let schema = sample_registry().schema();
        assert_eq!(schema["title"], json!("appellate_docket"));
        assert_eq!(
            schema["entries"]["by_docket"]["properties"]["docket"]["type"],
            json!("string")
        );
    }

    #[test]
    fn test_speculator_probe_is_stamped() {
        let speculator = SpeculatorSpec::new("case_ids", |id| {
            Request::get(format!("https://example.com/case/{id}"))
                .continuation("parse_case")
                .build()
        })
        .highest_observed(3)
        .largest_observed_gap(2);

        let probe = speculator.probe(7);
        assert!(probe.is_speculative());
        assert_eq!(probe.speculator(), Some("case_ids"));
        assert_eq!(probe.url, "https://example.com/case/7");
    }
}
