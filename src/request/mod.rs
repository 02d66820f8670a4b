//! Immutable request records.
//!
//! A `Request` describes one planned HTTP interaction: where to fetch, which
//! parsing step receives the response, and the payload maps that flow down
//! the request chain. Requests are built once, enqueued once, and never
//! mutated afterwards; the response carries a back-reference for ancestry.

mod resolve;

pub use resolve::resolve_url;

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Default priority for regular requests. Lower numbers are served first.
pub const DEFAULT_PRIORITY: i32 = 9;

/// Default priority for archive requests.
pub const ARCHIVE_PRIORITY: i32 = 1;

/// Request body payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Bytes(Vec<u8>),
    Form(Vec<(String, String)>),
    Json(Value),
}

impl Body {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Canonical rendering used for deduplication keys: sorted-key JSON for
    /// mappings, element-sorted pairs for forms, raw bytes otherwise.
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::Bytes(bytes) => bytes.clone(),
            Self::Form(pairs) => {
                let mut sorted = pairs.clone();
                sorted.sort();
                sorted
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&")
                    .into_bytes()
            }
            Self::Json(value) => canonical_json(value).into_bytes(),
        }
    }
}

/// Render a JSON value with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String((*k).clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{fields}}}")
        }
        Value::Array(items) => {
            let rendered = items
                .iter()
                .map(canonical_json)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{rendered}]")
        }
        other => other.to_string(),
    }
}

/// Deduplication behavior for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupKey {
    /// Hash the final URL, sorted query, and canonical body.
    Auto,
    /// Bypass deduplication entirely.
    Skip,
    /// Use the given key verbatim.
    Explicit(String),
}

/// Per-chain headers and cookies merged into every descendant request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permanent {
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

impl Permanent {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.cookies.is_empty()
    }

    /// Merge `parent` beneath this map. Own keys win.
    pub fn merged_over(&self, parent: &Permanent) -> Permanent {
        let mut merged = parent.clone();
        merged.headers.extend(self.headers.clone());
        merged.cookies.extend(self.cookies.clone());
        merged
    }
}

/// One planned HTTP interaction.
///
/// Never mutated after construction. `previous_requests` holds ancestry
/// oldest-first; nodes are shared so deep chains stay linear in memory.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    /// Name of the parsing step invoked with this request's response.
    pub continuation: String,
    /// Base for relative-URL resolution in this request's descendants.
    pub current_location: Option<String>,
    pub previous_requests: Vec<Arc<Request>>,
    /// User data collected across the chain; flows into final results.
    pub accumulated: Map<String, Value>,
    /// Navigation-only data (session tokens, hidden form values).
    pub aux: Map<String, Value>,
    pub permanent: Permanent,
    /// Ordering key only; `None` takes the yielding step's priority.
    pub priority: Option<i32>,
    /// If true, descendants keep this request's own base location.
    pub nonnavigating: bool,
    /// If true, the response body is persisted through the archive sink.
    pub archive: bool,
    /// File-type hint used when synthesizing archive filenames.
    pub expected_type: Option<String>,
    pub(crate) speculator: Option<String>,
    pub(crate) speculator_id: Option<u64>,
    pub dedup: DedupKey,
}

impl Request {
    /// Start building a GET request.
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::POST, url)
    }

    /// Start building a request with an arbitrary method.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    /// Immediate ancestor, if any.
    pub fn parent(&self) -> Option<&Arc<Request>> {
        self.previous_requests.last()
    }

    /// True for requests emitted by the speculation engine.
    pub fn is_speculative(&self) -> bool {
        self.speculator.is_some()
    }

    /// Name of the speculator that emitted this request.
    pub fn speculator(&self) -> Option<&str> {
        self.speculator.as_deref()
    }

    /// ID within the speculator's sequence space, for speculative requests.
    pub fn speculative_id(&self) -> Option<u64> {
        self.speculator_id
    }

    /// Priority used for queue ordering once the yielding step is known.
    pub fn effective_priority(&self, step_priority: i32) -> i32 {
        self.priority.unwrap_or(if self.archive {
            ARCHIVE_PRIORITY
        } else {
            step_priority
        })
    }

    /// Deduplication key, or `None` when this request bypasses the check.
    pub fn dedup_key(&self) -> Option<String> {
        match &self.dedup {
            DedupKey::Skip => None,
            DedupKey::Explicit(key) => Some(key.clone()),
            DedupKey::Auto => Some(self.compute_dedup_key()),
        }
    }

    /// Hash URL + query sorted by key + canonical body into a hex digest.
    fn compute_dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());

        if let Ok(parsed) = url::Url::parse(&self.url) {
            let mut pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();
            for (key, value) in pairs {
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hasher.update(value.as_bytes());
                hasher.update(b"&");
            }
        }

        hasher.update(self.body.canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Builder for [`Request`].
///
/// Payload maps handed to the builder are cloned, so the caller's copies
/// stay independent of the constructed request.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    body: Body,
    continuation: String,
    accumulated: Map<String, Value>,
    aux: Map<String, Value>,
    permanent: Permanent,
    priority: Option<i32>,
    nonnavigating: bool,
    archive: bool,
    expected_type: Option<String>,
    dedup: DedupKey,
}

impl RequestBuilder {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: Body::None,
            continuation: String::new(),
            accumulated: Map::new(),
            aux: Map::new(),
            permanent: Permanent::default(),
            priority: None,
            nonnavigating: false,
            archive: false,
            expected_type: None,
            dedup: DedupKey::Auto,
        }
    }

    /// Name the parsing step that receives the response.
    pub fn continuation(mut self, name: impl Into<String>) -> Self {
        self.continuation = name.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Body::Form(pairs);
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = Body::Bytes(bytes);
        self
    }

    /// Replace the accumulated-data map. The map is deep-copied.
    pub fn accumulated(mut self, data: &Map<String, Value>) -> Self {
        self.accumulated = data.clone();
        self
    }

    /// Add one accumulated-data field.
    pub fn accumulate(mut self, key: impl Into<String>, value: Value) -> Self {
        self.accumulated.insert(key.into(), value);
        self
    }

    /// Replace the aux-data map. The map is deep-copied.
    pub fn aux(mut self, data: &Map<String, Value>) -> Self {
        self.aux = data.clone();
        self
    }

    /// Add one aux-data field.
    pub fn aux_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.aux.insert(key.into(), value);
        self
    }

    /// Replace the permanent map. The map is deep-copied.
    pub fn permanent(mut self, permanent: &Permanent) -> Self {
        self.permanent = permanent.clone();
        self
    }

    /// Header merged into every descendant's HTTP parameters.
    pub fn permanent_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.permanent.headers.insert(name.into(), value.into());
        self
    }

    /// Cookie merged into every descendant's HTTP parameters.
    pub fn permanent_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.permanent.cookies.insert(name.into(), value.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Descendants resolve against this request's own base, not its response.
    pub fn nonnavigating(mut self) -> Self {
        self.nonnavigating = true;
        self
    }

    /// Persist the response body through the archive sink.
    pub fn archive(mut self) -> Self {
        self.archive = true;
        self
    }

    /// Persist the response body, hinting the file type for naming.
    pub fn archive_as(mut self, expected_type: impl Into<String>) -> Self {
        self.archive = true;
        self.expected_type = Some(expected_type.into());
        self
    }

    /// Use an explicit deduplication key.
    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup = DedupKey::Explicit(key.into());
        self
    }

    /// Bypass deduplication for this request.
    pub fn skip_dedup(mut self) -> Self {
        self.dedup = DedupKey::Skip;
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            continuation: self.continuation,
            current_location: None,
            previous_requests: Vec::new(),
            accumulated: self.accumulated,
            aux: self.aux,
            permanent: self.permanent,
            priority: self.priority,
            nonnavigating: self.nonnavigating,
            archive: self.archive,
            expected_type: self.expected_type,
            speculator: None,
            speculator_id: None,
            dedup: self.dedup,
        }
    }
}
