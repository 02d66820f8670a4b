//! Items yielded by parsing steps.
//!
//! Each value a step produces is classified for dispatch: parsed data routed
//! to the data callback, follow-up requests routed to the queue, or nothing.

use serde_json::{Map, Value};

use crate::error::DataFormatFailure;
use crate::request::Request;
use crate::schema::RecordSchema;

/// A parsed datum, either ready or pending schema validation.
#[derive(Debug, Clone)]
pub enum ParsedData {
    /// Already-validated (or validation-free) payload.
    Value(Value),
    /// Raw document awaiting validation against a schema.
    Deferred(DeferredValidation),
}

/// A raw document plus the schema it must validate against.
#[derive(Debug, Clone)]
pub struct DeferredValidation {
    pub document: Map<String, Value>,
    pub schema: RecordSchema,
    pub url: Option<String>,
}

impl DeferredValidation {
    pub fn new(document: Map<String, Value>, schema: RecordSchema) -> Self {
        Self {
            document,
            schema,
            url: None,
        }
    }

    /// Record the URL the document came from, for error reporting.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Run schema validation, returning the validated datum.
    pub fn confirm(&self) -> Result<Value, DataFormatFailure> {
        self.schema.validate(&self.document, self.url.as_deref())
    }
}

/// One value produced by a parsing step.
#[derive(Debug, Clone)]
pub enum ScrapeItem {
    Data(ParsedData),
    Request(Request),
    /// Explicit no-op yield; the driver ignores it.
    Nothing,
}

impl ScrapeItem {
    /// A datum that needs no validation.
    pub fn data(value: Value) -> Self {
        Self::Data(ParsedData::Value(value))
    }

    /// A raw document to validate against `schema` before delivery.
    pub fn deferred(document: Map<String, Value>, schema: RecordSchema) -> Self {
        Self::Data(ParsedData::Deferred(DeferredValidation::new(document, schema)))
    }

    pub fn request(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Request> for ScrapeItem {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}
