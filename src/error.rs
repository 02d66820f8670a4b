//! Error taxonomy for scraper execution.
//!
//! Failures split along two axes: permanent assumption failures (the scraper
//! code or its expected schema no longer matches the target) and transient
//! transport failures (a retry may succeed). Each kind surfaces to its own
//! callback on the driver; absent a callback it propagates out of the run.

use std::collections::BTreeMap;

use thiserror::Error;

/// Selector language used by a structural assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Xpath,
    Css,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xpath => "xpath",
            Self::Css => "css",
        }
    }
}

impl std::fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scraper-declared assumption about the target that did not hold.
///
/// These are permanent: retrying the same request cannot fix them.
#[derive(Debug, Clone, Error)]
pub enum AssumptionError {
    #[error(transparent)]
    Scraper(ScraperFailure),
    #[error(transparent)]
    Structure(StructureFailure),
    #[error(transparent)]
    DataFormat(DataFormatFailure),
}

impl AssumptionError {
    /// Build a general scraper assumption failure.
    pub fn scraper(message: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Scraper(ScraperFailure {
            message: message.into(),
            url: url.into(),
            context: BTreeMap::new(),
        })
    }
}

/// General scraper assumption failure with free-form context.
#[derive(Debug, Clone, Error)]
#[error("scraper assumption failed at {url}: {message}")]
pub struct ScraperFailure {
    pub message: String,
    pub url: String,
    pub context: BTreeMap<String, String>,
}

impl ScraperFailure {
    /// Attach a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// A structural assertion on HTML or JSON shape that was violated.
#[derive(Debug, Clone, Error)]
#[error(
    "{kind} `{selector}` matched {actual} element(s) at {url}, expected {expected_min}..={} ({description})",
    .expected_max.map(|n| n.to_string()).unwrap_or_else(|| "*".to_string())
)]
pub struct StructureFailure {
    pub selector: String,
    pub kind: SelectorKind,
    pub description: String,
    pub expected_min: usize,
    pub expected_max: Option<usize>,
    pub actual: usize,
    pub url: String,
}

/// A document that failed validation against its record schema.
#[derive(Debug, Clone, Error)]
#[error(
    "document failed validation against schema `{schema}`: {} field error(s)",
    .errors.len()
)]
pub struct DataFormatFailure {
    pub errors: Vec<FieldError>,
    pub document: serde_json::Value,
    pub schema: String,
    pub url: Option<String>,
}

/// One per-field validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A transport-level failure that may succeed on retry.
#[derive(Debug, Clone, Error)]
pub enum TransientError {
    /// Server answered with a status in the retryable class (>= 500 or 429).
    #[error("unexpected status {status} from {url} (expected one of {expected:?})")]
    BadStatus {
        status: u16,
        expected: Vec<u16>,
        url: String,
    },
    /// The transport timed out before a response arrived.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: f64 },
    /// Connection, DNS, or protocol failure below the HTTP layer.
    #[error("transport failure for {url}: {message}")]
    Network { url: String, message: String },
}

impl TransientError {
    /// URL the failing request was addressed to.
    pub fn url(&self) -> &str {
        match self {
            Self::BadStatus { url, .. } | Self::Timeout { url, .. } | Self::Network { url, .. } => {
                url
            }
        }
    }
}

/// What the driver does with a request after a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Skip the failed request and continue with the next one.
    Skip,
    /// Stop the run.
    Halt,
}

impl Disposition {
    /// Interpret a failure callback's boolean return.
    pub fn from_continue(keep_going: bool) -> Self {
        if keep_going {
            Self::Skip
        } else {
            Self::Halt
        }
    }
}

/// Any error that can terminate a driver run.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Assumption(#[from] AssumptionError),
    #[error(transparent)]
    Transient(#[from] TransientError),
    #[error("no parsing step registered under `{0}`")]
    UnknownContinuation(String),
    #[error("no entry registered under `{0}`")]
    UnknownEntry(String),
    #[error("invalid URL `{url}`: {message}")]
    Url { url: String, message: String },
    #[error("archive sink failed for {url}")]
    Archive {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

impl DriverError {
    pub fn url_error(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Url {
            url: url.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_failure_display() {
        let failure = StructureFailure {
            selector: "//table[@id='cases']/tr".to_string(),
            kind: SelectorKind::Xpath,
            description: "case rows".to_string(),
            expected_min: 1,
            expected_max: None,
            actual: 0,
            url: "https://example.com/cases".to_string(),
        };
        let rendered = failure.to_string();
        assert!(rendered.contains("xpath"));
        assert!(rendered.contains("1..=*"));
        assert!(rendered.contains("case rows"));
    }

    #[test]
    fn test_disposition_from_callback_return() {
        assert_eq!(Disposition::from_continue(true), Disposition::Skip);
        assert_eq!(Disposition::from_continue(false), Disposition::Halt);
    }

    #[test]
    fn test_transient_url_accessor() {
        let err = TransientError::Timeout {
            url: "https://example.com".to_string(),
            timeout_secs: 30.0,
        };
        assert_eq!(err.url(), "https://example.com");
    }
}
