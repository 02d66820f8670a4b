//! Per-step execution context.
//!
//! Rust's replacement for inject-by-parameter-name: every parsing step
//! receives a `StepContext` and pulls what it needs through accessors.
//! Parsers are invoked on demand, so a step that never touches
//! `json_content()` pays nothing for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::AssumptionError;
use crate::request::Request;
use crate::response::Response;

/// Everything a parsing step can ask the driver for.
#[derive(Debug, Clone)]
pub struct StepContext {
    response: Arc<Response>,
    local_filepath: Option<PathBuf>,
}

impl StepContext {
    pub(crate) fn new(response: Response, local_filepath: Option<PathBuf>) -> Self {
        Self {
            response: Arc::new(response),
            local_filepath,
        }
    }

    /// Build the context for an archived response.
    pub(crate) fn from_archive(response: crate::response::ArchiveResponse) -> Self {
        let path = PathBuf::from(&response.file_url);
        Self::new(response.into_inner(), Some(path))
    }

    /// Shared handle on the response, for the dispatch layer.
    pub(crate) fn shared_response(&self) -> Arc<Response> {
        Arc::clone(&self.response)
    }

    /// The full response object.
    pub fn response(&self) -> &Response {
        self.response.as_ref()
    }

    /// The originating request.
    pub fn request(&self) -> &Arc<Request> {
        &self.response.request
    }

    /// Parent of the originating request, if any.
    pub fn previous_request(&self) -> Option<&Arc<Request>> {
        self.response.request.parent()
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &str {
        &self.response.final_url
    }

    /// Raw decoded response text.
    pub fn text(&self) -> &str {
        &self.response.text
    }

    /// Response text parsed as JSON. A parse error is a scraper assumption
    /// failure: the step declared the endpoint returns JSON.
    pub fn json_content(&self) -> Result<Value, AssumptionError> {
        serde_json::from_str(&self.response.text).map_err(|e| {
            AssumptionError::scraper(
                format!("response is not valid JSON: {e}"),
                &self.response.final_url,
            )
        })
    }

    /// Response text parsed as an HTML document.
    ///
    /// The returned document is not `Send`; extract what you need before the
    /// stream's first yield point.
    pub fn html(&self) -> scraper::Html {
        scraper::Html::parse_document(&self.response.text)
    }

    /// User data collected across the request chain.
    pub fn accumulated_data(&self) -> &Map<String, Value> {
        &self.response.request.accumulated
    }

    /// Navigation-only data carried on the request.
    pub fn aux_data(&self) -> &Map<String, Value> {
        &self.response.request.aux
    }

    /// Path of the persisted body, on archive responses.
    pub fn local_filepath(&self) -> Option<&Path> {
        self.local_filepath.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn context_with_text(text: &str) -> StepContext {
        let request = Request::get("https://example.com/data")
            .continuation("parse")
            .accumulate("court", json!("appeals"))
            .build();
        let response = Response {
            status: 200,
            headers: BTreeMap::new(),
            body: text.as_bytes().to_vec(),
            text: text.to_string(),
            final_url: "https://example.com/data".to_string(),
            request: Arc::new(request),
        };
        StepContext::new(response, None)
    }

    #[test]
    fn test_json_content_parses() {
        let context = context_with_text(r#"{"count": 3}"#);
        assert_eq!(context.json_content().unwrap()["count"], json!(3));
    }

    #[test]
    fn test_json_content_failure_is_assumption_error() {
        let context = context_with_text("<html></html>");
        let err = context.json_content().unwrap_err();
        assert!(matches!(err, AssumptionError::Scraper(_)));
    }

    #[test]
    fn test_html_selects_elements() {
        let context = context_with_text("<table><tr><td>22-101</td></tr></table>");
        let document = context.html();
        let selector = scraper::Selector::parse("td").unwrap();
        let cells: Vec<String> = document
            .select(&selector)
            .map(|el| el.text().collect::<String>())
            .collect();
        assert_eq!(cells, vec!["22-101"]);
    }

    #[test]
    fn test_accumulated_data_reads_request_map() {
        let context = context_with_text("");
        assert_eq!(context.accumulated_data()["court"], json!("appeals"));
    }
}
