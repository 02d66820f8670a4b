//! HTTP response wrappers.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::request::Request;

/// A fetched response, fully buffered.
///
/// Header names are stored lowercase. `final_url` reflects any redirects the
/// transport followed; `request` is the originating request record.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub text: String,
    pub final_url: String,
    pub request: Arc<Request>,
}

impl Response {
    /// Check if the status code is in the 2xx class.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a response header by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the Content-Length header.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|s| s.parse().ok())
    }
}

/// A response whose body was persisted through the archive sink.
///
/// Derefs to the underlying [`Response`]; `file_url` is the path the sink
/// returned for the stored body.
#[derive(Debug, Clone)]
pub struct ArchiveResponse {
    response: Response,
    pub file_url: String,
}

impl ArchiveResponse {
    pub fn new(response: Response, file_url: impl Into<String>) -> Self {
        Self {
            response,
            file_url: file_url.into(),
        }
    }

    /// Local path of the persisted body.
    pub fn local_path(&self) -> &Path {
        Path::new(&self.file_url)
    }

    pub fn into_inner(self) -> Response {
        self.response
    }
}

impl Deref for ArchiveResponse {
    type Target = Response;

    fn deref(&self) -> &Response {
        &self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Response {
        let request = Request::get("https://example.com/file.pdf")
            .continuation("save")
            .build();
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/pdf".to_string());
        headers.insert("content-length".to_string(), "42".to_string());
        Response {
            status: 200,
            headers,
            body: vec![1, 2, 3],
            text: String::new(),
            final_url: "https://example.com/file.pdf".to_string(),
            request: Arc::new(request),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = sample();
        assert_eq!(response.header("Content-Type"), Some("application/pdf"));
        assert_eq!(response.content_length(), Some(42));
    }

    #[test]
    fn test_archive_response_derefs() {
        let archived = ArchiveResponse::new(sample(), "/tmp/file.pdf");
        assert!(archived.is_success());
        assert_eq!(archived.local_path(), Path::new("/tmp/file.pdf"));
    }
}
