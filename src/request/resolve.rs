//! URL resolution and ancestry extension.
//!
//! Request URLs pass through escape normalization before joining against a
//! base: percent-escapes are decoded and re-encoded once, so a URL that
//! traverses multiple resolutions never picks up double-encoding.

use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{DriverError, Result};
use crate::response::Response;

use super::Request;

/// Everything percent-encoded except unreserved characters and `/`.
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Everything percent-encoded except unreserved characters, `=`, and `&`.
const QUERY_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'=')
    .remove(b'&')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Split off the scheme-and-authority prefix, leaving path + query + fragment.
fn split_authority(url: &str) -> (&str, &str) {
    if let Some(scheme_end) = url.find("://") {
        let after = scheme_end + 3;
        match url[after..].find(['/', '?', '#']) {
            Some(offset) => url.split_at(after + offset),
            None => (url, ""),
        }
    } else {
        ("", url)
    }
}

/// Decode and canonically re-encode the path and query of a URL.
fn normalize_escapes(url: &str) -> String {
    let (prefix, rest) = split_authority(url);

    let (rest, fragment) = match rest.split_once('#') {
        Some((r, f)) => (r, Some(f)),
        None => (rest, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let decoded_path = percent_decode_str(path).decode_utf8_lossy();
    let mut normalized = format!(
        "{prefix}{}",
        utf8_percent_encode(&decoded_path, PATH_SAFE)
    );
    if let Some(query) = query {
        let decoded_query = percent_decode_str(query).decode_utf8_lossy();
        normalized.push('?');
        normalized.push_str(&utf8_percent_encode(&decoded_query, QUERY_SAFE).to_string());
    }
    if let Some(fragment) = fragment {
        normalized.push('#');
        normalized.push_str(fragment);
    }
    normalized
}

/// Normalize `url`'s escapes and join it against `base` per RFC 3986.
///
/// Absolute URLs replace the base; relative URLs resolve against it.
pub fn resolve_url(url: &str, base: &str) -> Result<String> {
    let normalized = normalize_escapes(url);
    let base = Url::parse(base).map_err(|e| DriverError::url_error(base, e))?;
    let joined = base
        .join(&normalized)
        .map_err(|e| DriverError::url_error(&normalized, e))?;
    Ok(joined.to_string())
}

impl Request {
    /// Resolve against a fetched response, extending ancestry with the
    /// response's request.
    ///
    /// Navigating requests adopt the response's final URL as their
    /// descendants' base; non-navigating and archive requests keep the
    /// context's own base.
    pub fn resolve_from_response(mut self, response: &Response) -> Result<Request> {
        let parent = &response.request;
        self.url = resolve_url(&self.url, &response.final_url)?;

        let mut ancestry = parent.previous_requests.clone();
        ancestry.push(Arc::clone(parent));
        self.previous_requests = ancestry;

        self.current_location = if self.nonnavigating || self.archive {
            parent.current_location.clone()
        } else {
            Some(response.final_url.clone())
        };
        self.permanent = self.permanent.merged_over(&parent.permanent);
        Ok(self)
    }

    /// Resolve against a prior request, extending ancestry with it.
    pub fn resolve_from_request(mut self, context: &Arc<Request>) -> Result<Request> {
        let base = context.current_location.as_deref().unwrap_or(&context.url);
        self.url = resolve_url(&self.url, base)?;

        let mut ancestry = context.previous_requests.clone();
        ancestry.push(Arc::clone(context));
        self.previous_requests = ancestry;

        self.current_location = context.current_location.clone();
        self.permanent = self.permanent.merged_over(&context.permanent);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    fn response_for(request: Request, final_url: &str) -> Response {
        Response {
            status: 200,
            headers: Default::default(),
            body: Vec::new(),
            text: String::new(),
            final_url: final_url.to_string(),
            request: Arc::new(request),
        }
    }

    #[test]
    fn test_relative_urls_join_against_base() {
        let resolved = resolve_url("../dockets/22-101", "https://example.com/courts/appeals/").unwrap();
        assert_eq!(resolved, "https://example.com/courts/dockets/22-101");
    }

    #[test]
    fn test_absolute_urls_replace_base() {
        let resolved = resolve_url("https://other.example.com/x", "https://example.com/a").unwrap();
        assert_eq!(resolved, "https://other.example.com/x");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let base = "https://example.com/search/";
        let once = resolve_url("results?q=smith%20v%20jones", base).unwrap();
        let twice = resolve_url(&once, base).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_escapes_are_not_double_encoded() {
        let base = "https://example.com/";
        let resolved = resolve_url("files/brief%20final.pdf", base).unwrap();
        assert_eq!(resolved, "https://example.com/files/brief%20final.pdf");
        let again = resolve_url(&resolved, base).unwrap();
        assert_eq!(again, resolved);
    }

    #[test]
    fn test_unescaped_characters_are_encoded() {
        let resolved = resolve_url("files/brief final.pdf", "https://example.com/").unwrap();
        assert_eq!(resolved, "https://example.com/files/brief%20final.pdf");
    }

    #[test]
    fn test_navigating_child_adopts_final_url() {
        let parent = Request::get("https://example.com/start")
            .continuation("parse")
            .build();
        let response = response_for(parent, "https://example.com/cases/");

        let child = Request::get("docket/1")
            .continuation("parse_docket")
            .build()
            .resolve_from_response(&response)
            .unwrap();

        assert_eq!(child.url, "https://example.com/cases/docket/1");
        assert_eq!(
            child.current_location.as_deref(),
            Some("https://example.com/cases/")
        );
        assert_eq!(child.previous_requests.len(), 1);
    }

    #[test]
    fn test_nonnavigating_child_keeps_context_location() {
        let mut parent = Request::get("https://example.com/page")
            .continuation("parse")
            .build();
        parent.current_location = Some("https://example.com/listing/".to_string());
        let response = response_for(parent, "https://api.example.com/data");

        let child = Request::get("detail?id=4")
            .continuation("parse_detail")
            .nonnavigating()
            .build()
            .resolve_from_response(&response)
            .unwrap();

        assert_eq!(
            child.current_location.as_deref(),
            Some("https://example.com/listing/")
        );
    }

    #[test]
    fn test_request_context_extends_ancestry() {
        let root = Arc::new(
            Request::get("https://example.com/a")
                .continuation("parse")
                .build(),
        );
        let child = Request::get("b")
            .continuation("parse")
            .build()
            .resolve_from_request(&root)
            .unwrap();

        assert_eq!(child.url, "https://example.com/b");
        assert_eq!(child.previous_requests.len(), 1);
        assert_eq!(child.previous_requests[0].url, "https://example.com/a");
    }

    #[test]
    fn test_permanent_data_merges_child_wins() {
        let parent = Arc::new(
            Request::get("https://example.com/login")
                .continuation("parse")
                .permanent_header("Authorization", "Bearer abc")
                .permanent_cookie("session", "parent")
                .build(),
        );
        let child = Request::get("account")
            .continuation("parse")
            .permanent_cookie("session", "child")
            .build()
            .resolve_from_request(&parent)
            .unwrap();

        assert_eq!(child.permanent.headers["Authorization"], "Bearer abc");
        assert_eq!(child.permanent.cookies["session"], "child");
    }
}
