//! Request execution against HTTP targets.
//!
//! The manager owns the HTTP client, merges permanent chain data into each
//! outgoing request, and converts transport outcomes (server errors,
//! timeouts) into the typed transient failures the driver understands.

mod retry;

pub use retry::{RetryConfig, RetryManager};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::TransientError;
use crate::request::{Body, Request};
use crate::response::Response;

pub const USER_AGENT: &str =
    "docketfetch/0.3 (public records research; github.com/monokrome/docketfetch)";

/// TLS overrides a scraper may supply to the manager.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub accept_invalid_certs: bool,
    /// Additional PEM-encoded root certificate.
    pub extra_root_pem: Option<Vec<u8>>,
}

/// Executes one resolved request.
///
/// Implementations convert transport failures into [`TransientError`];
/// non-retryable outcomes come back as ordinary responses for the driver to
/// classify.
#[async_trait]
pub trait RequestManager: Send + Sync {
    /// Fetch a request. `encoding` is the continuation's declared charset,
    /// applied when the response headers name none.
    async fn fetch(
        &self,
        request: Arc<Request>,
        encoding: Option<&str>,
    ) -> Result<Response, TransientError>;
}

/// HTTP manager over a shared connection-pooling client.
#[derive(Clone)]
pub struct HttpManager {
    client: Client,
    timeout: Duration,
    request_delay: Duration,
}

impl HttpManager {
    /// Create a manager with the default user agent and no courtesy delay.
    pub fn new(timeout: Duration) -> Self {
        Self::with_options(timeout, Duration::ZERO, None, None)
    }

    /// Create a manager with custom user agent, per-request courtesy delay,
    /// and TLS overrides.
    pub fn with_options(
        timeout: Duration,
        request_delay: Duration,
        user_agent: Option<&str>,
        tls: Option<TlsOptions>,
    ) -> Self {
        let mut builder = Client::builder()
            .user_agent(user_agent.unwrap_or(USER_AGENT))
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true);

        if let Some(tls) = tls {
            if tls.accept_invalid_certs {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(pem) = tls.extra_root_pem {
                if let Ok(cert) = reqwest::Certificate::from_pem(&pem) {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }

        let client = builder.build().expect("Failed to create HTTP client");
        Self {
            client,
            timeout,
            request_delay,
        }
    }
}

#[async_trait]
impl RequestManager for HttpManager {
    async fn fetch(
        &self,
        request: Arc<Request>,
        encoding: Option<&str>,
    ) -> Result<Response, TransientError> {
        let url = request.url.clone();
        let mut builder = self.client.request(request.method.clone(), &url);

        // Permanent chain data first, so the request's own headers win.
        for (name, value) in &request.permanent.headers {
            builder = builder.header(name, value);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.permanent.cookies.is_empty() {
            builder = builder.header(
                reqwest::header::COOKIE,
                cookie_header(&request.permanent.cookies),
            );
        }

        builder = match &request.body {
            Body::None => builder,
            Body::Bytes(bytes) => builder.body(bytes.clone()),
            Body::Form(pairs) => builder.form(pairs),
            Body::Json(value) => builder.json(value),
        };

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(e, &url, self.timeout))?;

        let status = response.status().as_u16();
        debug!(
            url = %url,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched"
        );

        if status >= 500 || status == 429 {
            return Err(TransientError::BadStatus {
                status,
                expected: vec![200],
                url,
            });
        }

        let final_url = response.url().to_string();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(e, &url, self.timeout))?
            .to_vec();
        let text = decode_text(&body, headers.get("content-type").map(|s| s.as_str()), encoding);

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        Ok(Response {
            status,
            headers,
            body,
            text,
            final_url,
            request,
        })
    }
}

/// Render permanent cookies as a Cookie header value.
fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn classify_transport_error(err: reqwest::Error, url: &str, timeout: Duration) -> TransientError {
    if err.is_timeout() {
        TransientError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs_f64(),
        }
    } else {
        TransientError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Decode a response body: charset from the Content-Type header, falling
/// back to the continuation's declared encoding, then UTF-8.
fn decode_text(body: &[u8], content_type: Option<&str>, fallback: Option<&str>) -> String {
    let charset = content_type
        .and_then(header_charset)
        .or_else(|| fallback.map(|s| s.to_ascii_lowercase()));

    match charset.as_deref() {
        Some("iso-8859-1") | Some("latin-1") | Some("latin1") | Some("windows-1252") => {
            body.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

fn header_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"').to_ascii_lowercase())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_rendering() {
        let mut cookies = BTreeMap::new();
        cookies.insert("session".to_string(), "abc".to_string());
        cookies.insert("csrf".to_string(), "xyz".to_string());
        assert_eq!(cookie_header(&cookies), "csrf=xyz; session=abc");
    }

    #[test]
    fn test_header_charset_extraction() {
        assert_eq!(
            header_charset("text/html; charset=ISO-8859-1"),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(header_charset("application/json"), None);
    }

    #[test]
    fn test_decode_text_latin1_fallback() {
        // 0xE9 is é in Latin-1 and invalid alone in UTF-8.
        let body = [b'c', b'a', b'f', 0xE9];
        assert_eq!(
            decode_text(&body, Some("text/html; charset=iso-8859-1"), None),
            "café"
        );
        assert_eq!(decode_text(&body, None, Some("latin-1")), "café");
        assert_eq!(decode_text(&body, None, None), "caf\u{FFFD}");
    }
}
