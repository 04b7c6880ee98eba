//! HTTP transport used to reach the CAS server.

use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::Encoding;
use log::{debug, warn};

use crate::validation::error::TransportError;
use crate::validation::types::{HttpMethod, HttpResponse, ValidationRequest};

/// Performs one HTTP round-trip. Never retries.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ValidationRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// Wrap a preconfigured client; `timeout` is what that client enforces.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ValidationRequest) -> Result<HttpResponse, TransportError> {
        debug!("{} {}", request.method, request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::from(e)
            }
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}

/// Resolve a character-encoding label such as `UTF-8` or `ISO-8859-1`.
pub fn resolve_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Decode a response body, replacing malformed sequences.
pub fn decode_body(body: &[u8], encoding: &'static Encoding) -> String {
    let (text, used, had_errors) = encoding.decode(body);
    if had_errors {
        warn!(
            "Response body contained sequences invalid in {}; replaced",
            used.name()
        );
    }
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_encoding_labels() {
        assert_eq!(resolve_encoding("UTF-8"), Some(encoding_rs::UTF_8));
        assert_eq!(resolve_encoding("utf8"), Some(encoding_rs::UTF_8));
        assert_eq!(
            resolve_encoding("ISO-8859-1"),
            Some(encoding_rs::WINDOWS_1252)
        );
        assert!(resolve_encoding("klingon").is_none());
    }

    #[test]
    fn test_decode_latin1_body() {
        let body = b"yes\nj\xfcrgen\n";
        let text = decode_body(body, encoding_rs::WINDOWS_1252);
        assert_eq!(text, "yes\njürgen\n");
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let text = decode_body(b"yes\n\xffalice\n", encoding_rs::UTF_8);
        assert!(text.starts_with("yes\n"));
        assert!(text.contains('\u{FFFD}'));
    }
}
