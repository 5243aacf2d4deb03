//! HTTP transport for TUF metadata.
//!
//! Files are fetched relative to a base URL using a single reusable
//! `reqwest::Client`. A 404 is reported as an absent file; every other
//! non-success status is an error. Responses are read incrementally so the
//! per-role length limit is enforced even when no `Content-Length` is sent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode, Url};

use crate::transport::{FetchRequest, MetadataTransport, TransportError};

/// Options governing how the HTTP client is constructed.
#[derive(Debug, Clone, Copy)]
pub struct HttpTransportOptions {
    /// Whether plaintext (HTTP) endpoints are allowed.
    pub allow_plaintext: bool,
    /// Timeout applied to each request.
    pub timeout: Duration,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            allow_plaintext: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Fetches metadata files over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Builds a transport rooted at `base_url` (the repository's metadata directory).
    pub fn new(base_url: &str, options: HttpTransportOptions) -> Result<Self, TransportError> {
        if !options.allow_plaintext && base_url.starts_with("http://") {
            return Err(TransportError::InsecureUrl(base_url.to_string()));
        }
        // Url::join replaces the last path segment unless the base ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url =
            Url::parse(&normalized).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;

        let mut headers = HeaderMap::new();
        let user_agent = format!("tuf-client/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .map_err(|err| TransportError::InvalidUrl(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Returns the base URL files are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl MetadataTransport for HttpTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Vec<u8>>, TransportError> {
        let url = self
            .base_url
            .join(&request.file_name())
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;

        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        tracing::debug!(
            url = %url,
            status = %status,
            content_length = ?response.content_length(),
            "tuf: http response"
        );
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let limit = request.max_length;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(TransportError::TooLarge { limit });
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(TransportError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Some(body))
    }
}
