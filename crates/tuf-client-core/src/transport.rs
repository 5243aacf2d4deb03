//! Metadata transport abstraction.
//!
//! The updater never talks to the network directly; it asks a
//! [`MetadataTransport`] for a metadata file by role and optional version and
//! receives the raw bytes, or `None` when the repository does not have it.

#[cfg(any(test, feature = "testing"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "testing"))]
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::UpdateError;
use crate::metadata::RoleName;

/// Errors surfaced by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport-level issue (DNS, TLS, socket, etc.).
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    /// The repository answered with a non-success status other than 404.
    #[error("unexpected status {0}")]
    Status(u16),
    /// The response exceeded the permitted length.
    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: u64 },
    /// The repository URL could not be parsed or joined.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// The provided URL violates the required transport policy.
    #[error("insecure base url requires explicit opt-in: {0}")]
    InsecureUrl(String),
}

/// A request for one metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub role: RoleName,
    /// Requested version; produces a `V.role.json` file name when set.
    pub version: Option<u64>,
    /// Maximum number of bytes accepted for the file.
    pub max_length: u64,
}

impl FetchRequest {
    /// Returns the repository file name for this request.
    pub fn file_name(&self) -> String {
        match self.version {
            Some(version) => format!("{version}.{}", self.role.file_name()),
            None => self.role.file_name().to_string(),
        }
    }
}

/// Fetches metadata files from a repository.
#[async_trait]
pub trait MetadataTransport: Send + Sync {
    /// Returns the bytes of the requested file, or `None` when it does not exist.
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Vec<u8>>, TransportError>;
}

/// In-memory repository keyed by file name, for tests.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct StaticTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

#[cfg(any(test, feature = "testing"))]
impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Publishes (or replaces) a file.
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), bytes.into());
    }

    /// Withdraws a file.
    pub fn remove(&self, name: &str) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// File names requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl MetadataTransport for StaticTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<Option<Vec<u8>>, TransportError> {
        let name = request.file_name();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned();
        match bytes {
            Some(bytes) if bytes.len() as u64 > request.max_length => {
                Err(TransportError::TooLarge {
                    limit: request.max_length,
                })
            }
            other => Ok(other),
        }
    }
}

/// Runs one fetch under `timeout`, attributing failures to the requested role.
pub(crate) async fn fetch_with_timeout(
    transport: &dyn MetadataTransport,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, UpdateError> {
    tracing::debug!(
        role = %request.role,
        file = %request.file_name(),
        max_length = request.max_length,
        "tuf: fetching metadata"
    );
    match tokio::time::timeout(timeout, transport.fetch(request)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(source)) => Err(UpdateError::Transport {
            role: request.role,
            source,
        }),
        Err(_) => Err(UpdateError::FetchTimeout {
            role: request.role,
            timeout,
        }),
    }
}
