//! Errors surfaced by a metadata update cycle.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::CacheError;
use crate::config::RootVersionStep;
use crate::keys::KeyError;
use crate::metadata::{IntegrityMismatch, RoleName};
use crate::signatures::SignatureError;
use crate::transport::TransportError;

/// Coarse classification of an [`UpdateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Trust configuration or local storage is broken; retrying will not help.
    Fatal,
    /// The repository served metadata that must not be trusted.
    Rejection,
    /// The repository could not be reached.
    Transport,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Fatal => f.write_str("fatal"),
            ErrorClass::Rejection => f.write_str("rejection"),
            ErrorClass::Transport => f.write_str("transport"),
        }
    }
}

/// Reasons a refresh cycle failed.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{role}: key table rejected: {source}")]
    Key {
        role: RoleName,
        #[source]
        source: KeyError,
    },
    #[error("{role}: signature check failed: {source}")]
    Signature {
        role: RoleName,
        #[source]
        source: SignatureError,
    },
    #[error("{role} v{version}: {valid} valid signature(s), {threshold} required")]
    SignatureThresholdNotMet {
        role: RoleName,
        version: u64,
        valid: u64,
        threshold: u64,
    },
    #[error("{role}: {file} rolled back from version {trusted} to {candidate}")]
    Rollback {
        role: RoleName,
        file: String,
        trusted: u64,
        candidate: u64,
    },
    #[error("{role}: previously trusted {file} is no longer listed")]
    MetaFileRemoved { role: RoleName, file: String },
    #[error("{role}: metadata expired at {expires}")]
    Freeze {
        role: RoleName,
        expires: DateTime<Utc>,
    },
    #[error("{role}: {file} does not match its pin: {detail}")]
    IntegrityPinMismatch {
        role: RoleName,
        file: String,
        detail: IntegrityMismatch,
    },
    #[error("root: version {candidate} cannot follow {trusted} under the {policy} step policy")]
    RootVersionStep {
        trusted: u64,
        candidate: u64,
        policy: RootVersionStep,
    },
    #[error("{role}: unexpected _type '{found}'")]
    UnexpectedType { role: RoleName, found: String },
    #[error("{role}: unsupported spec_version '{found}'")]
    UnsupportedSpecVersion { role: RoleName, found: String },
    #[error("{role}: {file} not found in repository")]
    MissingMetadata { role: RoleName, file: String },
    #[error("{role}: malformed metadata: {source}")]
    Malformed {
        role: RoleName,
        #[source]
        source: serde_json::Error,
    },
    #[error("{role}: invalid metadata: {reason}")]
    Invalid { role: RoleName, reason: String },
    #[error("{role}: fetch failed: {source}")]
    Transport {
        role: RoleName,
        #[source]
        source: TransportError,
    },
    #[error("{role}: fetch timed out after {timeout:?}")]
    FetchTimeout { role: RoleName, timeout: Duration },
    #[error("refresh cycle timed out after {timeout:?}")]
    CycleTimeout { timeout: Duration },
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl UpdateError {
    /// Returns the coarse class of the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            UpdateError::Key { .. } | UpdateError::Signature { .. } | UpdateError::Cache(_) => {
                ErrorClass::Fatal
            }
            UpdateError::Transport { .. } => ErrorClass::Transport,
            _ => ErrorClass::Rejection,
        }
    }

    /// Returns the role being processed when the error occurred.
    pub fn role(&self) -> Option<RoleName> {
        match self {
            UpdateError::Key { role, .. }
            | UpdateError::Signature { role, .. }
            | UpdateError::SignatureThresholdNotMet { role, .. }
            | UpdateError::Rollback { role, .. }
            | UpdateError::MetaFileRemoved { role, .. }
            | UpdateError::Freeze { role, .. }
            | UpdateError::IntegrityPinMismatch { role, .. }
            | UpdateError::UnexpectedType { role, .. }
            | UpdateError::UnsupportedSpecVersion { role, .. }
            | UpdateError::MissingMetadata { role, .. }
            | UpdateError::Malformed { role, .. }
            | UpdateError::Invalid { role, .. }
            | UpdateError::Transport { role, .. }
            | UpdateError::FetchTimeout { role, .. } => Some(*role),
            UpdateError::RootVersionStep { .. } => Some(RoleName::Root),
            UpdateError::CycleTimeout { .. } | UpdateError::Cache(_) => None,
        }
    }
}
