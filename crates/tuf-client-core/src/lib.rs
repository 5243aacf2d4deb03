//! Public entry points for the TUF metadata client.
//!
//! The crate verifies repository metadata (root rotation, timestamp, snapshot
//! and targets) against a provisioned root of trust, persists what it trusts,
//! and re-exports the building blocks needed to embed the client without
//! digging into the internal module layout.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod cache;
pub mod canonical;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod keys;
pub mod metadata;
pub mod refresh;
pub mod root_chain;
pub mod signatures;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod trust;

pub use cache::{CacheEntry, CacheError, MemoryCache, MetadataCache};
pub use client::{RefreshOutcome, TrustClient, TrustedVersions};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ClientConfig, MaxLengths, RootVersionStep, TrustEnv, UpdaterConfig};
pub use error::{ErrorClass, UpdateError};
pub use http::{HttpTransport, HttpTransportOptions};
pub use keys::{KeyDiagnostic, KeyError, PublicKey};
pub use metadata::{IntegrityMismatch, RoleName, SignedEnvelope, TargetInfo};
pub use store::{SledCache, StoreIdentity};
pub use telemetry::{
    CountingTelemetry, NoopTelemetry, RefreshTelemetry, TelemetryCounters, TelemetrySnapshot,
};
pub use transport::{FetchRequest, MetadataTransport, TransportError};
#[cfg(any(test, feature = "testing"))]
pub use transport::StaticTransport;
pub use trust::{TrustState, TrustedMetadata, TrustedRoot};
