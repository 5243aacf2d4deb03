//! Telemetry hooks for refresh cycles.
//!
//! [`RefreshTelemetry`] is invoked by [`crate::TrustClient`] after every
//! cycle. [`CountingTelemetry`] keeps relaxed atomic counters that embedders
//! can export to whatever metrics backend they use.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::client::RefreshOutcome;
use crate::error::{ErrorClass, UpdateError};
use crate::keys::KeyDiagnostic;

/// Receives refresh cycle events.
pub trait RefreshTelemetry: Send + Sync {
    /// A cycle completed and its metadata was committed.
    fn on_refresh_success(&self, _outcome: &RefreshOutcome) {}
    /// A cycle failed; nothing was committed.
    fn on_refresh_rejected(&self, _error: &UpdateError) {}
    /// A key table entry's asserted identity differs from its digest.
    fn on_key_diagnostic(&self, _diagnostic: &KeyDiagnostic) {}
}

/// Telemetry sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl RefreshTelemetry for NoopTelemetry {}

/// Aggregated telemetry counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    refresh_success: AtomicU64,
    refresh_rejected: AtomicU64,
    refresh_fatal: AtomicU64,
    refresh_transport: AtomicU64,
    root_rotations: AtomicU64,
    key_diagnostics: AtomicU64,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            refresh_success: self.refresh_success.load(Ordering::Relaxed),
            refresh_rejected: self.refresh_rejected.load(Ordering::Relaxed),
            refresh_fatal: self.refresh_fatal.load(Ordering::Relaxed),
            refresh_transport: self.refresh_transport.load(Ordering::Relaxed),
            root_rotations: self.root_rotations.load(Ordering::Relaxed),
            key_diagnostics: self.key_diagnostics.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Number of committed refresh cycles.
    pub refresh_success: u64,
    /// Cycles that failed because metadata was rejected.
    pub refresh_rejected: u64,
    /// Cycles that failed on a fatal configuration or storage error.
    pub refresh_fatal: u64,
    /// Cycles that failed because the repository was unreachable.
    pub refresh_transport: u64,
    /// Root rotations applied across committed cycles.
    pub root_rotations: u64,
    /// Key identity diagnostics observed.
    pub key_diagnostics: u64,
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refresh_success={}, refresh_rejected={}, refresh_fatal={}, refresh_transport={}, root_rotations={}, key_diagnostics={}",
            self.refresh_success,
            self.refresh_rejected,
            self.refresh_fatal,
            self.refresh_transport,
            self.root_rotations,
            self.key_diagnostics
        )
    }
}

/// Telemetry implementation that maintains atomic counters for every signal.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    /// Creates a new telemetry instance backed by the provided counter set.
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    /// Returns the underlying counter set.
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

impl RefreshTelemetry for CountingTelemetry {
    fn on_refresh_success(&self, outcome: &RefreshOutcome) {
        self.counters.refresh_success.fetch_add(1, Ordering::Relaxed);
        self.counters
            .root_rotations
            .fetch_add(u64::from(outcome.root_rotations), Ordering::Relaxed);
    }

    fn on_refresh_rejected(&self, error: &UpdateError) {
        let counter = match error.class() {
            ErrorClass::Rejection => &self.counters.refresh_rejected,
            ErrorClass::Fatal => &self.counters.refresh_fatal,
            ErrorClass::Transport => &self.counters.refresh_transport,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_key_diagnostic(&self, _diagnostic: &KeyDiagnostic) {
        self.counters.key_diagnostics.fetch_add(1, Ordering::Relaxed);
    }
}
