//! The metadata trust client.
//!
//! [`TrustClient`] owns the trusted state for one repository namespace. Each
//! [`TrustClient::refresh`] runs a full cycle (root chain, then timestamp,
//! snapshot and targets) against a staged copy of the state. The copy is
//! written to the cache and published only when every step succeeded, so a
//! failed or cancelled cycle leaves both the in-memory state and the cache
//! exactly as they were.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::cache::{metadata_key, root_history_key, CacheEntry, MetadataCache};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::UpdateError;
use crate::keys::KeyDiagnostic;
use crate::metadata::{RoleBody, RoleName, SignedEnvelope, TargetInfo};
use crate::refresh::TopLevelRefresher;
use crate::root_chain::RootChainUpdater;
use crate::telemetry::{NoopTelemetry, RefreshTelemetry};
use crate::transport::MetadataTransport;
use crate::trust::{decode_body, TrustState, TrustedMetadata, TrustedRoot};

/// Versions of the currently trusted metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedVersions {
    pub root: u64,
    pub timestamp: Option<u64>,
    pub snapshot: Option<u64>,
    pub targets: Option<u64>,
}

impl TrustedVersions {
    fn of(state: &TrustState) -> Self {
        Self {
            root: state.root.version(),
            timestamp: state.timestamp.as_ref().map(TrustedMetadata::version),
            snapshot: state.snapshot.as_ref().map(TrustedMetadata::version),
            targets: state.targets.as_ref().map(TrustedMetadata::version),
        }
    }
}

/// Summary of a committed refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub versions: TrustedVersions,
    /// Root rotations applied by this cycle.
    pub root_rotations: u32,
    /// Key identity diagnostics of the trusted root.
    pub key_diagnostics: Vec<KeyDiagnostic>,
}

/// Verifying client for one repository namespace.
pub struct TrustClient {
    config: ClientConfig,
    transport: Arc<dyn MetadataTransport>,
    cache: Arc<dyn MetadataCache>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn RefreshTelemetry>,
    // Serialises refresh cycles.
    cycle: Mutex<()>,
    state: RwLock<Arc<TrustState>>,
}

impl TrustClient {
    /// Builds a client anchored at `bootstrap_root`.
    ///
    /// The bootstrap root is trusted as provisioned; its signatures are checked
    /// by the first refresh. A newer root found in the cache replaces it when
    /// it verifies against its own root keys, and cached timestamp, snapshot
    /// and targets metadata that verify against the chosen root become the
    /// rollback baseline. Cached entries that cannot be decoded or fail
    /// verification are deleted.
    pub fn new(
        config: ClientConfig,
        bootstrap_root: &[u8],
        transport: Arc<dyn MetadataTransport>,
        cache: Arc<dyn MetadataCache>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, UpdateError> {
        let bootstrap = TrustedRoot::from_slice(bootstrap_root)?;
        let root = load_cached_root(cache.as_ref(), &config.namespace, bootstrap)?;
        let mut state = TrustState::new(root);
        state.timestamp = load_cached_role(cache.as_ref(), &config.namespace, &state.root)?;
        state.snapshot = load_cached_role(cache.as_ref(), &config.namespace, &state.root)?;
        state.targets = load_cached_role(cache.as_ref(), &config.namespace, &state.root)?;

        for diagnostic in state.root.key_diagnostics() {
            log_diagnostic(state.root.version(), diagnostic);
        }

        let versions = TrustedVersions::of(&state);
        tracing::info!(
            namespace = %config.namespace,
            root = versions.root,
            timestamp = ?versions.timestamp,
            snapshot = ?versions.snapshot,
            targets = ?versions.targets,
            "tuf: client initialised"
        );
        let client = Self {
            config,
            transport,
            cache,
            clock,
            telemetry: Arc::new(NoopTelemetry),
            cycle: Mutex::new(()),
            state: RwLock::new(Arc::new(state)),
        };
        Ok(client)
    }

    /// Replaces the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn RefreshTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs one refresh cycle.
    ///
    /// Cycles never overlap: a second caller waits for the running cycle and
    /// then runs its own against the state that cycle published.
    pub async fn refresh(&self) -> Result<RefreshOutcome, UpdateError> {
        let _cycle = self.cycle.lock().await;
        let timeout = self.config.updater.cycle_timeout;
        let result = match tokio::time::timeout(timeout, self.run_cycle()).await {
            Ok(result) => result,
            Err(_) => Err(UpdateError::CycleTimeout { timeout }),
        };

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    namespace = %self.config.namespace,
                    root = outcome.versions.root,
                    timestamp = ?outcome.versions.timestamp,
                    snapshot = ?outcome.versions.snapshot,
                    targets = ?outcome.versions.targets,
                    root_rotations = outcome.root_rotations,
                    "tuf: refresh committed"
                );
                self.telemetry.on_refresh_success(outcome);
            }
            Err(err) => {
                tracing::warn!(
                    namespace = %self.config.namespace,
                    class = %err.class(),
                    role = ?err.role(),
                    error = %err,
                    "tuf: refresh rejected"
                );
                self.telemetry.on_refresh_rejected(err);
            }
        }
        result
    }

    async fn run_cycle(&self) -> Result<RefreshOutcome, UpdateError> {
        let current = self.trusted_state().await;
        let mut staged = TrustState::clone(&current);
        let updater = &self.config.updater;

        let chain = RootChainUpdater::new(self.transport.as_ref(), updater, self.clock.as_ref())
            .update(&staged.root)
            .await?;
        for diagnostic in &chain.diagnostics {
            self.report_diagnostic(chain.root.version(), diagnostic);
        }
        if chain.rotations > 0 && staged.adopt_root(chain.root) {
            tracing::info!(
                "tuf: timestamp or snapshot keys rotated, discarding their trusted metadata"
            );
        }

        TopLevelRefresher::new(self.transport.as_ref(), updater, self.clock.as_ref())
            .refresh(&mut staged)
            .await?;

        let outcome = RefreshOutcome {
            versions: TrustedVersions::of(&staged),
            root_rotations: chain.rotations,
            key_diagnostics: staged.root.key_diagnostics().to_vec(),
        };
        self.commit(staged, &chain.adopted).await?;
        Ok(outcome)
    }

    /// Persists and publishes a staged state.
    ///
    /// No await point separates the cache writes from the publication, so a
    /// cancelled cycle either commits everything or nothing.
    async fn commit(&self, staged: TrustState, adopted: &[(u64, Vec<u8>)]) -> Result<(), UpdateError> {
        let mut published = self.state.write().await;
        let namespace = &self.config.namespace;
        let cache = self.cache.as_ref();

        for (version, bytes) in adopted {
            cache.write_raw(&root_history_key(namespace, *version), bytes)?;
        }
        cache.write(
            &metadata_key(namespace, RoleName::Root.file_name()),
            staged.root.envelope(),
        )?;
        persist_role(cache, namespace, staged.timestamp.as_ref())?;
        persist_role(cache, namespace, staged.snapshot.as_ref())?;
        persist_role(cache, namespace, staged.targets.as_ref())?;

        *published = Arc::new(staged);
        Ok(())
    }

    fn report_diagnostic(&self, root_version: u64, diagnostic: &KeyDiagnostic) {
        log_diagnostic(root_version, diagnostic);
        self.telemetry.on_key_diagnostic(diagnostic);
    }

    /// The trusted state published by the last committed cycle.
    pub async fn trusted_state(&self) -> Arc<TrustState> {
        self.state.read().await.clone()
    }

    pub async fn trusted_root(&self) -> TrustedRoot {
        self.trusted_state().await.root.clone()
    }

    pub async fn versions(&self) -> TrustedVersions {
        TrustedVersions::of(&*self.trusted_state().await)
    }

    /// Looks up a target in the trusted targets metadata.
    pub async fn target(&self, name: &str) -> Option<TargetInfo> {
        let state = self.trusted_state().await;
        state.targets.as_ref()?.body().targets.get(name).cloned()
    }

    /// Every target in the trusted targets metadata.
    pub async fn targets(&self) -> BTreeMap<String, TargetInfo> {
        let state = self.trusted_state().await;
        state
            .targets
            .as_ref()
            .map(|targets| targets.body().targets.clone())
            .unwrap_or_default()
    }
}

fn log_diagnostic(root_version: u64, diagnostic: &KeyDiagnostic) {
    match diagnostic {
        KeyDiagnostic::KeyIdMismatch { asserted, computed } => tracing::warn!(
            root_version,
            asserted = %asserted,
            computed = %computed,
            "tuf: key id does not match key digest"
        ),
    }
}

fn persist_role<T: RoleBody>(
    cache: &dyn MetadataCache,
    namespace: &str,
    metadata: Option<&TrustedMetadata<T>>,
) -> Result<(), UpdateError> {
    let key = metadata_key(namespace, T::ROLE.file_name());
    match metadata {
        Some(metadata) => cache.write(&key, metadata.envelope())?,
        None => cache.delete(&key)?,
    }
    Ok(())
}

fn load_cached_root(
    cache: &dyn MetadataCache,
    namespace: &str,
    bootstrap: TrustedRoot,
) -> Result<TrustedRoot, UpdateError> {
    let key = metadata_key(namespace, RoleName::Root.file_name());
    // Undecodable entries are discarded like unverifiable ones.
    let cached = match cache.read(&key) {
        Ok(None) => return Ok(bootstrap),
        Ok(Some(entry)) => entry
            .into_envelope()
            .ok_or_else(|| UpdateError::Invalid {
                role: RoleName::Root,
                reason: "cached root is not structured metadata".to_string(),
            })
            .and_then(TrustedRoot::from_envelope)
            .and_then(|root| root.verify_self().map(|()| root)),
        Err(err) => Err(UpdateError::from(err)),
    };
    match cached {
        Ok(root) if root.version() > bootstrap.version() => {
            tracing::debug!(version = root.version(), "tuf: using cached root");
            Ok(root)
        }
        Ok(_) => Ok(bootstrap),
        Err(err) => {
            tracing::warn!(error = %err, key = %key, "tuf: discarding invalid cached root");
            cache.delete(&key)?;
            Ok(bootstrap)
        }
    }
}

fn load_cached_role<T: RoleBody>(
    cache: &dyn MetadataCache,
    namespace: &str,
    root: &TrustedRoot,
) -> Result<Option<TrustedMetadata<T>>, UpdateError> {
    let role = T::ROLE;
    let key = metadata_key(namespace, role.file_name());
    let verified = match cache.read(&key) {
        Ok(None) => return Ok(None),
        Ok(Some(entry)) => verify_cached(role, root, entry),
        Err(err) => Err(UpdateError::from(err)),
    };
    match verified {
        Ok((envelope, body)) => Ok(Some(TrustedMetadata::new(envelope, body))),
        Err(err) => {
            tracing::warn!(role = %role, error = %err, key = %key, "tuf: discarding invalid cached metadata");
            cache.delete(&key)?;
            Ok(None)
        }
    }
}

fn verify_cached<T: RoleBody>(
    role: RoleName,
    root: &TrustedRoot,
    entry: CacheEntry,
) -> Result<(SignedEnvelope, T), UpdateError> {
    let envelope = entry.into_envelope().ok_or_else(|| UpdateError::Invalid {
        role,
        reason: "cached entry is not structured metadata".to_string(),
    })?;
    root.verify_role(role, &envelope)?;
    let body = decode_body(&envelope)?;
    Ok((envelope, body))
}
