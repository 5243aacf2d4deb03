//! Root rotation chain walking.
//!
//! Starting from the trusted root `N`, the updater requests `N+1.root.json`
//! until the repository reports it absent. Each candidate must be signed by
//! a threshold of the previous root's root keys and by a threshold of its own
//! root keys before it replaces the trusted root.

use crate::clock::Clock;
use crate::config::UpdaterConfig;
use crate::error::UpdateError;
use crate::keys::KeyDiagnostic;
use crate::metadata::{RoleName, SignedEnvelope};
use crate::transport::{fetch_with_timeout, FetchRequest, MetadataTransport};
use crate::trust::TrustedRoot;

/// States of a root chain walk, logged as the walk progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootChainState {
    /// The starting root is being checked for self-consistency.
    Bootstrapped { version: u64 },
    /// A candidate for the next version is being fetched and verified.
    RotatingRoot { from: u64, to: u64 },
    /// The walk finished with a root that is trusted for this cycle.
    Trusted { version: u64 },
    /// The walk failed; nothing it produced is adopted.
    Rejected,
}

/// Result of a successful root chain walk.
#[derive(Debug, Clone)]
pub struct RootChainOutcome {
    /// The newest trusted root.
    pub root: TrustedRoot,
    /// Number of rotations applied.
    pub rotations: u32,
    /// Raw bytes of every adopted root, oldest first, keyed by version.
    pub adopted: Vec<(u64, Vec<u8>)>,
    /// Key diagnostics from every adopted root.
    pub diagnostics: Vec<KeyDiagnostic>,
}

/// Walks the root rotation chain from a trusted anchor.
pub struct RootChainUpdater<'a> {
    transport: &'a dyn MetadataTransport,
    config: &'a UpdaterConfig,
    clock: &'a dyn Clock,
}

impl<'a> RootChainUpdater<'a> {
    pub fn new(
        transport: &'a dyn MetadataTransport,
        config: &'a UpdaterConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            transport,
            config,
            clock,
        }
    }

    /// Walks forward from `trusted` and returns the newest verified root.
    pub async fn update(&self, trusted: &TrustedRoot) -> Result<RootChainOutcome, UpdateError> {
        match self.walk(trusted).await {
            Ok(outcome) => {
                transition(RootChainState::Trusted {
                    version: outcome.root.version(),
                });
                Ok(outcome)
            }
            Err(err) => {
                transition(RootChainState::Rejected);
                tracing::warn!(error = %err, "tuf: root chain rejected");
                Err(err)
            }
        }
    }

    async fn walk(&self, trusted: &TrustedRoot) -> Result<RootChainOutcome, UpdateError> {
        transition(RootChainState::Bootstrapped {
            version: trusted.version(),
        });
        trusted.verify_self()?;

        let mut current = trusted.clone();
        let mut outcome_diagnostics = Vec::new();
        let mut adopted = Vec::new();
        let mut rotations = 0u32;

        loop {
            if rotations >= self.config.max_root_rotations {
                tracing::warn!(
                    version = current.version(),
                    max_root_rotations = self.config.max_root_rotations,
                    "tuf: root rotation ceiling reached, continuing with current root"
                );
                break;
            }
            let Some(next) = current.version().checked_add(1) else {
                break;
            };
            transition(RootChainState::RotatingRoot {
                from: current.version(),
                to: next,
            });

            let request = FetchRequest {
                role: RoleName::Root,
                version: Some(next),
                max_length: self.config.max_lengths.root,
            };
            let Some(bytes) =
                fetch_with_timeout(self.transport, &request, self.config.fetch_timeout).await?
            else {
                break;
            };

            let candidate = self.verify_candidate(&current, &bytes)?;
            tracing::info!(
                from = current.version(),
                to = candidate.version(),
                "tuf: root rotated"
            );
            outcome_diagnostics.extend(candidate.key_diagnostics().iter().cloned());
            adopted.push((candidate.version(), bytes));
            current = candidate;
            rotations += 1;
        }

        if current.is_expired(self.clock.now()) {
            return Err(UpdateError::Freeze {
                role: RoleName::Root,
                expires: current.expires(),
            });
        }

        Ok(RootChainOutcome {
            root: current,
            rotations,
            adopted,
            diagnostics: outcome_diagnostics,
        })
    }

    fn verify_candidate(
        &self,
        current: &TrustedRoot,
        bytes: &[u8],
    ) -> Result<TrustedRoot, UpdateError> {
        let envelope =
            SignedEnvelope::from_slice(bytes).map_err(|source| UpdateError::Malformed {
                role: RoleName::Root,
                source,
            })?;
        if envelope.type_tag() != Some(RoleName::Root.as_str()) {
            return Err(UpdateError::UnexpectedType {
                role: RoleName::Root,
                found: envelope.type_tag().unwrap_or_default().to_string(),
            });
        }

        current.verify_role(RoleName::Root, &envelope)?;
        let candidate = TrustedRoot::from_envelope(envelope)?;
        candidate.verify_self()?;

        let policy = self.config.root_version_step;
        if !policy.permits(current.version(), candidate.version()) {
            return Err(UpdateError::RootVersionStep {
                trusted: current.version(),
                candidate: candidate.version(),
                policy,
            });
        }
        Ok(candidate)
    }
}

fn transition(state: RootChainState) {
    tracing::debug!(state = ?state, "tuf: root chain");
}
