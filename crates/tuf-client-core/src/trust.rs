//! Trusted metadata held by a client.
//!
//! A [`TrustedRoot`] is the imported form of a root document: keys decoded,
//! role table resolved to the four top-level roles. [`TrustState`] couples it
//! with the last trusted timestamp, snapshot and targets metadata.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::UpdateError;
use crate::keys::{get_role_keys, load_keys, KeyDiagnostic, KeyRing};
use crate::metadata::{
    CommonFields, RoleBody, RoleKeys, RoleName, RootBody, SignedEnvelope, SnapshotBody,
    TargetsBody, TimestampBody,
};
use crate::signatures::{tally_signatures, SignatureTally};

/// Major `spec_version` this client understands.
const SUPPORTED_SPEC_MAJOR: &str = "1";

/// An imported root document.
#[derive(Debug, Clone)]
pub struct TrustedRoot {
    envelope: SignedEnvelope,
    body: RootBody,
    keys: KeyRing,
    roles: RoleTable,
    diagnostics: Vec<KeyDiagnostic>,
}

/// Role assignments for the four top-level roles.
#[derive(Debug, Clone)]
struct RoleTable {
    root: RoleKeys,
    timestamp: RoleKeys,
    snapshot: RoleKeys,
    targets: RoleKeys,
}

impl TrustedRoot {
    /// Parses and imports root metadata bytes without checking signatures.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, UpdateError> {
        let envelope = SignedEnvelope::from_slice(bytes).map_err(|source| UpdateError::Malformed {
            role: RoleName::Root,
            source,
        })?;
        Self::from_envelope(envelope)
    }

    /// Imports a root envelope without checking signatures.
    pub fn from_envelope(envelope: SignedEnvelope) -> Result<Self, UpdateError> {
        let body: RootBody = decode_body(&envelope)?;

        let lookup = |role: RoleName| {
            body.roles
                .get(role.as_str())
                .cloned()
                .ok_or_else(|| UpdateError::Invalid {
                    role: RoleName::Root,
                    reason: format!("role '{role}' is not defined"),
                })
        };
        let roles = RoleTable {
            root: lookup(RoleName::Root)?,
            timestamp: lookup(RoleName::Timestamp)?,
            snapshot: lookup(RoleName::Snapshot)?,
            targets: lookup(RoleName::Targets)?,
        };

        let loaded = load_keys(&body.keys).map_err(|source| UpdateError::Key {
            role: RoleName::Root,
            source,
        })?;

        Ok(Self {
            envelope,
            body,
            keys: loaded.keys,
            roles,
            diagnostics: loaded.diagnostics,
        })
    }

    pub fn version(&self) -> u64 {
        self.body.version()
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.body.expires()
    }

    pub fn spec_version(&self) -> &str {
        &self.body.common.spec_version
    }

    pub fn consistent_snapshot(&self) -> bool {
        self.body.consistent_snapshot
    }

    /// All imported keys, indexed by asserted identity.
    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// The envelope the root was imported from.
    pub fn envelope(&self) -> &SignedEnvelope {
        &self.envelope
    }

    /// Diagnostics produced while importing the key table.
    pub fn key_diagnostics(&self) -> &[KeyDiagnostic] {
        &self.diagnostics
    }

    /// Key ids and threshold for `role`.
    pub fn role_keys(&self, role: RoleName) -> &RoleKeys {
        match role {
            RoleName::Root => &self.roles.root,
            RoleName::Timestamp => &self.roles.timestamp,
            RoleName::Snapshot => &self.roles.snapshot,
            RoleName::Targets => &self.roles.targets,
        }
    }

    /// Returns whether the root has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires() <= now
    }

    /// Returns whether `role` is assigned different keys or threshold in `other`.
    pub fn role_keys_changed(&self, other: &TrustedRoot, role: RoleName) -> bool {
        let ours = self.role_keys(role);
        let theirs = other.role_keys(role);
        let ours_ids: BTreeSet<&String> = ours.keyids.iter().collect();
        let theirs_ids: BTreeSet<&String> = theirs.keyids.iter().collect();
        ours.threshold != theirs.threshold || ours_ids != theirs_ids
    }

    /// Counts signatures on `envelope` using the keys and threshold of `role`.
    pub fn tally_role(
        &self,
        role: RoleName,
        envelope: &SignedEnvelope,
    ) -> Result<SignatureTally, UpdateError> {
        let role_keys = self.role_keys(role);
        let allowed: BTreeSet<String> = role_keys.keyids.iter().cloned().collect();
        let ring = get_role_keys(&self.keys, &role_keys.keyids);
        tally_signatures(
            &ring,
            &allowed,
            &envelope.signed,
            &envelope.signatures,
            role_keys.threshold,
        )
        .map_err(|source| UpdateError::Signature { role, source })
    }

    /// Requires `envelope` to carry a threshold of valid signatures for `role`.
    pub fn verify_role(&self, role: RoleName, envelope: &SignedEnvelope) -> Result<(), UpdateError> {
        let tally = self.tally_role(role, envelope)?;
        let threshold = self.role_keys(role).threshold;
        if tally.meets(threshold) {
            Ok(())
        } else {
            Err(UpdateError::SignatureThresholdNotMet {
                role,
                version: envelope.version().unwrap_or_default(),
                valid: tally.valid,
                threshold,
            })
        }
    }

    /// Requires the root to be signed by its own root role.
    pub fn verify_self(&self) -> Result<(), UpdateError> {
        self.verify_role(RoleName::Root, &self.envelope)
    }
}

/// Verified metadata for a non-root role.
#[derive(Debug, Clone)]
pub struct TrustedMetadata<T> {
    envelope: SignedEnvelope,
    body: T,
}

impl<T: RoleBody> TrustedMetadata<T> {
    pub(crate) fn new(envelope: SignedEnvelope, body: T) -> Self {
        Self { envelope, body }
    }

    pub fn version(&self) -> u64 {
        self.body.version()
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.body.expires()
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn envelope(&self) -> &SignedEnvelope {
        &self.envelope
    }
}

/// Trusted root plus the last trusted top-level metadata.
#[derive(Debug, Clone)]
pub struct TrustState {
    pub root: TrustedRoot,
    pub timestamp: Option<TrustedMetadata<TimestampBody>>,
    pub snapshot: Option<TrustedMetadata<SnapshotBody>>,
    pub targets: Option<TrustedMetadata<TargetsBody>>,
}

impl TrustState {
    /// A state trusting only `root`.
    pub fn new(root: TrustedRoot) -> Self {
        Self {
            root,
            timestamp: None,
            snapshot: None,
            targets: None,
        }
    }

    /// Replaces the trusted root.
    ///
    /// When the timestamp or snapshot role is assigned new keys or a new
    /// threshold, the trusted timestamp and snapshot are dropped so metadata
    /// signed by the retired keys no longer sets the rollback baseline.
    /// Returns whether they were dropped.
    pub fn adopt_root(&mut self, root: TrustedRoot) -> bool {
        let rotated = self.root.role_keys_changed(&root, RoleName::Timestamp)
            || self.root.role_keys_changed(&root, RoleName::Snapshot);
        if rotated {
            self.timestamp = None;
            self.snapshot = None;
        }
        self.root = root;
        rotated
    }
}

/// Decodes the typed body of `envelope`, checking `_type`, `spec_version`, and `version`.
pub(crate) fn decode_body<T: RoleBody>(envelope: &SignedEnvelope) -> Result<T, UpdateError> {
    let role = T::ROLE;
    match envelope.type_tag() {
        Some(tag) if tag == role.as_str() => {}
        other => {
            return Err(UpdateError::UnexpectedType {
                role,
                found: other.unwrap_or_default().to_string(),
            })
        }
    }
    let body: T = envelope
        .body()
        .map_err(|source| UpdateError::Malformed { role, source })?;
    check_common(role, body.common())?;
    Ok(body)
}

fn check_common(role: RoleName, common: &CommonFields) -> Result<(), UpdateError> {
    let major = common.spec_version.split('.').next().unwrap_or_default();
    if major != SUPPORTED_SPEC_MAJOR {
        return Err(UpdateError::UnsupportedSpecVersion {
            role,
            found: common.spec_version.clone(),
        });
    }
    if common.version == 0 {
        return Err(UpdateError::Invalid {
            role,
            reason: "version must be positive".to_string(),
        });
    }
    Ok(())
}
