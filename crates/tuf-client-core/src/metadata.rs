//! Serde shapes for TUF metadata documents.
//!
//! The `signed` section of every envelope is kept as a raw [`Value`] so that
//! fields this client does not model still take part in canonicalization;
//! typed role bodies are views decoded from it on demand.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::canonical::digest_hex;

/// File name of the timestamp metadata.
pub const TIMESTAMP_FILE: &str = "timestamp.json";
/// File name of the snapshot metadata.
pub const SNAPSHOT_FILE: &str = "snapshot.json";
/// File name of the top-level targets metadata.
pub const TARGETS_FILE: &str = "targets.json";
/// File name of the root metadata.
pub const ROOT_FILE: &str = "root.json";

/// Top-level TUF roles handled by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl RoleName {
    /// All top-level roles, in the order they are refreshed.
    pub const ALL: [RoleName; 4] = [
        RoleName::Root,
        RoleName::Timestamp,
        RoleName::Snapshot,
        RoleName::Targets,
    ];

    /// Returns the role name as used in `_type` and the root `roles` table.
    pub fn as_str(self) -> &'static str {
        match self {
            RoleName::Root => "root",
            RoleName::Timestamp => "timestamp",
            RoleName::Snapshot => "snapshot",
            RoleName::Targets => "targets",
        }
    }

    /// Returns the unversioned metadata file name for the role.
    pub fn file_name(self) -> &'static str {
        match self {
            RoleName::Root => ROOT_FILE,
            RoleName::Timestamp => TIMESTAMP_FILE,
            RoleName::Snapshot => SNAPSHOT_FILE,
            RoleName::Targets => TARGETS_FILE,
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signature over the canonical form of a `signed` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Identity of the key that produced the signature.
    pub keyid: String,
    /// Hex-encoded signature bytes.
    pub sig: String,
}

/// A metadata file as found on the wire: a signed body plus its signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Role-specific body; kept untyped so canonicalization sees every field.
    pub signed: Value,
    /// Signatures in the order the repository listed them.
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl SignedEnvelope {
    /// Parses an envelope from raw metadata bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialises the envelope back into JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes the `signed` section into a typed role body.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.signed)
    }

    /// Returns the `signed.version` field when present.
    pub fn version(&self) -> Option<u64> {
        self.signed.get("version").and_then(Value::as_u64)
    }

    /// Returns the `signed._type` field when present.
    pub fn type_tag(&self) -> Option<&str> {
        self.signed.get("_type").and_then(Value::as_str)
    }
}

/// Fields shared by every role body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonFields {
    /// Declared role type (`root`, `timestamp`, ...).
    #[serde(rename = "_type")]
    pub type_tag: String,
    /// TUF specification version the repository follows.
    pub spec_version: String,
    /// Positive, monotonically increasing version number.
    pub version: u64,
    /// Absolute expiry of the metadata.
    pub expires: DateTime<Utc>,
}

/// Implemented by every typed role body.
pub trait RoleBody: DeserializeOwned + Clone + fmt::Debug + Send + Sync {
    /// Role this body belongs to.
    const ROLE: RoleName;

    /// Returns the fields shared by every role.
    fn common(&self) -> &CommonFields;

    /// Returns the metadata version.
    fn version(&self) -> u64 {
        self.common().version
    }

    /// Returns the metadata expiry.
    fn expires(&self) -> DateTime<Utc> {
        self.common().expires
    }
}

/// Public key entry from the root `keys` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Key type, e.g. `ed25519` or `ecdsa`.
    pub keytype: String,
    /// Signature scheme, e.g. `ed25519` or `ecdsa-sha2-nistp256`.
    pub scheme: String,
    /// Public key material.
    pub keyval: KeyValue,
    /// Legacy list of algorithms used to derive the key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid_hash_algorithms: Option<Vec<String>>,
    /// Unmodelled fields, retained for the key id digest.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The `keyval` object of a key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Public key (hex or PEM depending on key type).
    pub public: String,
    /// Unmodelled fields, retained for the key id digest.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Key ids and threshold assigned to a role by root metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    /// Identities permitted to sign for the role.
    pub keyids: Vec<String>,
    /// Number of distinct valid signatures required.
    pub threshold: u64,
}

/// Signed body of `root.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RootBody {
    #[serde(flatten)]
    pub common: CommonFields,
    /// Whether snapshot and targets files are version-addressed.
    #[serde(default)]
    pub consistent_snapshot: bool,
    /// Key table indexed by asserted key identity.
    #[serde(default)]
    pub keys: BTreeMap<String, KeyEntry>,
    /// Role table indexed by role name.
    pub roles: BTreeMap<String, RoleKeys>,
}

impl RoleBody for RootBody {
    const ROLE: RoleName = RoleName::Root;

    fn common(&self) -> &CommonFields {
        &self.common
    }
}

/// Entry of a `meta` mapping: the expected shape of another metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    /// Version the referenced file must carry.
    pub version: u64,
    /// Exact byte length of the referenced file, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Digests of the referenced file keyed by algorithm, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
}

impl MetaFile {
    /// Checks fetched bytes and their declared version against this pin.
    pub fn check(&self, version: u64, bytes: &[u8]) -> Result<(), IntegrityMismatch> {
        if version != self.version {
            return Err(IntegrityMismatch::Version {
                expected: self.version,
                actual: version,
            });
        }
        check_length_and_hashes(self.length, self.hashes.as_ref(), bytes)
    }
}

/// Signed body of `timestamp.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimestampBody {
    #[serde(flatten)]
    pub common: CommonFields,
    /// Pins for the snapshot file, keyed by file name.
    #[serde(default)]
    pub meta: BTreeMap<String, MetaFile>,
}

impl TimestampBody {
    /// Returns the pin for `snapshot.json`, if declared.
    pub fn snapshot_pin(&self) -> Option<&MetaFile> {
        self.meta.get(SNAPSHOT_FILE)
    }
}

impl RoleBody for TimestampBody {
    const ROLE: RoleName = RoleName::Timestamp;

    fn common(&self) -> &CommonFields {
        &self.common
    }
}

/// Signed body of `snapshot.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotBody {
    #[serde(flatten)]
    pub common: CommonFields,
    /// Pins for targets metadata files, keyed by file name.
    #[serde(default)]
    pub meta: BTreeMap<String, MetaFile>,
}

impl SnapshotBody {
    /// Returns the pin for the top-level `targets.json`, if declared.
    pub fn targets_pin(&self) -> Option<&MetaFile> {
        self.meta.get(TARGETS_FILE)
    }
}

impl RoleBody for SnapshotBody {
    const ROLE: RoleName = RoleName::Snapshot;

    fn common(&self) -> &CommonFields {
        &self.common
    }
}

/// Signed body of `targets.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetsBody {
    #[serde(flatten)]
    pub common: CommonFields,
    /// Artifacts described by the role, keyed by target name.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetInfo>,
    /// Delegations are carried through untouched; they are not traversed.
    #[serde(default)]
    pub delegations: Option<Value>,
}

impl RoleBody for TargetsBody {
    const ROLE: RoleName = RoleName::Targets;

    fn common(&self) -> &CommonFields {
        &self.common
    }
}

/// Metadata describing an individual target entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Advertised file length.
    pub length: u64,
    /// Content hashes keyed by algorithm (e.g., `sha256`).
    pub hashes: BTreeMap<String, String>,
    /// Optional custom metadata associated with the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

impl TargetInfo {
    /// Validates artifact bytes obtained elsewhere against this entry.
    ///
    /// Unlike meta pins, a target must declare at least one digest.
    pub fn verify_payload(&self, bytes: &[u8]) -> Result<(), IntegrityMismatch> {
        if self.hashes.is_empty() {
            return Err(IntegrityMismatch::MissingHashes);
        }
        check_length_and_hashes(Some(self.length), Some(&self.hashes), bytes)
    }
}

/// Ways fetched bytes can disagree with what verified metadata declared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityMismatch {
    #[error("version mismatch (expected {expected}, got {actual})")]
    Version { expected: u64, actual: u64 },
    #[error("length mismatch (expected {expected}, got {actual})")]
    Length { expected: u64, actual: u64 },
    #[error("response exceeds pinned length {expected}")]
    ExceedsLength { expected: u64 },
    #[error("hash mismatch for '{algorithm}'")]
    Hash { algorithm: String },
    #[error("unsupported hash algorithm '{algorithm}'")]
    UnsupportedAlgorithm { algorithm: String },
    #[error("no hashes declared")]
    MissingHashes,
}

fn check_length_and_hashes(
    length: Option<u64>,
    hashes: Option<&BTreeMap<String, String>>,
    bytes: &[u8],
) -> Result<(), IntegrityMismatch> {
    let actual = bytes.len() as u64;
    if let Some(expected) = length {
        if expected != actual {
            return Err(IntegrityMismatch::Length { expected, actual });
        }
    }
    for (algorithm, expected) in hashes.into_iter().flatten() {
        let Some(computed) = digest_hex(algorithm, bytes) else {
            return Err(IntegrityMismatch::UnsupportedAlgorithm {
                algorithm: algorithm.clone(),
            });
        };
        if !computed.eq_ignore_ascii_case(expected) {
            return Err(IntegrityMismatch::Hash {
                algorithm: algorithm.clone(),
            });
        }
    }
    Ok(())
}
