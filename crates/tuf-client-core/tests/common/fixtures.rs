// Minimal TUF signing helpers shared across tests.
//
// These fixtures produce canonical, signed metadata so unit and integration
// tests can emulate a TUF repository without reproducing the signing logic
// inline. They only depend on external crates so the same file can be
// `include!`d into the library's unit tests.
use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use ed25519_dalek::{Signer, SigningKey};
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Deterministic Ed25519 test key.
pub(crate) struct TestKey {
    signing: SigningKey,
}

impl TestKey {
    /// Builds a key from a single repeated seed byte.
    pub(crate) fn ed25519(seed: u8) -> Self {
        Self {
            signing: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    /// Key table entry for the public half of the key.
    pub(crate) fn entry(&self) -> Value {
        json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": { "public": hex::encode(self.signing.verifying_key().to_bytes()) }
        })
    }

    /// Canonical key identity of [`TestKey::entry`].
    pub(crate) fn keyid(&self) -> String {
        sha256_hex(&canonical(&self.entry()))
    }

    /// Signs raw bytes.
    pub(crate) fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }

    /// Signature object over the canonical form of `signed`.
    pub(crate) fn signature(&self, signed: &Value) -> Value {
        json!({
            "keyid": self.keyid(),
            "sig": hex::encode(self.sign_bytes(&canonical(signed))),
        })
    }
}

/// OLPC canonical bytes of `value`.
pub(crate) fn canonical<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value.serialize(&mut ser).expect("canonical encoding");
    data
}

/// Lowercase-hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Wraps `signed` in an envelope signed by every key in `keys`.
pub(crate) fn envelope(signed: Value, keys: &[&TestKey]) -> Value {
    let signatures: Vec<Value> = keys.iter().map(|key| key.signature(&signed)).collect();
    json!({ "signed": signed, "signatures": signatures })
}

/// Serialises an envelope to the bytes a repository would serve.
pub(crate) fn to_bytes(envelope: &Value) -> Vec<u8> {
    serde_json::to_vec_pretty(envelope).expect("envelope encoding")
}

/// Expiry one year ahead.
pub(crate) fn future() -> String {
    (Utc::now() + Duration::days(365))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Expiry one day in the past.
pub(crate) fn past() -> String {
    (Utc::now() - Duration::days(1))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Keys and thresholds for the four top-level roles.
pub(crate) struct RoleKeySet {
    pub root: Vec<TestKey>,
    pub root_threshold: u64,
    pub timestamp: TestKey,
    pub snapshot: TestKey,
    pub targets: TestKey,
}

impl RoleKeySet {
    /// One key per role, derived from consecutive seeds starting at `base`.
    pub(crate) fn new(base: u8) -> Self {
        Self {
            root: vec![TestKey::ed25519(base)],
            root_threshold: 1,
            timestamp: TestKey::ed25519(base.wrapping_add(1)),
            snapshot: TestKey::ed25519(base.wrapping_add(2)),
            targets: TestKey::ed25519(base.wrapping_add(3)),
        }
    }

    fn root_refs(&self) -> Vec<&TestKey> {
        self.root.iter().collect()
    }

    /// Unsigned root body declaring these keys.
    pub(crate) fn root_signed(&self, version: u64, expires: &str, consistent: bool) -> Value {
        let mut keys = serde_json::Map::new();
        let all = self
            .root
            .iter()
            .chain([&self.timestamp, &self.snapshot, &self.targets]);
        for key in all {
            keys.insert(key.keyid(), key.entry());
        }
        let root_ids: Vec<String> = self.root.iter().map(TestKey::keyid).collect();
        json!({
            "_type": "root",
            "spec_version": "1.0.31",
            "version": version,
            "expires": expires,
            "consistent_snapshot": consistent,
            "keys": keys,
            "roles": {
                "root": { "keyids": root_ids, "threshold": self.root_threshold },
                "timestamp": { "keyids": [self.timestamp.keyid()], "threshold": 1 },
                "snapshot": { "keyids": [self.snapshot.keyid()], "threshold": 1 },
                "targets": { "keyids": [self.targets.keyid()], "threshold": 1 }
            }
        })
    }

    /// Root metadata self-signed by this key set.
    pub(crate) fn root(&self, version: u64, expires: &str) -> Vec<u8> {
        to_bytes(&envelope(
            self.root_signed(version, expires, false),
            &self.root_refs(),
        ))
    }

    /// Root metadata for this key set signed by itself and by `previous`.
    pub(crate) fn rotated_root(&self, previous: &RoleKeySet, version: u64, expires: &str) -> Vec<u8> {
        let mut signers = previous.root_refs();
        signers.extend(self.root.iter());
        to_bytes(&envelope(self.root_signed(version, expires, false), &signers))
    }

    /// Targets metadata listing `payloads` by name.
    pub(crate) fn targets(&self, version: u64, expires: &str, payloads: &[(&str, &[u8])]) -> Vec<u8> {
        let targets: BTreeMap<String, Value> = payloads
            .iter()
            .map(|(name, bytes)| {
                (
                    name.to_string(),
                    json!({ "length": bytes.len(), "hashes": { "sha256": sha256_hex(bytes) } }),
                )
            })
            .collect();
        let signed = json!({
            "_type": "targets",
            "spec_version": "1.0.31",
            "version": version,
            "expires": expires,
            "targets": targets
        });
        to_bytes(&envelope(signed, &[&self.targets]))
    }

    /// Snapshot metadata pinning `targets.json` at `targets_version`.
    ///
    /// When `targets_bytes` is given, length and sha256 are pinned as well.
    pub(crate) fn snapshot(
        &self,
        version: u64,
        expires: &str,
        targets_version: u64,
        targets_bytes: Option<&[u8]>,
    ) -> Vec<u8> {
        let signed = json!({
            "_type": "snapshot",
            "spec_version": "1.0.31",
            "version": version,
            "expires": expires,
            "meta": { "targets.json": meta_entry(targets_version, targets_bytes) }
        });
        to_bytes(&envelope(signed, &[&self.snapshot]))
    }

    /// Timestamp metadata pinning `snapshot.json` at `snapshot_version`.
    pub(crate) fn timestamp(
        &self,
        version: u64,
        expires: &str,
        snapshot_version: u64,
        snapshot_bytes: Option<&[u8]>,
    ) -> Vec<u8> {
        let signed = json!({
            "_type": "timestamp",
            "spec_version": "1.0.31",
            "version": version,
            "expires": expires,
            "meta": { "snapshot.json": meta_entry(snapshot_version, snapshot_bytes) }
        });
        to_bytes(&envelope(signed, &[&self.timestamp]))
    }

    /// A fully pinned timestamp/snapshot/targets triple at one version.
    pub(crate) fn top_level(&self, version: u64, expires: &str, payloads: &[(&str, &[u8])]) -> TopLevelFiles {
        let targets = self.targets(version, expires, payloads);
        let snapshot = self.snapshot(version, expires, version, Some(&targets));
        let timestamp = self.timestamp(version, expires, version, Some(&snapshot));
        TopLevelFiles {
            timestamp,
            snapshot,
            targets,
        }
    }
}

/// Serialised timestamp, snapshot and targets metadata.
pub(crate) struct TopLevelFiles {
    pub timestamp: Vec<u8>,
    pub snapshot: Vec<u8>,
    pub targets: Vec<u8>,
}

fn meta_entry(version: u64, bytes: Option<&[u8]>) -> Value {
    match bytes {
        Some(bytes) => json!({
            "version": version,
            "length": bytes.len(),
            "hashes": { "sha256": sha256_hex(bytes) }
        }),
        None => json!({ "version": version }),
    }
}
