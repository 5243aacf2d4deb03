//! Key import and key identity handling.
//!
//! Root metadata carries a key table indexed by *asserted* key identity. The
//! nominal identity is the SHA-256 of the canonical form of the table entry;
//! [`load_keys`] derives it, refuses tables where two entries collapse to the
//! same computed identity, and reports (but tolerates) entries whose asserted
//! identity disagrees with the computed one.

use std::collections::{BTreeMap, BTreeSet};

use p256::pkcs8::DecodePublicKey;
use thiserror::Error;

use crate::canonical::{canonical_sha256_hex, CanonicalError};
use crate::metadata::KeyEntry;

/// Errors emitted while importing a key table.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Two entries share the same computed identity.
    #[error("duplicate key identity {computed} (asserted as {asserted})")]
    DuplicateKeyIdentity { asserted: String, computed: String },
    /// The key type or scheme is not one this client can verify with.
    #[error("unsupported key {keyid}: keytype '{keytype}', scheme '{scheme}'")]
    UnsupportedKey {
        keyid: String,
        keytype: String,
        scheme: String,
    },
    /// Public key material could not be decoded.
    #[error("failed to import key {keyid}: {reason}")]
    Import { keyid: String, reason: String },
    /// The key entry could not be canonicalized for its identity digest.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Non-fatal observations made while loading keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDiagnostic {
    /// The asserted identity differs from the canonical digest of the entry.
    KeyIdMismatch { asserted: String, computed: String },
}

/// A public key usable for signature verification.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Imports the public material of a key table entry.
    pub fn import(keyid: &str, entry: &KeyEntry) -> Result<Self, KeyError> {
        let public = entry.keyval.public.trim();
        match (entry.keytype.as_str(), entry.scheme.as_str()) {
            ("ed25519", "ed25519") => {
                let bytes = hex::decode(public).map_err(|err| import_error(keyid, err))?;
                let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    import_error(keyid, format!("expected 32 bytes, got {}", bytes.len()))
                })?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                    .map_err(|err| import_error(keyid, err))?;
                Ok(PublicKey::Ed25519(key))
            }
            ("ecdsa" | "ecdsa-sha2-nistp256", "ecdsa-sha2-nistp256") => {
                let key = if public.starts_with("-----BEGIN") {
                    p256::ecdsa::VerifyingKey::from_public_key_pem(public)
                        .map_err(|err| import_error(keyid, err))?
                } else {
                    let bytes = hex::decode(public).map_err(|err| import_error(keyid, err))?;
                    p256::ecdsa::VerifyingKey::from_sec1_bytes(&bytes)
                        .map_err(|err| import_error(keyid, err))?
                };
                Ok(PublicKey::EcdsaP256(key))
            }
            (keytype, scheme) => Err(KeyError::UnsupportedKey {
                keyid: keyid.to_string(),
                keytype: keytype.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }

    /// Verifies `signature` over `message`, returning whether it is valid.
    ///
    /// ECDSA signatures are accepted DER-encoded or as fixed-size `r || s`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(key) => {
                use ed25519_dalek::Verifier;
                ed25519_dalek::Signature::from_slice(signature)
                    .map(|sig| key.verify(message, &sig).is_ok())
                    .unwrap_or(false)
            }
            PublicKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Verifier;
                p256::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p256::ecdsa::Signature::from_slice(signature))
                    .map(|sig| key.verify(message, &sig).is_ok())
                    .unwrap_or(false)
            }
        }
    }
}

fn import_error(keyid: &str, reason: impl ToString) -> KeyError {
    KeyError::Import {
        keyid: keyid.to_string(),
        reason: reason.to_string(),
    }
}

/// Imported keys indexed by asserted identity.
#[derive(Debug, Clone, Default)]
pub struct KeyRing(BTreeMap<String, PublicKey>);

impl KeyRing {
    /// Looks up a key by identity.
    pub fn get(&self, keyid: &str) -> Option<&PublicKey> {
        self.0.get(keyid)
    }

    /// Returns whether the ring holds `keyid`.
    pub fn contains(&self, keyid: &str) -> bool {
        self.0.contains_key(keyid)
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the identities held by the ring.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub(crate) fn insert(&mut self, keyid: String, key: PublicKey) {
        self.0.insert(keyid, key);
    }
}

/// Result of [`load_keys`]: the imported keys plus any diagnostics.
#[derive(Debug, Clone, Default)]
pub struct LoadedKeys {
    pub keys: KeyRing,
    pub diagnostics: Vec<KeyDiagnostic>,
}

/// Imports every entry of a root key table.
pub fn load_keys(table: &BTreeMap<String, KeyEntry>) -> Result<LoadedKeys, KeyError> {
    let mut computed_ids = BTreeSet::new();
    let mut loaded = LoadedKeys::default();

    for (asserted, entry) in table {
        let computed = canonical_sha256_hex(entry)?;
        if !computed_ids.insert(computed.clone()) {
            return Err(KeyError::DuplicateKeyIdentity {
                asserted: asserted.clone(),
                computed,
            });
        }
        if !computed.eq_ignore_ascii_case(asserted) {
            loaded.diagnostics.push(KeyDiagnostic::KeyIdMismatch {
                asserted: asserted.clone(),
                computed,
            });
        }
        let key = PublicKey::import(asserted, entry)?;
        loaded.keys.insert(asserted.clone(), key);
    }

    Ok(loaded)
}

/// Returns the subset of `keys` whose identities appear in `allowed`.
pub fn get_role_keys(keys: &KeyRing, allowed: &[String]) -> KeyRing {
    let mut subset = KeyRing::default();
    for keyid in allowed {
        if let Some(key) = keys.get(keyid) {
            subset.insert(keyid.clone(), key.clone());
        }
    }
    subset
}
