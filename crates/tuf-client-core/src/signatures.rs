//! Threshold signature checking.
//!
//! Counting is a single fold over the signature list. A key identity
//! contributes at most once, signatures from identities outside the permitted
//! set are ignored, and a signature that fails to verify simply does not
//! count.

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::canonical::{canonical_bytes, CanonicalError};
use crate::keys::KeyRing;
use crate::metadata::Signature;

/// Errors emitted by the signature verifier.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The threshold can never be met (or is trivially met) with the given keys.
    #[error("invalid threshold {threshold} for {available} available key(s)")]
    ThresholdConfig { threshold: u64, available: usize },
    /// A permitted identity has no imported key.
    #[error("key {keyid} is permitted but was not imported")]
    KeyLookupInconsistency { keyid: String },
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

type Result<T> = std::result::Result<T, SignatureError>;

/// Outcome of counting signatures over one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureTally {
    /// Distinct identities whose signature verified.
    pub valid: u64,
    /// Signatures skipped because their identity was not permitted or already used.
    pub ignored: usize,
    /// Identities that were examined.
    pub consumed: BTreeSet<String>,
}

impl SignatureTally {
    /// Returns whether the tally reaches `threshold`.
    pub fn meets(&self, threshold: u64) -> bool {
        self.valid >= threshold
    }
}

/// Counts the valid signatures over the canonical form of `signed`.
pub fn tally_signatures(
    keys: &KeyRing,
    allowed: &BTreeSet<String>,
    signed: &Value,
    signatures: &[Signature],
    threshold: u64,
) -> Result<SignatureTally> {
    if threshold < 1 || threshold > keys.len() as u64 {
        return Err(SignatureError::ThresholdConfig {
            threshold,
            available: keys.len(),
        });
    }

    let message = canonical_bytes(signed)?;

    signatures
        .iter()
        .try_fold(SignatureTally::default(), |mut tally, signature| {
            if !allowed.contains(&signature.keyid) || tally.consumed.contains(&signature.keyid) {
                tally.ignored += 1;
                return Ok(tally);
            }
            tally.consumed.insert(signature.keyid.clone());

            let key = keys
                .get(&signature.keyid)
                .ok_or_else(|| SignatureError::KeyLookupInconsistency {
                    keyid: signature.keyid.clone(),
                })?;
            let verified = hex::decode(&signature.sig)
                .map(|sig| key.verify(&message, &sig))
                .unwrap_or(false);
            if verified {
                tally.valid += 1;
            }
            Ok(tally)
        })
}

/// Returns whether at least `threshold` distinct permitted keys signed `signed`.
pub fn check_signatures(
    keys: &KeyRing,
    allowed: &BTreeSet<String>,
    signed: &Value,
    signatures: &[Signature],
    threshold: u64,
) -> Result<bool> {
    tally_signatures(keys, allowed, signed, signatures, threshold).map(|t| t.meets(threshold))
}
