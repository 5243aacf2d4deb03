//! Canonical JSON encoding and digest helpers.
//!
//! Every TUF signer signs the OLPC canonical form of the `signed` object, and
//! key identities are the SHA-256 of the canonical form of a key table entry.
//! Both paths go through [`canonical_bytes`] so the bytes we verify are the
//! bytes the rest of the ecosystem produces: keys sorted, no insignificant
//! whitespace, only `"` and `\` escaped, integers only.

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Errors emitted while producing canonical bytes.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// The value could not be expressed in canonical JSON (e.g. it holds a float).
    #[error("canonical json encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serialises `value` into its canonical JSON byte form.
pub fn canonical_bytes<T>(value: &T) -> Result<Vec<u8>, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(data)
}

/// Returns the lowercase-hex SHA-256 of the canonical form of `value`.
pub fn canonical_sha256_hex<T>(value: &T) -> Result<String, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let bytes = canonical_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// Computes the lowercase-hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes a lowercase-hex digest for a TUF hash algorithm name.
///
/// Returns `None` for algorithms this client does not implement.
pub fn digest_hex(algorithm: &str, bytes: &[u8]) -> Option<String> {
    match algorithm.to_ascii_lowercase().as_str() {
        "sha256" => Some(sha256_hex(bytes)),
        "sha512" => {
            let mut hasher = Sha512::new();
            hasher.update(bytes);
            Some(hex::encode(hasher.finalize()))
        }
        _ => None,
    }
}
