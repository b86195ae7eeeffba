//! Request signing shared by the HTTP client and the notify codec.
//!
//! A signature covers the canonical query-string form of every key/value
//! pair except `sign` itself: pairs are sorted by key (then value) and
//! form-urlencoded. The digest is upper-case hex SHA-256 over
//! `secret + canonical + secret`.

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::form_urlencoded;

/// Name of the pair that carries the signature.
pub const SIGN_KEY: &str = "sign";

/// Errors produced while computing a signature.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SignError {
    /// The application secret is empty, so no signature can be produced.
    #[error("signing secret is empty")]
    EmptySecret,
}

/// Returns the canonical query-string form of `pairs`, skipping `sign`.
pub fn canonical_query<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut sorted: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(key, value)| (key.as_ref(), value.as_ref()))
        .filter(|(key, _)| *key != SIGN_KEY)
        .collect();
    sorted.sort_unstable();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}

/// Signs `pairs` with `secret`.
pub fn sign<K, V>(pairs: &[(K, V)], secret: &str) -> Result<String, SignError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if secret.is_empty() {
        return Err(SignError::EmptySecret);
    }

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(canonical_query(pairs).as_bytes());
    hasher.update(secret.as_bytes());
    Ok(format!("{:X}", hasher.finalize()))
}

/// Checks that `signature` matches the signature of `pairs`.
pub fn verify<K, V>(pairs: &[(K, V)], secret: &str, signature: &str) -> Result<bool, SignError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    Ok(sign(pairs, secret)? == signature)
}
