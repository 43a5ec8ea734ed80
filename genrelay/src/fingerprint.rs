//! Request fingerprinting.
//!
//! A [`RequestFingerprint`] identifies a logically identical generation
//! request. It keys the result cache and the in-flight deduplication registry,
//! so two requests with equal content and equal parameters must always map to
//! the same fingerprint.
//!
//! The fingerprint is a SHA-256 digest over a length-prefixed encoding of the
//! request input followed by every parameter in sorted key order. Length
//! prefixes keep `("ab", "c")` and `("a", "bc")` apart.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Number of hex characters used by [`RequestFingerprint::short`].
const SHORT_HEX_LEN: usize = 12;

/// Deterministic identity of a generation request.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestFingerprint([u8; 32]);

impl RequestFingerprint {
    /// Computes the fingerprint for an input and its generation parameters.
    pub fn compute(input: &[u8], parameters: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();

        hasher.update((input.len() as u64).to_le_bytes());
        hasher.update(input);

        hasher.update((parameters.len() as u64).to_le_bytes());
        for (key, value) in parameters {
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }

        Self(hasher.finalize().into())
    }

    /// Wraps a raw digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns an abbreviated hex form for log fields.
    pub fn short(&self) -> String {
        let mut hex = self.to_string();
        hex.truncate(SHORT_HEX_LEN);
        hex
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestFingerprint({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_equal_inputs_give_equal_fingerprints() {
        let a = RequestFingerprint::compute(b"img1", &params(&[("style", "A")]));
        let b = RequestFingerprint::compute(b"img1", &params(&[("style", "A")]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameter_insertion_order_is_irrelevant() {
        let mut first = BTreeMap::new();
        first.insert("style".to_string(), "A".to_string());
        first.insert("strength".to_string(), "0.8".to_string());

        let mut second = BTreeMap::new();
        second.insert("strength".to_string(), "0.8".to_string());
        second.insert("style".to_string(), "A".to_string());

        assert_eq!(
            RequestFingerprint::compute(b"img1", &first),
            RequestFingerprint::compute(b"img1", &second)
        );
    }

    #[test]
    fn test_different_parameters_differ() {
        let a = RequestFingerprint::compute(b"img1", &params(&[("style", "A")]));
        let b = RequestFingerprint::compute(b"img1", &params(&[("style", "B")]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_length_prefix_prevents_boundary_collisions() {
        let a = RequestFingerprint::compute(b"", &params(&[("ab", "c")]));
        let b = RequestFingerprint::compute(b"", &params(&[("a", "bc")]));
        assert_ne!(a, b);

        let c = RequestFingerprint::compute(b"x", &params(&[]));
        let d = RequestFingerprint::compute(b"", &params(&[("x", "")]));
        assert_ne!(c, d);
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        let fp = RequestFingerprint::compute(b"img1", &BTreeMap::new());
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.short(), hex[..12]);
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let fp = RequestFingerprint::compute(b"img1", &BTreeMap::new());
        assert_eq!(RequestFingerprint::from_bytes(*fp.as_bytes()), fp);
    }
}
