//! Content-address digests and chain-ID computation.
//!
//! A digest is an opaque `<algorithm>:<hex>` string; equality is
//! byte-exact. Chain IDs summarize an ordered list of diff-IDs with the
//! OCI recurrence: `chain([d]) = d`,
//! `chain([d0..dn]) = sha256(chain([d0..dn-1]) + " " + dn)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{ManipError, Result};

/// An opaque content address of the form `<algorithm>:<hex>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDigest` if the string is not `<algorithm>:<hex>`
    /// with a non-empty lowercase algorithm and hex-encoded payload.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, encoded) = s
            .split_once(':')
            .ok_or_else(|| ManipError::InvalidDigest(s.to_string()))?;
        if algo.is_empty() || encoded.is_empty() {
            return Err(ManipError::InvalidDigest(s.to_string()));
        }
        if !algo
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ManipError::InvalidDigest(s.to_string()));
        }
        if !encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ManipError::InvalidDigest(s.to_string()));
        }
        Ok(Digest(s.to_string()))
    }

    /// Compute the sha256 digest of a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = Sha256::digest(bytes);
        Digest(format!("sha256:{}", hex::encode(hash)))
    }

    /// The full digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The algorithm part, or an empty string for the empty digest.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or("")
    }

    /// The hex payload, or the raw string if no algorithm prefix exists.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or(&self.0)
    }

    /// The first 12 hex characters, used as a short image ID.
    pub fn short(&self) -> &str {
        let encoded = self.encoded();
        &encoded[..encoded.len().min(12)]
    }

    /// True for the default (empty) digest.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = ManipError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical chain ID over an ordered list of diff-IDs.
///
/// An empty list yields the empty digest, which the snapshotter treats
/// as "no parent".
pub fn chain_id(diff_ids: &[Digest]) -> Digest {
    let mut iter = diff_ids.iter();
    let first = match iter.next() {
        Some(d) => d.clone(),
        None => return Digest::default(),
    };
    iter.fold(first, |acc, next| {
        Digest::from_bytes(format!("{} {}", acc.as_str(), next.as_str()).as_bytes())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let d = Digest::parse("sha256:abc123").unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded(), "abc123");
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(Digest::parse("abc123").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(Digest::parse(":abc").is_err());
        assert!(Digest::parse("sha256:").is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex_payload() {
        assert!(Digest::parse("sha256:xyz!").is_err());
    }

    #[test]
    fn test_from_bytes_is_sha256() {
        let d = Digest::from_bytes(b"hello");
        assert_eq!(
            d.as_str(),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_short() {
        let d = Digest::from_bytes(b"hello");
        assert_eq!(d.short(), "2cf24dba5fb0");
        assert_eq!(d.short().len(), 12);
    }

    #[test]
    fn test_chain_id_empty() {
        assert!(chain_id(&[]).is_empty());
    }

    #[test]
    fn test_chain_id_single_is_identity() {
        let d = Digest::from_bytes(b"layer0");
        assert_eq!(chain_id(&[d.clone()]), d);
    }

    #[test]
    fn test_chain_id_recurrence() {
        let d0 = Digest::from_bytes(b"layer0");
        let d1 = Digest::from_bytes(b"layer1");
        let d2 = Digest::from_bytes(b"layer2");

        let c01 = Digest::from_bytes(format!("{} {}", d0, d1).as_bytes());
        let c012 = Digest::from_bytes(format!("{} {}", c01, d2).as_bytes());

        assert_eq!(chain_id(&[d0.clone(), d1.clone()]), c01);
        assert_eq!(chain_id(&[d0, d1, d2]), c012);
    }

    #[test]
    fn test_serde_transparent() {
        let d = Digest::from_bytes(b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.as_str()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
