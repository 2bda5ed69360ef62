//! Host digests and the truncated prefixes sent to the lookup service.
//!
//! Only a [`HashPrefix`] ever leaves the process. The full [`HostDigest`] is
//! kept locally and used for the membership test against a prefix's answer.

use std::fmt::{self, Write};

use sha1::{Digest, Sha1};

/// Number of hex characters of the digest sent to the lookup service.
pub const HASH_PREFIX_SIZE: usize = 4;

/// Length of a SHA-1 digest in hex.
pub const DIGEST_HEX_LEN: usize = 40;

/// Lower-case hex SHA-1 of a host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostDigest(String);

impl HostDigest {
    /// Parse a digest received from the lookup service.
    ///
    /// Accepts either case; returns `None` for anything that is not
    /// exactly 40 hex characters.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != DIGEST_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading `len` hex characters, clamped to the digest length.
    pub fn prefix(&self, len: usize) -> HashPrefix {
        let len = len.clamp(1, DIGEST_HEX_LEN);
        HashPrefix(self.0[..len].to_string())
    }
}

impl fmt::Display for HostDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Leading hex characters of a [`HostDigest`]; the cache and in-flight key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashPrefix(String);

impl HashPrefix {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `digest` falls into this prefix bucket.
    pub fn covers(&self, digest: &HostDigest) -> bool {
        digest.as_str().starts_with(&self.0)
    }
}

impl fmt::Display for HashPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-1 digest of `host`, as lower-case hex.
pub fn digest(host: &str) -> HostDigest {
    let bytes = Sha1::digest(host.as_bytes());
    let mut out = String::with_capacity(DIGEST_HEX_LEN);
    for byte in bytes.iter() {
        let _ = write!(&mut out, "{byte:02x}");
    }
    HostDigest(out)
}

/// First `len` hex characters of `digest`.
pub fn prefix(digest: &HostDigest, len: usize) -> HashPrefix {
    digest.prefix(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_known_vector() {
        assert_eq!(
            digest("abc").as_str(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest("example.com"), digest("example.com"));
        assert_ne!(digest("example.com"), digest("example.org"));
        assert_eq!(digest("example.com").as_str().len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_prefix_takes_leading_hex() {
        let d = digest("abc");
        assert_eq!(prefix(&d, HASH_PREFIX_SIZE).as_str(), "a999");
        assert!(prefix(&d, HASH_PREFIX_SIZE).covers(&d));
        assert_eq!(prefix(&d, 100).len(), DIGEST_HEX_LEN);
        assert_eq!(prefix(&d, 0).len(), 1);
    }

    #[test]
    fn test_from_hex_normalises_and_validates() {
        let upper = "A9993E364706816ABA3E25717850C26C9CD0D89D";
        assert_eq!(HostDigest::from_hex(upper), Some(digest("abc")));
        assert_eq!(HostDigest::from_hex("a999"), None);
        assert_eq!(
            HostDigest::from_hex("z9993e364706816aba3e25717850c26c9cd0d89d"),
            None
        );
    }
}
