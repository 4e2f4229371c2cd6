// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key transformation for gateway stores.
//
// Every logical key passes through a `KeyCodec` before it reaches a backend:
// the store's prefix is prepended and, when hashing is on, the logical key is
// replaced by its SHA-256 digest. Several logical stores can then share one
// physical backend without their keys colliding.

use sha2::{Digest, Sha256};
use tracing::debug;

/// Prefix + optional hash transform applied to logical keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyCodec {
    prefix: String,
    hash_keys: bool,
}

impl KeyCodec {
    /// Create a codec for the given prefix.
    pub fn new(prefix: impl Into<String>, hash_keys: bool) -> Self {
        Self {
            prefix: prefix.into(),
            hash_keys,
        }
    }

    /// The prefix prepended to every storage key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether logical keys are hashed before storage.
    pub fn hash_keys(&self) -> bool {
        self.hash_keys
    }

    /// Map a logical key to the key actually stored in the backend.
    pub fn encode(&self, logical_key: &str) -> String {
        let storage_key = format!("{}{}", self.prefix, self.hash_key(logical_key));
        debug!(key = %storage_key, "input key was");
        storage_key
    }

    /// Strip a leading prefix from a storage key. Keys without it are
    /// returned unchanged.
    ///
    /// Only a true inverse of [`encode`](Self::encode) when hashing is off.
    pub fn decode(&self, storage_key: &str) -> String {
        storage_key
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(storage_key)
            .to_string()
    }

    fn hash_key(&self, logical_key: &str) -> String {
        if !self.hash_keys {
            return logical_key.to_string();
        }
        hash_str(logical_key)
    }
}

/// Deterministic one-way hash used for hashed keys (lowercase hex SHA-256).
pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_prefixing() {
        let codec = KeyCodec::new("apikey-", false);
        assert_eq!(codec.encode("abc123"), "apikey-abc123");
        assert_eq!(codec.decode("apikey-abc123"), "abc123");
    }

    #[test]
    fn test_hashed_key_is_fixed_digest() {
        let codec = KeyCodec::new("apikey-", true);
        // SHA-256("abc")
        assert_eq!(
            codec.encode("abc"),
            "apikey-ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_decode_strips_only_leading_prefix() {
        let codec = KeyCodec::new("org.", false);
        assert_eq!(codec.decode("org.org.42"), "org.42");
        assert_eq!(codec.decode("other"), "other");
        assert_eq!(codec.decode("xorg.1"), "xorg.1");
        assert_eq!(codec.decode("1org."), "1org.");
    }

    #[test]
    fn test_empty_prefix_is_identity() {
        let codec = KeyCodec::new("", false);
        assert_eq!(codec.encode("k"), "k");
        assert_eq!(codec.decode("k"), "k");
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode_without_hashing(prefix in "[a-z.\\-]{0,10}", key in ".{0,40}") {
            let codec = KeyCodec::new(prefix, false);
            prop_assert_eq!(codec.decode(&codec.encode(&key)), key);
        }

        #[test]
        fn prop_hashing_is_deterministic_and_hides_key(key in "[A-Za-z0-9]{1,40}") {
            let a = KeyCodec::new("apikey-", true);
            let b = KeyCodec::new("apikey-", true);
            let encoded = a.encode(&key);
            prop_assert_eq!(&encoded, &b.encode(&key));
            prop_assert_ne!(a.decode(&encoded), key);
        }
    }
}
