//! HPKE Key Provider Seam
//!
//! The serving path only ever asks one question: "give me the private key
//! for this key id". Production deployments answer it from an external key
//! fetcher manager (rotation, multi-tenancy, attestation: all out of
//! scope here); tests and local development answer it from a static map
//! seeded with the published test key.

use std::collections::HashMap;

use keyhouse_core::{KvError, Result};
use x25519_dalek::{PublicKey, StaticSecret};

/// Key id reserved for protocol testing.
pub const TEST_KEY_ID: u8 = 64;

/// X25519 private key published for debugging and protocol tests.
pub const TEST_PRIVATE_KEY: [u8; 32] = [
    0x3c, 0x16, 0x89, 0x75, 0x67, 0x4b, 0x2f, 0xa8, 0xe4, 0x65, 0x97, 0x0b, 0x79, 0xc8, 0xdc,
    0xf0, 0x9f, 0x1c, 0x74, 0x16, 0x26, 0x48, 0x0b, 0xd4, 0xc6, 0x16, 0x2f, 0xc5, 0xb6, 0xa9,
    0x8e, 0x1a,
];

/// Public half of [`TEST_PRIVATE_KEY`].
pub const TEST_PUBLIC_KEY: [u8; 32] = [
    0x31, 0xe1, 0xf0, 0x5a, 0x74, 0x01, 0x02, 0x11, 0x52, 0x20, 0xe9, 0xaf, 0x91, 0x8f, 0x73,
    0x86, 0x74, 0xae, 0xc9, 0x5f, 0x54, 0xdb, 0x6e, 0x04, 0xeb, 0x70, 0x5a, 0xae, 0x8e, 0x79,
    0x81, 0x55,
];

/// Source of HPKE private keys, indexed by key id.
pub trait KeyProvider: Send + Sync {
    /// Private key for `key_id`. Unknown ids are a `PermissionDenied`: the
    /// caller could not have encrypted to a key this server holds.
    fn private_key(&self, key_id: u8) -> Result<[u8; 32]>;

    /// Public key for `key_id` (client side and peer encryption).
    fn public_key(&self, key_id: u8) -> Result<[u8; 32]> {
        let private_key = self.private_key(key_id)?;
        Ok(PublicKey::from(&StaticSecret::from(private_key)).to_bytes())
    }
}

/// Fixed in-memory key set.
pub struct StaticKeyProvider {
    keys: HashMap<u8, [u8; 32]>,
}

impl StaticKeyProvider {
    pub fn new(keys: HashMap<u8, [u8; 32]>) -> Self {
        Self { keys }
    }

    /// Provider holding only the published test key under key id 64.
    pub fn with_test_key() -> Self {
        Self::new(HashMap::from([(TEST_KEY_ID, TEST_PRIVATE_KEY)]))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn private_key(&self, key_id: u8) -> Result<[u8; 32]> {
        self.keys
            .get(&key_id)
            .copied()
            .ok_or_else(|| KvError::permission_denied(format!("Unknown key id: {key_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_key_lookup() {
        let provider = StaticKeyProvider::with_test_key();
        assert_eq!(provider.private_key(TEST_KEY_ID).unwrap(), TEST_PRIVATE_KEY);
        assert_eq!(provider.public_key(TEST_KEY_ID).unwrap(), TEST_PUBLIC_KEY);
    }

    #[test]
    fn test_unknown_key_id() {
        let provider = StaticKeyProvider::with_test_key();
        let err = provider.private_key(7).unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::PermissionDenied);
    }
}
