// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configured public key set.

use std::collections::HashMap;

use super::backend::{BackendKey, CryptoBackend, PUBLIC_KEY_LEN, SignatureBackend};
use super::token::SignedRequestToken;
use super::IdentityError;

/// Prefix of every v1 public key string.
pub const PUBLIC_KEY_PREFIX: &str = "publickeyv1_";

/// Public keys allowed to sign requests, keyed by their full
/// `publickeyv1_…` string (which is also the JWT `kid`).
///
/// Parsed once at configuration time and immutable afterwards.
#[derive(Debug, Clone)]
pub struct KeySet {
    backend: CryptoBackend,
    keys: HashMap<String, BackendKey>,
}

impl KeySet {
    /// Parse key strings into backend handles. Any malformed key fails the
    /// whole set.
    pub fn parse<I, S>(keys: I, backend: CryptoBackend) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let signer = backend.backend();
        let mut parsed = HashMap::new();
        for key in keys {
            let key = key.as_ref().trim();
            let raw = decode_public_key(key)?;
            parsed.insert(key.to_string(), signer.import_key(&raw)?);
        }
        Ok(Self {
            backend,
            keys: parsed,
        })
    }

    pub fn backend(&self) -> CryptoBackend {
        self.backend
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// Configured key ids, sorted.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the token's signature verifies under the key it names.
    /// Unknown key ids fail closed.
    pub fn verify(&self, token: &SignedRequestToken) -> bool {
        match self.keys.get(token.key_id()) {
            Some(key) => {
                self.signer()
                    .verify(key, token.signature(), token.signed_bytes())
            }
            None => false,
        }
    }

    fn signer(&self) -> &'static dyn SignatureBackend {
        self.backend.backend()
    }
}

/// Decode `publickeyv1_<base58>` into raw key bytes.
///
/// The point is decompressed here so that garbage key material is rejected at
/// configuration time whichever backend is selected.
pub fn decode_public_key(key: &str) -> Result<[u8; PUBLIC_KEY_LEN], IdentityError> {
    let invalid = |reason: &str| IdentityError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let encoded = key
        .strip_prefix(PUBLIC_KEY_PREFIX)
        .ok_or_else(|| invalid("public keys are expected to start with publickeyv1_"))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| invalid(&format!("invalid base58: {}", e)))?;
    let raw: [u8; PUBLIC_KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid("public keys are expected to have 32 bytes of data"))?;
    ed25519_dalek::VerifyingKey::from_bytes(&raw)
        .map_err(|_| invalid("bytes are not a valid Ed25519 point"))?;
    Ok(raw)
}

/// Encode raw key bytes as `publickeyv1_<base58>`.
pub fn encode_public_key(raw: &[u8; PUBLIC_KEY_LEN]) -> String {
    format!("{}{}", PUBLIC_KEY_PREFIX, bs58::encode(raw).into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn key_string(seed: u8) -> String {
        encode_public_key(&SigningKey::from_bytes(&[seed; 32]).verifying_key().to_bytes())
    }

    #[test]
    fn test_encode_decode_public_key() {
        let raw = SigningKey::from_bytes(&[1u8; 32]).verifying_key().to_bytes();
        let encoded = encode_public_key(&raw);
        assert!(encoded.starts_with("publickeyv1_"));
        assert_eq!(decode_public_key(&encoded).unwrap(), raw);
    }

    #[test]
    fn test_wrong_prefix() {
        let key = key_string(1).replace("publickeyv1_", "publickeyv2_");
        assert!(matches!(
            decode_public_key(&key),
            Err(IdentityError::InvalidKey { reason, .. }) if reason.contains("publickeyv1_")
        ));
    }

    #[test]
    fn test_bad_base58() {
        // '0' and 'l' are not in the base58 alphabet
        assert!(matches!(
            decode_public_key("publickeyv1_0l0l"),
            Err(IdentityError::InvalidKey { reason, .. }) if reason.starts_with("invalid base58")
        ));
    }

    #[test]
    fn test_wrong_length() {
        let short = format!("publickeyv1_{}", bs58::encode([9u8; 16]).into_string());
        assert!(matches!(
            decode_public_key(&short),
            Err(IdentityError::InvalidKey { reason, .. }) if reason.contains("32 bytes")
        ));
    }

    #[test]
    fn test_parse_key_set() {
        let keys = [key_string(1), key_string(2)];
        for backend in [CryptoBackend::Ring, CryptoBackend::Dalek] {
            let set = KeySet::parse(&keys, backend).unwrap();
            assert_eq!(set.len(), 2);
            assert_eq!(set.backend(), backend);
            assert!(set.contains(&keys[0]));
            assert!(!set.contains("publickeyv1_unknown"));
        }
    }

    #[test]
    fn test_one_bad_key_fails_the_set() {
        let keys = vec![key_string(1), "not-a-key".to_string()];
        assert!(KeySet::parse(&keys, CryptoBackend::Ring).is_err());
    }
}
