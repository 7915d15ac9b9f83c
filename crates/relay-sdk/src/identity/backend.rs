// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ed25519 signature backends.
//!
//! Two implementations of the same scheme: `ring` for native targets and the
//! pure Rust `ed25519-dalek` for targets without platform crypto (wasm32).
//! Both must reach identical accept/reject decisions for identical inputs.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::Verifier;
use ring::signature::{ED25519, UnparsedPublicKey};

use super::IdentityError;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Verification strategy, chosen once at configuration time.
pub trait SignatureBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> CryptoBackend;

    /// Turn raw public key bytes into a backend-native handle.
    fn import_key(&self, raw: &[u8; PUBLIC_KEY_LEN]) -> Result<BackendKey, IdentityError>;

    /// Verify `signature` over `data`. Never panics; anything malformed is `false`.
    fn verify(&self, key: &BackendKey, signature: &[u8], data: &[u8]) -> bool;
}

/// Backend-native public key handle.
#[derive(Debug, Clone)]
pub enum BackendKey {
    Ring(UnparsedPublicKey<[u8; PUBLIC_KEY_LEN]>),
    Dalek(ed25519_dalek::VerifyingKey),
}

/// Which signature backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptoBackend {
    /// `ring`, backed by platform-optimized native code
    Ring,
    /// `ed25519-dalek`, portable pure Rust
    Dalek,
}

impl CryptoBackend {
    /// The backend the current target supports best.
    pub fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            CryptoBackend::Dalek
        } else {
            CryptoBackend::Ring
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoBackend::Ring => "ring",
            CryptoBackend::Dalek => "dalek",
        }
    }

    pub fn backend(self) -> &'static dyn SignatureBackend {
        match self {
            CryptoBackend::Ring => &RingBackend,
            CryptoBackend::Dalek => &DalekBackend,
        }
    }
}

impl Default for CryptoBackend {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Display for CryptoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoBackend {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ring" => Ok(CryptoBackend::Ring),
            "dalek" | "ed25519-dalek" => Ok(CryptoBackend::Dalek),
            other => Err(IdentityError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct RingBackend;

impl SignatureBackend for RingBackend {
    fn kind(&self) -> CryptoBackend {
        CryptoBackend::Ring
    }

    fn import_key(&self, raw: &[u8; PUBLIC_KEY_LEN]) -> Result<BackendKey, IdentityError> {
        Ok(BackendKey::Ring(UnparsedPublicKey::new(&ED25519, *raw)))
    }

    fn verify(&self, key: &BackendKey, signature: &[u8], data: &[u8]) -> bool {
        let BackendKey::Ring(key) = key else {
            return false;
        };
        if signature.len() != SIGNATURE_LEN {
            return false;
        }
        key.verify(data, signature).is_ok()
    }
}

#[derive(Debug)]
pub struct DalekBackend;

impl SignatureBackend for DalekBackend {
    fn kind(&self) -> CryptoBackend {
        CryptoBackend::Dalek
    }

    fn import_key(&self, raw: &[u8; PUBLIC_KEY_LEN]) -> Result<BackendKey, IdentityError> {
        ed25519_dalek::VerifyingKey::from_bytes(raw)
            .map(BackendKey::Dalek)
            .map_err(|e| IdentityError::InvalidKey {
                key: bs58::encode(raw).into_string(),
                reason: e.to_string(),
            })
    }

    fn verify(&self, key: &BackendKey, signature: &[u8], data: &[u8]) -> bool {
        let BackendKey::Dalek(key) = key else {
            return false;
        };
        let Ok(bytes) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        key.verify(data, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn test_backend_from_str() {
        assert_eq!("ring".parse::<CryptoBackend>().unwrap(), CryptoBackend::Ring);
        assert_eq!(" Dalek ".parse::<CryptoBackend>().unwrap(), CryptoBackend::Dalek);
        assert!(matches!(
            "openssl".parse::<CryptoBackend>(),
            Err(IdentityError::UnknownBackend(name)) if name == "openssl"
        ));
    }

    #[test]
    fn test_detect_on_native() {
        #[cfg(not(target_arch = "wasm32"))]
        assert_eq!(CryptoBackend::detect(), CryptoBackend::Ring);
    }

    #[test]
    fn test_mismatched_key_handle_is_rejected() {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let raw = signing.verifying_key().to_bytes();
        let signature = signing.sign(b"data").to_bytes();

        let dalek_key = DalekBackend.import_key(&raw).unwrap();
        assert!(DalekBackend.verify(&dalek_key, &signature, b"data"));
        assert!(!RingBackend.verify(&dalek_key, &signature, b"data"));
    }

    #[test]
    fn test_short_signature_is_rejected() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let raw = signing.verifying_key().to_bytes();
        let signature = signing.sign(b"data").to_bytes();

        for backend in [CryptoBackend::Ring, CryptoBackend::Dalek] {
            let backend = backend.backend();
            let key = backend.import_key(&raw).unwrap();
            assert!(!backend.verify(&key, &signature[..63], b"data"));
            assert!(!backend.verify(&key, &[], b"data"));
        }
    }
}
