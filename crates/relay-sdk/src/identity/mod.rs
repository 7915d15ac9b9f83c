// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request identity verification.
//!
//! Every inbound request can carry an Ed25519-signed JWT proving it was sent
//! by the orchestrating server. When public keys are configured the endpoint
//! rejects any request whose token does not verify, before any handler work
//! is scheduled. Without keys verification is disabled: this is an explicit
//! opt-out that widens the trust boundary to whoever can reach the endpoint,
//! and the endpoint logs it as a warning.
//!
//! ```text
//! headers ──▶ scheme? ──v1──▶ parse JWS ──▶ KeySet::verify ──▶ claims ──▶ accept
//!                │                 │               │              │
//!             unsigned          malformed      bad signature   expired / aud
//!                └─────────────────┴───────────────┴──────────────┴──▶ reject
//! ```

mod backend;
mod keys;
mod token;

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

pub use backend::{
    BackendKey, CryptoBackend, DalekBackend, PUBLIC_KEY_LEN, RingBackend, SIGNATURE_LEN,
    SignatureBackend,
};
pub use keys::{KeySet, PUBLIC_KEY_PREFIX, decode_public_key, encode_public_key};
pub use token::{SignatureScheme, SignedRequestToken};

/// Header naming the signature scheme.
pub const SIGNATURE_SCHEME_HEADER: &str = "x-restate-signature-scheme";

/// Header carrying the v1 JWT.
pub const JWT_HEADER: &str = "x-restate-jwt-v1";

/// Errors from key parsing and request verification.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Malformed public key material (configuration time)
    #[error("invalid public key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("unknown crypto backend '{0}': expected 'ring' or 'dalek'")]
    UnknownBackend(String),

    /// The request carried no identity but keys are configured
    #[error("request has no identity")]
    MissingIdentity,

    #[error("unexpected signature scheme '{0}': known schemes are 'unsigned', 'v1'")]
    UnsupportedScheme(String),

    #[error("v1 signature scheme expects the header {0}")]
    MissingHeader(&'static str),

    #[error("unexpected empty valued header {0}")]
    EmptyHeader(&'static str),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("kid {0} is not present in the key set")]
    UnknownKey(String),

    #[error("JWT signature did not validate")]
    BadSignature,

    #[error("{0}")]
    InvalidClaims(String),
}

/// Case-insensitive access to request headers.
pub trait HeaderLookup {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str).or_else(|| {
            self.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }
}

impl HeaderLookup for BTreeMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl HeaderLookup for [(&str, &str)] {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }
}

impl<const N: usize> HeaderLookup for [(&str, &str); N] {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}

impl HeaderLookup for Vec<(String, String)> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedIdentity {
    /// Verification is disabled; nothing was checked
    Unverified,
    /// Token verified under this key id
    Key(String),
}

/// Gatekeeper run before any handler work for a request.
#[derive(Debug, Clone)]
pub enum IdentityVerifier {
    /// Accept every request without checking
    Disabled,
    /// Require a valid token signed by one of these keys
    Enabled(KeySet),
}

impl IdentityVerifier {
    /// Explicitly turn verification off.
    pub fn disabled() -> Self {
        IdentityVerifier::Disabled
    }

    /// Build from configured key strings. An empty list disables
    /// verification; malformed keys are an error.
    pub fn from_keys<I, S>(keys: I, backend: CryptoBackend) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key_set = KeySet::parse(keys, backend)?;
        if key_set.is_empty() {
            Ok(IdentityVerifier::Disabled)
        } else {
            Ok(IdentityVerifier::Enabled(key_set))
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, IdentityVerifier::Enabled(_))
    }

    pub fn key_set(&self) -> Option<&KeySet> {
        match self {
            IdentityVerifier::Enabled(keys) => Some(keys),
            IdentityVerifier::Disabled => None,
        }
    }

    /// Verify a request against the current wall clock.
    pub fn verify_request<H>(&self, path: &str, headers: &H) -> Result<VerifiedIdentity, IdentityError>
    where
        H: HeaderLookup + ?Sized,
    {
        self.verify_request_at(path, headers, chrono::Utc::now().timestamp())
    }

    /// Verify a request; `now` is unix seconds.
    pub fn verify_request_at<H>(
        &self,
        path: &str,
        headers: &H,
        now: i64,
    ) -> Result<VerifiedIdentity, IdentityError>
    where
        H: HeaderLookup + ?Sized,
    {
        let keys = match self {
            IdentityVerifier::Disabled => return Ok(VerifiedIdentity::Unverified),
            IdentityVerifier::Enabled(keys) => keys,
        };

        let scheme = match header_value(headers, SIGNATURE_SCHEME_HEADER)? {
            Some(value) => SignatureScheme::parse(value)?,
            None => SignatureScheme::Unsigned,
        };
        match scheme {
            SignatureScheme::Unsigned => Err(IdentityError::MissingIdentity),
            SignatureScheme::V1 => {
                let jwt = header_value(headers, JWT_HEADER)?
                    .ok_or(IdentityError::MissingHeader(JWT_HEADER))?;
                let token = SignedRequestToken::parse_v1(jwt)?;
                if !keys.contains(token.key_id()) {
                    return Err(IdentityError::UnknownKey(token.key_id().to_string()));
                }
                if !keys.verify(&token) {
                    return Err(IdentityError::BadSignature);
                }
                token.validate_claims(path, now)?;
                debug!(path = %path, key_id = %token.key_id(), "Request identity verified");
                Ok(VerifiedIdentity::Key(token.key_id().to_string()))
            }
        }
    }
}

fn header_value<'a, H>(headers: &'a H, name: &'static str) -> Result<Option<&'a str>, IdentityError>
where
    H: HeaderLookup + ?Sized,
{
    match headers.header(name) {
        None => Ok(None),
        Some("") => Err(IdentityError::EmptyHeader(name)),
        Some(value) => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut map = HashMap::new();
        map.insert("X-Restate-JWT-V1".to_string(), "token".to_string());
        assert_eq!(map.header(JWT_HEADER), Some("token"));

        let pairs = [("X-RESTATE-SIGNATURE-SCHEME", "v1")];
        assert_eq!(pairs.header(SIGNATURE_SCHEME_HEADER), Some("v1"));
        assert_eq!(pairs.header(JWT_HEADER), None);
    }

    #[test]
    fn test_disabled_accepts_anything() {
        let verifier = IdentityVerifier::disabled();
        assert!(!verifier.is_enabled());
        let empty: [(&str, &str); 0] = [];
        assert_eq!(
            verifier.verify_request("/invoke/A/b", &empty).unwrap(),
            VerifiedIdentity::Unverified
        );
    }

    #[test]
    fn test_empty_key_list_disables() {
        let verifier = IdentityVerifier::from_keys(Vec::<String>::new(), CryptoBackend::Ring).unwrap();
        assert!(verifier.key_set().is_none());
    }

    #[test]
    fn test_empty_header_value() {
        let headers = [(SIGNATURE_SCHEME_HEADER, "")];
        assert!(matches!(
            header_value(&headers, SIGNATURE_SCHEME_HEADER),
            Err(IdentityError::EmptyHeader(_))
        ));
    }
}
