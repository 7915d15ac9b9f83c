// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signed request tokens (v1 scheme: compact JWS with EdDSA).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

use super::IdentityError;

/// Signature scheme announced by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// No identity attached
    Unsigned,
    /// Ed25519-signed JWT in `x-restate-jwt-v1`
    V1,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::Unsigned => "unsigned",
            SignatureScheme::V1 => "v1",
        }
    }

    pub fn parse(value: &str) -> Result<Self, IdentityError> {
        match value {
            "unsigned" => Ok(SignatureScheme::Unsigned),
            "v1" => Ok(SignatureScheme::V1),
            other => Err(IdentityError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// A parsed, not yet verified, request token.
///
/// `signed_bytes` is the canonical descriptor the signature covers: the ASCII
/// text `<header>.<payload>` exactly as received.
#[derive(Debug, Clone)]
pub struct SignedRequestToken {
    scheme: SignatureScheme,
    key_id: String,
    signature: Vec<u8>,
    signed_bytes: Vec<u8>,
    claims: Vec<u8>,
}

impl SignedRequestToken {
    /// Parse a compact JWS. Only the structure and protected header are
    /// checked here; the signature and claims are checked by the caller.
    pub fn parse_v1(jwt: &str) -> Result<Self, IdentityError> {
        let parts: Vec<&str> = jwt.split('.').collect();
        let [header, payload, signature] = parts.as_slice() else {
            return Err(malformed("invalid compact JWS; expected 3 parts"));
        };

        let header_json: Value = serde_json::from_slice(&decode_segment(header)?)
            .map_err(|_| malformed("JWT header is invalid"))?;
        if header_json.get("typ").and_then(Value::as_str) != Some("JWT") {
            return Err(malformed("JWT must have \"typ\" header \"JWT\""));
        }
        if header_json.get("alg").and_then(Value::as_str) != Some("EdDSA") {
            return Err(malformed("JWT must have \"alg\" header \"EdDSA\""));
        }
        let key_id = header_json
            .get("kid")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("JWT must have \"kid\" header, which must be a string"))?
            .to_string();

        Ok(Self {
            scheme: SignatureScheme::V1,
            key_id,
            signature: decode_segment(signature)?,
            signed_bytes: format!("{}.{}", header, payload).into_bytes(),
            claims: decode_segment(payload)?,
        })
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn signed_bytes(&self) -> &[u8] {
        &self.signed_bytes
    }

    /// Raw JSON claims payload.
    pub fn claims(&self) -> &[u8] {
        &self.claims
    }

    /// Check `aud`, `nbf` and `exp` against the request path and `now`
    /// (unix seconds). Only meaningful after the signature has verified.
    pub fn validate_claims(&self, expected_aud: &str, now: i64) -> Result<(), IdentityError> {
        let claims: Value =
            serde_json::from_slice(&self.claims).map_err(|_| malformed("JWT payload is invalid"))?;

        let (Some(aud), Some(exp), Some(nbf)) = (
            present(&claims, "aud"),
            present(&claims, "exp"),
            present(&claims, "nbf"),
        ) else {
            return Err(IdentityError::InvalidClaims(
                "JWT must contain all of the following claims: aud, exp, nbf".to_string(),
            ));
        };

        if aud.as_str() != Some(expected_aud) {
            return Err(IdentityError::InvalidClaims("JWT aud claim is invalid".to_string()));
        }

        let now = now as f64;
        let nbf = nbf
            .as_f64()
            .ok_or_else(|| IdentityError::InvalidClaims("nbf claim must be a number".to_string()))?;
        if nbf > now {
            return Err(IdentityError::InvalidClaims(
                "nbf claim timestamp check failed".to_string(),
            ));
        }
        let exp = exp
            .as_f64()
            .ok_or_else(|| IdentityError::InvalidClaims("exp claim must be a number".to_string()))?;
        if exp <= now {
            return Err(IdentityError::InvalidClaims(
                "exp claim timestamp check failed".to_string(),
            ));
        }
        Ok(())
    }
}

fn malformed(reason: &str) -> IdentityError {
    IdentityError::MalformedToken(reason.to_string())
}

/// A claim counts as present unless it is missing, null, false, zero or "".
fn present<'a>(claims: &'a Value, name: &str) -> Option<&'a Value> {
    claims.get(name).filter(|v| match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    })
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, IdentityError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| IdentityError::MalformedToken(format!("invalid base64url segment: {}", e)))
}
