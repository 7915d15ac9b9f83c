// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for relay-sdk integration tests.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey};
use relay_sdk::identity::encode_public_key;
use relay_sdk::{Message, MessageType};
use relay_protocol::MessageDecoder;
use serde_json::{Value, json};

pub const NOW: i64 = 1_700_000_000;

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// `publickeyv1_…` string for a signing key.
pub fn public_key(key: &SigningKey) -> String {
    encode_public_key(&key.verifying_key().to_bytes())
}

pub fn segment(value: &Value) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
}

/// Compact JWS signed by `key`, with `kid` set to `key`'s public key.
pub fn sign_jwt(key: &SigningKey, claims: Value) -> String {
    sign_jwt_with_kid(key, &public_key(key), claims)
}

pub fn sign_jwt_with_kid(key: &SigningKey, kid: &str, claims: Value) -> String {
    let header = segment(&json!({"typ": "JWT", "alg": "EdDSA", "kid": kid}));
    let payload = segment(&claims);
    let signed = format!("{}.{}", header, payload);
    let signature = key.sign(signed.as_bytes());
    format!("{}.{}", signed, URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

/// Claims valid at [`NOW`] for `path`.
pub fn claims_for(path: &str) -> Value {
    json!({"aud": path, "nbf": NOW - 60, "exp": NOW + 60})
}

/// Claims valid at the real current time for `path`.
pub fn live_claims_for(path: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({"aud": path, "nbf": now - 60, "exp": now + 300})
}

pub fn signed_headers(jwt: &str) -> Vec<(String, String)> {
    vec![
        ("x-restate-signature-scheme".to_string(), "v1".to_string()),
        ("x-restate-jwt-v1".to_string(), jwt.to_string()),
    ]
}

/// Encoded `Start` + `Input` head of an invocation stream.
pub fn invocation_head(input: &'static [u8]) -> Vec<u8> {
    let mut bytes = relay_protocol::encode(&Message::start(Bytes::from_static(b"inv-1")).unwrap())
        .to_vec();
    bytes.extend_from_slice(&relay_protocol::encode(
        &Message::input(Bytes::from_static(input)).unwrap(),
    ));
    bytes
}

/// Decode everything an endpoint wrote.
pub fn decode_all(bytes: &[u8]) -> Vec<Message> {
    let mut decoder = MessageDecoder::new();
    let messages = decoder.decode(bytes).unwrap();
    decoder.finish().unwrap();
    messages
}

pub fn types(messages: &[Message]) -> Vec<MessageType> {
    messages.iter().map(Message::message_type).collect()
}
