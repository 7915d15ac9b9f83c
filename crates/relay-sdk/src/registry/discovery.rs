// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Discovery manifest returned on the well-known discovery request.
//!
//! Serialized as camelCase JSON. Durations are milliseconds; unset options
//! are omitted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::component::{ComponentKind, HandlerKind};
use super::options::{OnMaxAttempts, ServiceOptions};

/// How the server talks to this endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMode {
    /// Full duplex stream for the whole invocation
    #[default]
    BidiStream,
    /// One request body in, one response body out
    RequestResponse,
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMode::BidiStream => f.write_str("bidi"),
            ProtocolMode::RequestResponse => f.write_str("request-response"),
        }
    }
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bidi" | "bidi_stream" | "bidi-stream" => Ok(ProtocolMode::BidiStream),
            "request-response" | "request_response" => Ok(ProtocolMode::RequestResponse),
            other => Err(format!(
                "unknown protocol mode '{}': expected 'bidi' or 'request-response'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryManifest {
    pub protocol_mode: ProtocolMode,
    pub min_protocol_version: u32,
    pub max_protocol_version: u32,
    pub services: Vec<ServiceManifest>,
}

impl DiscoveryManifest {
    pub fn service(&self, name: &str) -> Option<&ServiceManifest> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    pub name: String,
    pub ty: ComponentKind,
    pub handlers: Vec<HandlerManifest>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub documentation: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub options: ManifestOptions,
}

impl ServiceManifest {
    pub fn handler(&self, name: &str) -> Option<&HandlerManifest> {
        self.handlers.iter().find(|h| h.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerManifest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ty: Option<HandlerKind>,
    pub input: InputPayload,
    pub output: OutputPayload,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub documentation: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub options: ManifestOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    pub content_type: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    pub content_type: String,
    pub set_content_type_if_empty: bool,
}

/// Resolved options in wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestOptions {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub journal_retention: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub idempotency_retention: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inactivity_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub abort_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ingress_private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enable_lazy_state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub workflow_completion_retention: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_policy_initial_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_policy_exponentiation_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_policy_max_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_policy_max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_policy_on_max_attempts: Option<OnMaxAttempts>,
}

impl ManifestOptions {
    pub fn from_options(options: &ServiceOptions) -> Self {
        let retry = options.retry_policy.clone().unwrap_or_default();
        Self {
            journal_retention: options.journal_retention.map(millis),
            idempotency_retention: options.idempotency_retention.map(millis),
            inactivity_timeout: options.inactivity_timeout.map(millis),
            abort_timeout: options.abort_timeout.map(millis),
            ingress_private: options.ingress_private,
            enable_lazy_state: options.enable_lazy_state,
            workflow_completion_retention: options.workflow_retention.map(millis),
            retry_policy_initial_interval: retry.initial_interval.map(millis),
            retry_policy_exponentiation_factor: retry.exponentiation_factor,
            retry_policy_max_interval: retry.max_interval.map(millis),
            retry_policy_max_attempts: retry.max_attempts,
            retry_policy_on_max_attempts: retry.on_max_attempts,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
