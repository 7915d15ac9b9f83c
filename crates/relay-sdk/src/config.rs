// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoint configuration.

use std::env;
use std::fmt;
use std::sync::Arc;

use relay_protocol::MAX_MESSAGE_SIZE;

use crate::error::{Result, SdkError};
use crate::identity::CryptoBackend;
use crate::journal_codec::JournalValueCodecProvider;
use crate::registry::{ProtocolMode, ServiceOptions};

/// Everything an [`Endpoint`](crate::Endpoint) is built from. Consumed once
/// at construction.
#[derive(Clone, Default)]
pub struct EndpointOptions {
    /// `publickeyv1_…` keys allowed to sign requests. Empty disables request
    /// verification.
    pub identity_keys: Vec<String>,
    /// Signature backend (default: detected from the target)
    pub crypto_backend: Option<CryptoBackend>,
    /// Defaults inherited by every bound component
    pub default_service_options: ServiceOptions,
    /// Transform for journal-bound payloads (default: pass-through)
    pub journal_value_codec_provider: Option<Arc<dyn JournalValueCodecProvider>>,
    /// Dispatcher that receives this endpoint's log events (default: global)
    pub logger: Option<tracing::Dispatch>,
    /// Largest accepted message payload (default: 64 MiB)
    pub max_message_size: Option<usize>,
    /// Advertised protocol mode (default: bidirectional stream)
    pub protocol_mode: ProtocolMode,
}

impl fmt::Debug for EndpointOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointOptions")
            .field("identity_keys", &self.identity_keys)
            .field("crypto_backend", &self.crypto_backend)
            .field("default_service_options", &self.default_service_options)
            .field(
                "journal_value_codec_provider",
                &self.journal_value_codec_provider.is_some(),
            )
            .field("logger", &self.logger.is_some())
            .field("max_message_size", &self.max_message_size)
            .field("protocol_mode", &self.protocol_mode)
            .finish()
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `RELAY_IDENTITY_KEYS` - Comma separated `publickeyv1_…` keys (default: none, verification off)
    /// - `RELAY_CRYPTO_BACKEND` - `ring` or `dalek` (default: detected)
    /// - `RELAY_MAX_MESSAGE_SIZE` - Largest message payload in bytes (default: 67108864)
    /// - `RELAY_PROTOCOL_MODE` - `bidi` or `request-response` (default: bidi)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`EndpointOptions::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let identity_keys = lookup("RELAY_IDENTITY_KEYS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let crypto_backend = lookup("RELAY_CRYPTO_BACKEND")
            .map(|v| {
                v.parse::<CryptoBackend>()
                    .map_err(|e| SdkError::Config(format!("invalid RELAY_CRYPTO_BACKEND: {}", e)))
            })
            .transpose()?;

        let max_message_size = lookup("RELAY_MAX_MESSAGE_SIZE")
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|e| SdkError::Config(format!("invalid RELAY_MAX_MESSAGE_SIZE: {}", e)))
            })
            .transpose()?;

        let protocol_mode = lookup("RELAY_PROTOCOL_MODE")
            .map(|v| {
                v.parse::<ProtocolMode>()
                    .map_err(|e| SdkError::Config(format!("invalid RELAY_PROTOCOL_MODE: {}", e)))
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            identity_keys,
            crypto_backend,
            max_message_size,
            protocol_mode,
            ..Self::default()
        })
    }

    /// Add a key allowed to sign requests.
    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_keys.push(key.into());
        self
    }

    pub fn with_identity_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_crypto_backend(mut self, backend: CryptoBackend) -> Self {
        self.crypto_backend = Some(backend);
        self
    }

    pub fn with_default_service_options(mut self, options: ServiceOptions) -> Self {
        self.default_service_options = options;
        self
    }

    pub fn with_journal_value_codec_provider(
        mut self,
        provider: Arc<dyn JournalValueCodecProvider>,
    ) -> Self {
        self.journal_value_codec_provider = Some(provider);
        self
    }

    pub fn with_logger(mut self, dispatch: tracing::Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    pub fn with_protocol_mode(mut self, mode: ProtocolMode) -> Self {
        self.protocol_mode = mode;
        self
    }

    pub fn crypto_backend_or_detect(&self) -> CryptoBackend {
        self.crypto_backend.unwrap_or_else(CryptoBackend::detect)
    }

    pub fn max_message_size_or_default(&self) -> usize {
        self.max_message_size.unwrap_or(MAX_MESSAGE_SIZE)
    }
}
