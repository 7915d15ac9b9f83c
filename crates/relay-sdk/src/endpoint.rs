// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The endpoint: identity gate, handler lookup and invocation dispatch.
//!
//! Built once from a [`Registry`] and [`EndpointOptions`], then shared by
//! every request. The registry, key set and journal value codec are
//! read-only from that point on.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::config::EndpointOptions;
use crate::error::{Result, SdkError};
use crate::identity::{HeaderLookup, IdentityVerifier, VerifiedIdentity};
use crate::invocation::{InvocationDriver, InvocationOutcome};
use crate::journal_codec::{IdentityCodec, JournalValueCodec};
use crate::registry::{DiscoveryManifest, HandlerBinding, Registry};

/// Request routes understood by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPath {
    /// `…/invoke/<component>/<handler>`
    Invoke { component: String, handler: String },
    /// `…/discover`
    Discover,
    /// `…/health`
    Health,
    Unknown(String),
}

impl RequestPath {
    /// Parse a request path. Any prefix before the route is ignored, as is a
    /// query string.
    pub fn parse(path: &str) -> Self {
        let route = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [.., "invoke", component, handler] => RequestPath::Invoke {
                component: (*component).to_string(),
                handler: (*handler).to_string(),
            },
            [.., "discover"] => RequestPath::Discover,
            [.., "health"] => RequestPath::Health,
            _ => RequestPath::Unknown(path.to_string()),
        }
    }
}

struct EndpointInner {
    registry: Registry,
    verifier: IdentityVerifier,
    codec: Arc<dyn JournalValueCodec>,
    max_message_size: usize,
    logger: Option<tracing::Dispatch>,
    shutdown: CancellationToken,
}

/// A configured endpoint. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("components", &self.inner.registry.len())
            .field("identity_verification", &self.inner.verifier.is_enabled())
            .field("max_message_size", &self.inner.max_message_size)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Build the endpoint. Malformed key material or a failing codec
    /// provider aborts construction.
    pub fn new(registry: Registry, options: EndpointOptions) -> Result<Self> {
        match options.logger.clone() {
            Some(dispatch) => {
                tracing::dispatcher::with_default(&dispatch, || Self::build(registry, options))
            }
            None => Self::build(registry, options),
        }
    }

    fn build(mut registry: Registry, options: EndpointOptions) -> Result<Self> {
        registry.apply_options(options.default_service_options.clone());
        registry.set_protocol_mode(options.protocol_mode);

        let backend = options.crypto_backend_or_detect();
        let verifier = IdentityVerifier::from_keys(&options.identity_keys, backend)?;
        match verifier.key_set() {
            Some(keys) => info!(
                backend = %backend,
                keys = ?keys.key_ids(),
                "Request identity verification enabled"
            ),
            None => warn!(
                "Accepting requests without validating request signatures; handler access must be restricted"
            ),
        }

        let codec = match &options.journal_value_codec_provider {
            Some(provider) => provider.create()?,
            None => Arc::new(IdentityCodec),
        };

        info!(
            components = registry.len(),
            protocol_mode = %registry.protocol_mode(),
            "Endpoint ready"
        );

        Ok(Self {
            inner: Arc::new(EndpointInner {
                registry,
                verifier,
                codec,
                max_message_size: options.max_message_size_or_default(),
                logger: options.logger,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn identity_verifier(&self) -> &IdentityVerifier {
        &self.inner.verifier
    }

    /// The shared journal value codec.
    pub fn journal_value_codec(&self) -> &Arc<dyn JournalValueCodec> {
        &self.inner.codec
    }

    /// Check request identity. Runs before anything else touches the request.
    pub fn verify_request<H>(&self, path: &str, headers: &H) -> Result<VerifiedIdentity>
    where
        H: HeaderLookup + ?Sized,
    {
        self.inner
            .verifier
            .verify_request(path, headers)
            .map_err(|e| {
                warn!(path = %path, error = %e, "Rejecting request");
                SdkError::Identity(e)
            })
    }

    pub fn resolve(&self, component: &str, handler: &str) -> Result<HandlerBinding> {
        self.inner.registry.resolve_handler(component, handler)
    }

    pub fn discovery(&self) -> Arc<DiscoveryManifest> {
        self.inner.registry.discovery_manifest()
    }

    pub fn discovery_json(&self) -> Result<String> {
        serde_json::to_string(self.discovery().as_ref())
            .map_err(|e| SdkError::Internal(format!("failed to serialize discovery manifest: {}", e)))
    }

    /// Serve one invocation request: verify identity, resolve the target,
    /// then drive the handler over `reader`/`writer`.
    ///
    /// Nothing is read from `reader` and no handler work is scheduled when
    /// verification or resolution fails.
    pub async fn invoke<H, R, W>(
        &self,
        path: &str,
        headers: &H,
        reader: R,
        writer: W,
    ) -> Result<InvocationOutcome>
    where
        H: HeaderLookup + ?Sized,
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let dispatch = self.inner.logger.clone();
        let driver = {
            let _guard = dispatch
                .as_ref()
                .map(tracing::dispatcher::set_default);
            self.prepare(path, headers)?
        };
        match dispatch {
            Some(dispatch) => driver.run(reader, writer).with_subscriber(dispatch).await,
            None => driver.run(reader, writer).await,
        }
    }

    fn prepare<H>(&self, path: &str, headers: &H) -> Result<InvocationDriver>
    where
        H: HeaderLookup + ?Sized,
    {
        self.verify_request(path, headers)?;
        let binding = match RequestPath::parse(path) {
            RequestPath::Invoke { component, handler } => self.resolve(&component, &handler)?,
            _ => return Err(SdkError::UnknownTarget(path.to_string())),
        };
        debug!(target = %binding.fully_qualified_name(), "Dispatching invocation");
        Ok(InvocationDriver::new(
            binding,
            Arc::clone(&self.inner.codec),
            self.inner.max_message_size,
            &self.inner.shutdown,
        ))
    }

    /// Cancel every in-flight invocation and refuse new ones.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Shutting down endpoint");
        }
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_path() {
        assert_eq!(
            RequestPath::parse("/invoke/Greeter/greet"),
            RequestPath::Invoke {
                component: "Greeter".into(),
                handler: "greet".into()
            }
        );
        assert_eq!(
            RequestPath::parse("/prefix/invoke/Counter/add?x=1"),
            RequestPath::Invoke {
                component: "Counter".into(),
                handler: "add".into()
            }
        );
        assert_eq!(RequestPath::parse("/discover"), RequestPath::Discover);
        assert_eq!(RequestPath::parse("/api/health/"), RequestPath::Health);
        assert_eq!(
            RequestPath::parse("/invoke/Greeter"),
            RequestPath::Unknown("/invoke/Greeter".into())
        );
    }

    #[test]
    fn test_new_with_defaults_disables_verification() {
        let endpoint = Endpoint::new(Registry::new(), EndpointOptions::new()).unwrap();
        assert!(!endpoint.identity_verifier().is_enabled());
        assert!(!endpoint.is_shut_down());
        endpoint.shutdown();
        assert!(endpoint.is_shut_down());
    }
}
