// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Relay SDK - endpoint side of the durable invocation protocol.
//!
//! This crate turns an inbound stream of framed protocol messages into
//! ordered, replay-safe calls into handler code, and turns handler results
//! back into outbound messages. It builds on the `relay-protocol` codec and
//! leaves transport (HTTP/2, request/response bodies, serverless events) to
//! the host.
//!
//! # Features
//!
//! - **Request Identity**: Ed25519-signed request tokens checked against a
//!   configured key set before any handler work, with `ring` and
//!   `ed25519-dalek` backends
//! - **Handler Registry**: Services, virtual objects and workflows with
//!   cascading options and a discovery manifest
//! - **Sequential Execution**: One FIFO queue per invocation so side effects
//!   run in program order
//! - **Completable Promises**: Externally settled futures bridging callbacks
//!   into async code
//! - **Journal Value Codec**: Pluggable transform for journal-bound payloads
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_sdk::{ComponentDefinition, Endpoint, EndpointOptions, Registry, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> relay_sdk::Result<()> {
//!     relay_sdk::telemetry::init_subscriber()?;
//!
//!     let mut registry = Registry::new();
//!     registry.bind(
//!         ComponentDefinition::service("Greeter")
//!             .handler("greet", handler_fn(|_ctx, name| async move { Ok(name) })),
//!     )?;
//!
//!     let endpoint = Endpoint::new(registry, EndpointOptions::from_env()?)?;
//!
//!     // Per request, from the HTTP adapter:
//!     let outcome = endpoint.invoke(&path, &headers, body_reader, response_writer).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Ordered Work
//!
//! Handler code pushes anything that must reach the server in program order
//! through the invocation's queue:
//!
//! ```ignore
//! let receipt = ctx
//!     .queue()
//!     .enqueue_and_await(move || async move { charge(card).await })
//!     .await?;
//! ```
//!
//! # Configuration
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RELAY_IDENTITY_KEYS` | (none) | Comma separated `publickeyv1_…` keys; empty disables verification |
//! | `RELAY_CRYPTO_BACKEND` | detected | `ring` or `dalek` |
//! | `RELAY_MAX_MESSAGE_SIZE` | `67108864` | Largest message payload in bytes |
//! | `RELAY_PROTOCOL_MODE` | `bidi` | `bidi` or `request-response` |
//!
//! ## Programmatic Configuration
//!
//! ```ignore
//! let options = EndpointOptions::new()
//!     .with_identity_key("publickeyv1_...")
//!     .with_default_service_options(
//!         ServiceOptions::new().with_inactivity_timeout(Duration::from_secs(60)),
//!     );
//! ```

mod config;
mod endpoint;
mod error;
mod invocation;
mod journal_codec;
mod promise;
mod queue;

pub mod identity;
pub mod registry;
pub mod telemetry;

pub use config::EndpointOptions;
pub use endpoint::{Endpoint, RequestPath};
pub use error::{HandlerError, Result, SdkError};
pub use identity::{
    CryptoBackend, HeaderLookup, IdentityError, IdentityVerifier, KeySet, SignedRequestToken,
    VerifiedIdentity,
};
pub use invocation::{InvocationContext, InvocationDriver, InvocationOutcome};
pub use journal_codec::{IdentityCodec, JournalValueCodec, JournalValueCodecProvider};
pub use promise::{AlreadySettled, CompletablePromise, Completer, PromiseError};
pub use queue::SequentialQueue;
pub use registry::{
    ComponentDefinition, ComponentKind, DiscoveryManifest, Handler, HandlerBinding, HandlerKind,
    ProtocolMode, Registry, RetryPolicy, ServiceOptions, handler_fn,
};

// Re-export protocol types for convenience
pub use relay_protocol::{Message, MessageFlags, MessageType};
