// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tracing subscriber setup for processes hosting an endpoint.
//!
//! ```rust,ignore
//! relay_sdk::telemetry::init_subscriber()?;
//! // or route a single endpoint's events elsewhere:
//! let options = EndpointOptions::new().with_logger(relay_sdk::telemetry::dispatch("debug"));
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

use crate::error::{Result, SdkError};

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
}

/// Install the global subscriber: stderr output filtered by `RUST_LOG`
/// (default: info).
///
/// Fails if a global subscriber is already set.
pub fn init_subscriber() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::Registry::default()
        .with(fmt_layer())
        .with(filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SdkError::Config(format!("failed to set global subscriber: {}", e)))
}

/// A standalone dispatcher writing to stderr with the given filter
/// directives, for [`EndpointOptions::logger`](crate::EndpointOptions::logger).
pub fn dispatch(directives: &str) -> tracing::Dispatch {
    let subscriber = tracing_subscriber::Registry::default()
        .with(fmt_layer())
        .with(EnvFilter::new(directives));
    tracing::Dispatch::new(subscriber)
}
