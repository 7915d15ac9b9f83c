// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Component and handler definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::options::{RetryPolicy, ServiceOptions};
use crate::error::HandlerError;
use crate::invocation::InvocationContext;

/// Executable handler logic. The registry never looks inside: bytes in,
/// bytes or a [`HandlerError`] out.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, ctx: InvocationContext, input: Bytes) -> Result<Bytes, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(InvocationContext, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send + 'static,
{
    async fn invoke(&self, ctx: InvocationContext, input: Bytes) -> Result<Bytes, HandlerError> {
        (self.0)(ctx, input).await
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(InvocationContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Kind of a bound component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKind {
    /// Stateless service
    Service,
    /// Keyed object with exclusive and shared handlers
    VirtualObject,
    /// Workflow with one run handler plus shared handlers
    Workflow,
}

/// Concurrency class of a handler on a keyed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerKind {
    Exclusive,
    Shared,
    Workflow,
}

/// One handler of a component.
#[derive(Clone)]
pub struct HandlerDefinition {
    pub(crate) name: String,
    pub(crate) kind: Option<HandlerKind>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) options: ServiceOptions,
    pub(crate) documentation: Option<String>,
    pub(crate) metadata: BTreeMap<String, String>,
}

impl fmt::Debug for HandlerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl HandlerDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` for plain services.
    pub fn kind(&self) -> Option<HandlerKind> {
        self.kind
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn documentation(&self) -> Option<&str> {
        self.documentation.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// A named service, virtual object or workflow and its handlers.
///
/// ```ignore
/// let counter = ComponentDefinition::virtual_object("Counter")
///     .exclusive("add", handler_fn(add))
///     .shared("get", handler_fn(get))
///     .with_options(ServiceOptions::new().with_journal_retention(Duration::from_secs(86400)));
/// ```
#[derive(Debug, Clone)]
pub struct ComponentDefinition {
    pub(crate) name: String,
    pub(crate) kind: ComponentKind,
    pub(crate) handlers: Vec<HandlerDefinition>,
    pub(crate) options: ServiceOptions,
    pub(crate) documentation: Option<String>,
    pub(crate) metadata: BTreeMap<String, String>,
}

impl ComponentDefinition {
    fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            handlers: Vec::new(),
            options: ServiceOptions::default(),
            documentation: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Service)
    }

    pub fn virtual_object(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::VirtualObject)
    }

    pub fn workflow(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Workflow)
    }

    /// Add a handler with the component's default kind: none for services,
    /// exclusive for virtual objects, shared for workflows.
    pub fn handler(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let kind = match self.kind {
            ComponentKind::Service => None,
            ComponentKind::VirtualObject => Some(HandlerKind::Exclusive),
            ComponentKind::Workflow => Some(HandlerKind::Shared),
        };
        self.push(name, kind, handler, ServiceOptions::default())
    }

    /// Add a handler with its own option overrides.
    pub fn handler_with_options(
        self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        options: ServiceOptions,
    ) -> Self {
        let mut this = self.handler(name, handler);
        if let Some(last) = this.handlers.last_mut() {
            last.options = options;
        }
        this
    }

    pub fn exclusive(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.push(name, Some(HandlerKind::Exclusive), handler, ServiceOptions::default())
    }

    pub fn shared(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.push(name, Some(HandlerKind::Shared), handler, ServiceOptions::default())
    }

    /// The workflow's main handler.
    pub fn run(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.push(name, Some(HandlerKind::Workflow), handler, ServiceOptions::default())
    }

    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_journal_retention(mut self, retention: Duration) -> Self {
        self.options.journal_retention = Some(retention);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = Some(policy);
        self
    }

    /// Documentation for the component, or for the last added handler with
    /// [`ComponentDefinition::with_handler_documentation`].
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    pub fn with_handler_documentation(mut self, documentation: impl Into<String>) -> Self {
        if let Some(last) = self.handlers.last_mut() {
            last.documentation = Some(documentation.into());
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn handlers(&self) -> &[HandlerDefinition] {
        &self.handlers
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn documentation(&self) -> Option<&str> {
        self.documentation.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn find_handler(&self, name: &str) -> Option<&HandlerDefinition> {
        self.handlers.iter().find(|h| h.name == name)
    }

    fn push(
        mut self,
        name: impl Into<String>,
        kind: Option<HandlerKind>,
        handler: Arc<dyn Handler>,
        options: ServiceOptions,
    ) -> Self {
        self.handlers.push(HandlerDefinition {
            name: name.into(),
            kind,
            handler,
            options,
            documentation: None,
            metadata: BTreeMap::new(),
        });
        self
    }

    /// Structural checks run at bind time.
    pub(crate) fn validate(&self) -> Result<(), String> {
        validate_name("component", &self.name)?;
        let mut seen = std::collections::HashSet::new();
        for handler in &self.handlers {
            validate_name("handler", &handler.name)?;
            if !seen.insert(handler.name.as_str()) {
                return Err(format!(
                    "handler '{}' is defined twice on '{}'",
                    handler.name, self.name
                ));
            }
            let allowed = match self.kind {
                ComponentKind::Service => handler.kind.is_none(),
                ComponentKind::VirtualObject => matches!(
                    handler.kind,
                    Some(HandlerKind::Exclusive) | Some(HandlerKind::Shared)
                ),
                ComponentKind::Workflow => matches!(
                    handler.kind,
                    Some(HandlerKind::Workflow) | Some(HandlerKind::Shared)
                ),
            };
            if !allowed {
                return Err(format!(
                    "handler '{}' of kind {:?} is not allowed on {:?} '{}'",
                    handler.name, handler.kind, self.kind, self.name
                ));
            }
        }
        if self.kind == ComponentKind::Workflow {
            let runs = self
                .handlers
                .iter()
                .filter(|h| h.kind == Some(HandlerKind::Workflow))
                .count();
            if runs != 1 {
                return Err(format!(
                    "workflow '{}' must have exactly one run handler, found {}",
                    self.name, runs
                ));
            }
        }
        Ok(())
    }
}

fn validate_name(what: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name must not be empty", what));
    }
    if name.contains('/') {
        return Err(format!("{} name '{}' must not contain '/'", what, name));
    }
    Ok(())
}
