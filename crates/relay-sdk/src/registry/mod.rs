// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handler registry and option resolution.
//!
//! A [`Registry`] is an explicit value owned by whoever builds the endpoint;
//! there is no process-wide registry. Tests build as many as they like.
//!
//! Options cascade from three levels, most specific first:
//!
//! ```text
//! handler options ─▶ component options ─▶ endpoint defaults ─▶ built-in defaults
//! ```

mod component;
mod discovery;
mod options;

use std::sync::{Arc, OnceLock};

use tracing::debug;

pub use component::{
    ComponentDefinition, ComponentKind, Handler, HandlerDefinition, HandlerKind, handler_fn,
};
pub use discovery::{
    DiscoveryManifest, HandlerManifest, InputPayload, ManifestOptions, OutputPayload,
    ProtocolMode, ServiceManifest,
};
pub use options::{DEFAULT_CONTENT_TYPE, OnMaxAttempts, RetryPolicy, ServiceOptions};

use crate::error::{Result, SdkError};

/// A resolved handler: everything needed to run one invocation of it.
#[derive(Clone)]
pub struct HandlerBinding {
    component: String,
    component_kind: ComponentKind,
    handler: String,
    handler_kind: Option<HandlerKind>,
    logic: Arc<dyn Handler>,
    options: ServiceOptions,
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("component", &self.component)
            .field("handler", &self.handler)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl HandlerBinding {
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn component_kind(&self) -> ComponentKind {
        self.component_kind
    }

    pub fn handler_name(&self) -> &str {
        &self.handler
    }

    pub fn handler_kind(&self) -> Option<HandlerKind> {
        self.handler_kind
    }

    /// `<component>/<handler>`
    pub fn fully_qualified_name(&self) -> String {
        format!("{}/{}", self.component, self.handler)
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.logic
    }

    /// Effective options after handler > component > endpoint resolution.
    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }
}

/// Bound components and endpoint-level defaults.
#[derive(Debug, Default)]
pub struct Registry {
    components: Vec<ComponentDefinition>,
    defaults: ServiceOptions,
    protocol_mode: ProtocolMode,
    manifest: OnceLock<Arc<DiscoveryManifest>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Registry::bind`].
    pub fn with_component(mut self, definition: ComponentDefinition) -> Result<Self> {
        self.bind(definition)?;
        Ok(self)
    }

    /// Register a component. A name that is already bound is an error and
    /// the existing binding stays in place.
    pub fn bind(&mut self, definition: ComponentDefinition) -> Result<()> {
        definition.validate().map_err(SdkError::Config)?;
        if self.component(&definition.name).is_some() {
            return Err(SdkError::DuplicateBinding(definition.name));
        }
        debug!(
            component = %definition.name,
            kind = ?definition.kind,
            handlers = definition.handlers.len(),
            "Bound component"
        );
        self.components.push(definition);
        self.manifest.take();
        Ok(())
    }

    /// Set the endpoint-level defaults every component inherits.
    pub fn apply_options(&mut self, defaults: ServiceOptions) {
        self.defaults = defaults;
        self.manifest.take();
    }

    pub fn set_protocol_mode(&mut self, mode: ProtocolMode) {
        self.protocol_mode = mode;
        self.manifest.take();
    }

    pub fn protocol_mode(&self) -> ProtocolMode {
        self.protocol_mode
    }

    pub fn defaults(&self) -> &ServiceOptions {
        &self.defaults
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDefinition> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Components in binding order.
    pub fn components(&self) -> impl Iterator<Item = &ComponentDefinition> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Look up `<component>/<handler>`.
    pub fn resolve(&self, fully_qualified_name: &str) -> Result<HandlerBinding> {
        let (component, handler) = fully_qualified_name
            .split_once('/')
            .ok_or_else(|| SdkError::UnknownTarget(fully_qualified_name.to_string()))?;
        self.resolve_handler(component, handler)
    }

    pub fn resolve_handler(&self, component: &str, handler: &str) -> Result<HandlerBinding> {
        let unknown = || SdkError::UnknownTarget(format!("{}/{}", component, handler));
        let definition = self.component(component).ok_or_else(unknown)?;
        let handler_def = definition.find_handler(handler).ok_or_else(unknown)?;
        let component_options = definition.options.merged_over(&self.defaults);
        Ok(HandlerBinding {
            component: definition.name.clone(),
            component_kind: definition.kind,
            handler: handler_def.name.clone(),
            handler_kind: handler_def.kind,
            logic: Arc::clone(&handler_def.handler),
            options: handler_def.options.merged_over(&component_options),
        })
    }

    /// Manifest of every bound component with resolved options. Cached until
    /// the next `bind`, `apply_options` or `set_protocol_mode`.
    pub fn discovery_manifest(&self) -> Arc<DiscoveryManifest> {
        Arc::clone(self.manifest.get_or_init(|| Arc::new(self.build_manifest())))
    }

    fn build_manifest(&self) -> DiscoveryManifest {
        let services = self
            .components
            .iter()
            .map(|component| {
                let component_options = component.options.merged_over(&self.defaults);
                let handlers = component
                    .handlers
                    .iter()
                    .map(|handler| {
                        let resolved = handler.options.merged_over(&component_options);
                        HandlerManifest {
                            name: handler.name.clone(),
                            ty: handler.kind,
                            input: InputPayload {
                                content_type: resolved.input_content_type_or_default().to_string(),
                                required: false,
                            },
                            output: OutputPayload {
                                content_type: resolved
                                    .output_content_type_or_default()
                                    .to_string(),
                                set_content_type_if_empty: false,
                            },
                            documentation: handler.documentation.clone(),
                            metadata: handler.metadata.clone(),
                            options: ManifestOptions::from_options(&resolved),
                        }
                    })
                    .collect();
                ServiceManifest {
                    name: component.name.clone(),
                    ty: component.kind,
                    handlers,
                    documentation: component.documentation.clone(),
                    metadata: component.metadata.clone(),
                    options: ManifestOptions::from_options(&component_options),
                }
            })
            .collect();

        DiscoveryManifest {
            protocol_mode: self.protocol_mode,
            min_protocol_version: relay_protocol::MIN_PROTOCOL_VERSION,
            max_protocol_version: relay_protocol::MAX_PROTOCOL_VERSION,
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn echo() -> Arc<dyn Handler> {
        handler_fn(|_ctx, input| async move { Ok(input) })
    }

    #[test]
    fn test_resolve_splits_name() {
        let registry = Registry::new()
            .with_component(ComponentDefinition::service("Greeter").handler("greet", echo()))
            .unwrap();
        let binding = registry.resolve("Greeter/greet").unwrap();
        assert_eq!(binding.fully_qualified_name(), "Greeter/greet");
        assert_eq!(binding.component_kind(), ComponentKind::Service);
        assert!(matches!(
            registry.resolve("Greeter"),
            Err(SdkError::UnknownTarget(name)) if name == "Greeter"
        ));
    }

    #[test]
    fn test_manifest_cache_reused_until_invalidated() {
        let mut registry = Registry::new();
        registry
            .bind(ComponentDefinition::service("A").handler("h", echo()))
            .unwrap();
        let first = registry.discovery_manifest();
        let again = registry.discovery_manifest();
        assert!(Arc::ptr_eq(&first, &again));

        registry.apply_options(ServiceOptions::new().with_abort_timeout(Duration::from_secs(3)));
        let after = registry.discovery_manifest();
        assert!(!Arc::ptr_eq(&first, &after));
        assert_eq!(after.services[0].options.abort_timeout, Some(3000));
    }

    #[test]
    fn test_invalid_definition_is_config_error() {
        let mut registry = Registry::new();
        let err = registry
            .bind(ComponentDefinition::service("bad/name").handler("h", echo()))
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(registry.is_empty());
    }
}
