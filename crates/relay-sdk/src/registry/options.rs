// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cascading service options.
//!
//! The same option set is accepted at three levels. The most specific level
//! that sets an option wins: handler, then component, then endpoint default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Content type used when no level configures one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// What the server does once a retry policy runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMaxAttempts {
    Kill,
    Pause,
}

/// Retry policy for failed invocations. Unset fields use server defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Option<Duration>,
    pub exponentiation_factor: Option<f64>,
    pub max_interval: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub on_max_attempts: Option<OnMaxAttempts>,
}

impl RetryPolicy {
    fn merged_over(&self, lower: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            initial_interval: self.initial_interval.or(lower.initial_interval),
            exponentiation_factor: self.exponentiation_factor.or(lower.exponentiation_factor),
            max_interval: self.max_interval.or(lower.max_interval),
            max_attempts: self.max_attempts.or(lower.max_attempts),
            on_max_attempts: self.on_max_attempts.or(lower.on_max_attempts),
        }
    }
}

/// Options for a component or handler. `None` means "not set at this level".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceOptions {
    pub input_content_type: Option<String>,
    pub output_content_type: Option<String>,
    pub journal_retention: Option<Duration>,
    pub idempotency_retention: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub abort_timeout: Option<Duration>,
    pub ingress_private: Option<bool>,
    pub enable_lazy_state: Option<bool>,
    pub retry_policy: Option<RetryPolicy>,
    /// Only meaningful for workflows
    pub workflow_retention: Option<Duration>,
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.input_content_type = Some(content_type.into());
        self
    }

    pub fn with_output_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.output_content_type = Some(content_type.into());
        self
    }

    pub fn with_journal_retention(mut self, retention: Duration) -> Self {
        self.journal_retention = Some(retention);
        self
    }

    pub fn with_idempotency_retention(mut self, retention: Duration) -> Self {
        self.idempotency_retention = Some(retention);
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = Some(timeout);
        self
    }

    pub fn with_ingress_private(mut self, private: bool) -> Self {
        self.ingress_private = Some(private);
        self
    }

    pub fn with_enable_lazy_state(mut self, lazy: bool) -> Self {
        self.enable_lazy_state = Some(lazy);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_workflow_retention(mut self, retention: Duration) -> Self {
        self.workflow_retention = Some(retention);
        self
    }

    /// Fill every option unset here from `lower`. Retry policies merge field
    /// by field.
    pub fn merged_over(&self, lower: &ServiceOptions) -> ServiceOptions {
        ServiceOptions {
            input_content_type: self
                .input_content_type
                .clone()
                .or_else(|| lower.input_content_type.clone()),
            output_content_type: self
                .output_content_type
                .clone()
                .or_else(|| lower.output_content_type.clone()),
            journal_retention: self.journal_retention.or(lower.journal_retention),
            idempotency_retention: self.idempotency_retention.or(lower.idempotency_retention),
            inactivity_timeout: self.inactivity_timeout.or(lower.inactivity_timeout),
            abort_timeout: self.abort_timeout.or(lower.abort_timeout),
            ingress_private: self.ingress_private.or(lower.ingress_private),
            enable_lazy_state: self.enable_lazy_state.or(lower.enable_lazy_state),
            retry_policy: match (&self.retry_policy, &lower.retry_policy) {
                (Some(upper), Some(lower)) => Some(upper.merged_over(lower)),
                (upper, lower) => upper.clone().or_else(|| lower.clone()),
            },
            workflow_retention: self.workflow_retention.or(lower.workflow_retention),
        }
    }

    /// Input content type, falling back to JSON.
    pub fn input_content_type_or_default(&self) -> &str {
        self.input_content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Output content type, falling back to JSON.
    pub fn output_content_type_or_default(&self) -> &str {
        self.output_content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}
