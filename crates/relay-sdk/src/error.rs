// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SDK-specific error types.

use relay_protocol::{CodecError, MessageType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::IdentityError;

/// Errors that can occur in the SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Configuration error (invalid option, malformed key material)
    #[error("configuration error: {0}")]
    Config(String),

    /// A component with the same name is already bound
    #[error("duplicate binding: '{0}' is already registered")]
    DuplicateBinding(String),

    /// No component/handler matches the requested name
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Request identity could not be established
    #[error("authentication failed: {0}")]
    Identity(#[from] IdentityError),

    /// Framing error on the message stream
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// The peer sent a message that is not valid at this point of the stream
    #[error("unexpected message: expected {expected}, got {actual:?}")]
    UnexpectedMessage {
        /// What the invocation was waiting for
        expected: &'static str,
        /// What arrived instead (`None` for end of stream)
        actual: Option<MessageType>,
    },

    /// Journal value codec failed to transform a payload
    #[error("journal codec error: {0}")]
    JournalCodec(String),

    /// Invocation was cancelled
    #[error("invocation cancelled")]
    Cancelled,

    /// Transport IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal SDK error
    #[error("internal error: {0}")]
    Internal(String),
}

impl SdkError {
    /// Stable code for logs and rejection responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::DuplicateBinding(_) => "DUPLICATE_BINDING",
            Self::UnknownTarget(_) => "UNKNOWN_TARGET",
            Self::Identity(_) => "UNAUTHORIZED",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::UnexpectedMessage { .. } => "PROTOCOL_ERROR",
            Self::JournalCodec(_) => "JOURNAL_CODEC_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Type alias for SDK results.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Failure returned by user handler code.
///
/// Serialized as JSON into the payload of an Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("handler failed ({code}): {message}")]
pub struct HandlerError {
    pub code: u16,
    pub message: String,
}

impl HandlerError {
    pub const DEFAULT_CODE: u16 = 500;

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: Self::DEFAULT_CODE,
            message: message.into(),
        }
    }

    pub fn with_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<SdkError> for HandlerError {
    fn from(err: SdkError) -> Self {
        HandlerError::new(err.to_string())
    }
}
