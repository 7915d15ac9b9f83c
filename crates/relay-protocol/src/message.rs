// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol message model.
//!
//! A [`Message`] is the unit exchanged between the orchestrating server and an
//! endpoint: a type tag, a flag bitset and an opaque payload. The payload is
//! owned by the journal layer; this crate never looks inside it.

use std::fmt;

use bytes::Bytes;

use crate::codec::{CodecError, MAX_MESSAGE_SIZE};

/// First id of the custom (SDK-defined) message range.
pub const CUSTOM_MESSAGE_RANGE_START: u16 = 0xFC00;

/// Message types for the invocation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Start of an invocation
    Start,
    /// Completion of a previously issued journal entry
    Completion,
    /// Invocation suspended, waiting on completions
    Suspension,
    /// Terminal or transient failure
    Error,
    /// End of the outbound stream
    End,
    /// Handler input
    Input,
    /// Handler output
    Output,
    /// Sleep completion
    Sleep,
    /// Result of a call to another handler
    Call,
    /// Awakeable completion
    Awakeable,
    /// Side-effect result
    SideEffect,
    /// Any other id in the custom range (`0xFC00..=0xFFFF`)
    Custom(u16),
}

impl MessageType {
    /// Numeric id written in the header.
    pub fn id(self) -> u16 {
        match self {
            MessageType::Start => 0x0000,
            MessageType::Completion => 0x0001,
            MessageType::Suspension => 0x0002,
            MessageType::Error => 0x0003,
            MessageType::End => 0x0005,
            MessageType::Input => 0x0400,
            MessageType::Output => 0x0401,
            MessageType::Sleep => 0x0C00,
            MessageType::Call => 0x0C01,
            MessageType::Awakeable => 0x0C03,
            MessageType::SideEffect => 0xFC01,
            MessageType::Custom(id) => id,
        }
    }

    /// Build a custom message type, rejecting ids outside the custom range.
    pub fn custom(id: u16) -> Result<Self, CodecError> {
        match MessageType::try_from(id)? {
            MessageType::Custom(id) => Ok(MessageType::Custom(id)),
            _ => Err(CodecError::InvalidMessageType(id)),
        }
    }

    /// Whether this message carries a result that completes a pending entry.
    pub fn is_completion(self) -> bool {
        matches!(
            self,
            MessageType::Completion
                | MessageType::Sleep
                | MessageType::Call
                | MessageType::Awakeable
                | MessageType::SideEffect
        )
    }
}

impl TryFrom<u16> for MessageType {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            0x0000 => Ok(MessageType::Start),
            0x0001 => Ok(MessageType::Completion),
            0x0002 => Ok(MessageType::Suspension),
            0x0003 => Ok(MessageType::Error),
            0x0005 => Ok(MessageType::End),
            0x0400 => Ok(MessageType::Input),
            0x0401 => Ok(MessageType::Output),
            0x0C00 => Ok(MessageType::Sleep),
            0x0C01 => Ok(MessageType::Call),
            0x0C03 => Ok(MessageType::Awakeable),
            0xFC01 => Ok(MessageType::SideEffect),
            id if id >= CUSTOM_MESSAGE_RANGE_START => Ok(MessageType::Custom(id)),
            _ => Err(CodecError::InvalidMessageType(value)),
        }
    }
}

/// Bitset modifying how a message is interpreted.
///
/// Bits this crate does not know about are carried through untouched.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags(u16);

impl MessageFlags {
    pub const NONE: MessageFlags = MessageFlags(0);
    /// The entry already carries its result.
    pub const COMPLETED: MessageFlags = MessageFlags(0x0001);
    /// Start message announces a partial state snapshot.
    pub const PARTIAL_STATE: MessageFlags = MessageFlags(0x0400);
    /// The peer must acknowledge this message.
    pub const REQUIRES_ACK: MessageFlags = MessageFlags(0x8000);

    pub const fn from_bits(bits: u16) -> Self {
        MessageFlags(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: MessageFlags) -> Self {
        MessageFlags(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = MessageFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageFlags({:#06x})", self.0)
    }
}

/// A decoded protocol message.
///
/// The payload length is always the length of `payload`; messages are
/// immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    flags: MessageFlags,
    payload: Bytes,
}

impl Message {
    /// Create a message, validating the type id and payload size.
    pub fn new(
        message_type: MessageType,
        flags: MessageFlags,
        payload: impl Into<Bytes>,
    ) -> Result<Self, CodecError> {
        let payload = payload.into();
        // Custom(id) can be built directly with an id that is out of range or
        // taken by a known type; either would not decode back to itself.
        if MessageType::try_from(message_type.id())? != message_type {
            return Err(CodecError::InvalidMessageType(message_type.id()));
        }
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(Self {
            message_type,
            flags,
            payload,
        })
    }

    /// Assemble a message from an already validated header and payload.
    pub(crate) fn from_parts(message_type: MessageType, flags: MessageFlags, payload: Bytes) -> Self {
        Self {
            message_type,
            flags,
            payload,
        }
    }

    /// Start message opening an invocation.
    pub fn start(payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        Self::new(MessageType::Start, MessageFlags::NONE, payload)
    }

    /// Input message carrying the handler argument.
    pub fn input(payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        Self::new(MessageType::Input, MessageFlags::COMPLETED, payload)
    }

    /// Output message carrying the handler result.
    pub fn output(payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        Self::new(MessageType::Output, MessageFlags::NONE, payload)
    }

    /// Error message carrying a serialized failure.
    pub fn error(payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        Self::new(MessageType::Error, MessageFlags::NONE, payload)
    }

    /// End-of-stream marker.
    pub fn end() -> Self {
        Self::from_parts(MessageType::End, MessageFlags::NONE, Bytes::new())
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload byte count as written in the header.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
