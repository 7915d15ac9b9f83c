// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Relay Protocol - message framing for durable invocation streams
//!
//! This crate turns the byte stream exchanged between the orchestrating
//! server and a relay endpoint into discrete protocol messages and back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    relay-protocol                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Messages: type tag + flags + opaque journal payload        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: 8 byte header, incremental decoder (tokio-util)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: any ordered byte stream (not handled here)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Push-style chunks
//!
//! ```ignore
//! use relay_protocol::{Message, MessageDecoder, encode};
//!
//! let mut decoder = MessageDecoder::new();
//! for chunk in body_chunks {
//!     for message in decoder.decode(&chunk)? {
//!         handle(message);
//!     }
//! }
//! decoder.finish()?; // fails on a truncated trailing message
//! ```
//!
//! ## Async streams
//!
//! ```ignore
//! use futures::StreamExt;
//! use tokio_util::codec::FramedRead;
//! use relay_protocol::MessageCodec;
//!
//! let mut messages = FramedRead::new(reader, MessageCodec::default());
//! while let Some(message) = messages.next().await {
//!     let message = message?;
//! }
//! ```

pub mod codec;
pub mod message;

/// Lowest protocol version this crate speaks.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Highest protocol version this crate speaks.
pub const MAX_PROTOCOL_VERSION: u32 = 1;

pub use codec::{
    CodecError, HEADER_SIZE, MAX_MESSAGE_SIZE, MessageCodec, MessageDecoder, MessageHeader,
    decode_stream, encode,
};
pub use message::{CUSTOM_MESSAGE_RANGE_START, Message, MessageFlags, MessageType};
