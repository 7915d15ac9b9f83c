// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for invocation streams.
//!
//! Every message is written as a fixed 8 byte header followed by the payload:
//! - 2 bytes: message type (big-endian)
//! - 2 bytes: flags (big-endian)
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload
//!
//! The decoder is incremental: chunk boundaries may fall anywhere, including
//! inside the header. A framing error terminates the stream; the decoder
//! refuses every later call instead of trying to resynchronize.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::Stream;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::{debug, trace};

use crate::message::{Message, MessageFlags, MessageType};

/// Maximum payload size (64 MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Header size (2 bytes type + 2 bytes flags + 4 bytes length)
pub const HEADER_SIZE: usize = 8;

/// Errors that can occur during message encoding/decoding
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid message type: {0:#06x}")]
    InvalidMessageType(u16),

    #[error("truncated message: stream ended with {buffered} unconsumed bytes")]
    Truncated { buffered: usize },

    #[error("stream terminated by an earlier framing error")]
    Terminated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether the error came from the byte stream rather than the framing.
    pub fn is_io(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }
}

/// Fixed-size message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub flags: MessageFlags,
    pub length: u32,
}

impl MessageHeader {
    /// Parse a header from exactly [`HEADER_SIZE`] bytes.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, CodecError> {
        let message_type = MessageType::try_from(u16::from_be_bytes([bytes[0], bytes[1]]))?;
        let flags = MessageFlags::from_bits(u16::from_be_bytes([bytes[2], bytes[3]]));
        let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self {
            message_type,
            flags,
            length,
        })
    }

    pub fn write(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.message_type.id());
        dst.put_u16(self.flags.bits());
        dst.put_u32(self.length);
    }

    pub fn of(message: &Message) -> Self {
        Self {
            message_type: message.message_type(),
            flags: message.flags(),
            length: message.len() as u32,
        }
    }
}

/// Encode a single message to bytes for wire transmission.
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + message.len());
    MessageHeader::of(message).write(&mut buf);
    buf.put_slice(message.payload());
    buf.freeze()
}

/// Stateful codec usable with `FramedRead`/`FramedWrite`.
///
/// Keeps the parsed header between calls so a payload split across many
/// reads is only validated once.
#[derive(Debug)]
pub struct MessageCodec {
    max_message_size: usize,
    pending: Option<MessageHeader>,
    terminated: bool,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            pending: None,
            terminated: false,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Whether a fatal error already ended this stream.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn check_size(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn decode_next(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                let Some(raw) = src.get(..HEADER_SIZE) else {
                    src.reserve(HEADER_SIZE - src.len());
                    return Ok(None);
                };
                let mut bytes = [0u8; HEADER_SIZE];
                bytes.copy_from_slice(raw);
                let header = MessageHeader::parse(&bytes)?;
                self.check_size(header.length as usize)?;
                src.advance(HEADER_SIZE);
                self.pending = Some(header);
                header
            }
        };

        let length = header.length as usize;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(length).freeze();
        trace!(
            message_type = ?header.message_type,
            flags = ?header.flags,
            length,
            "Decoded message"
        );
        Ok(Some(Message::from_parts(
            header.message_type,
            header.flags,
            payload,
        )))
    }

    /// Bytes held by the codec itself (a parsed but unconsumed header).
    fn held(&self) -> usize {
        if self.pending.is_some() { HEADER_SIZE } else { 0 }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if self.terminated {
            return Err(CodecError::Terminated);
        }
        let result = self.decode_next(src);
        if let Err(e) = &result {
            debug!(error = %e, "Terminating message stream");
            self.terminated = true;
        }
        result
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        let buffered = src.len() + self.held();
        if buffered == 0 {
            return Ok(None);
        }
        debug!(buffered, "Message stream ended mid-message");
        self.terminated = true;
        Err(CodecError::Truncated { buffered })
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_size(item.len())?;
        dst.reserve(HEADER_SIZE + item.len());
        MessageHeader::of(&item).write(dst);
        dst.put_slice(item.payload());
        Ok(())
    }
}

/// Push-style decoder for transports that hand over arbitrary byte chunks.
///
/// Created once per stream and discarded when the stream closes; it cannot be
/// rewound.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    codec: MessageCodec,
    buffer: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            codec: MessageCodec::new(max_message_size),
            buffer: BytesMut::new(),
        }
    }

    /// Append a chunk and return every message it completes, in order.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Message>, CodecError> {
        if self.codec.is_terminated() {
            return Err(CodecError::Terminated);
        }
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(message) = self.codec.decode(&mut self.buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Number of bytes belonging to a message that is not complete yet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.codec.held()
    }

    /// Signal end of stream; fails if a partial message is left over.
    pub fn finish(mut self) -> Result<(), CodecError> {
        match self.codec.decode_eof(&mut self.buffer)? {
            // decode() always drains complete messages, so nothing can be left here.
            Some(_) => Err(CodecError::Truncated {
                buffered: self.buffer.len(),
            }),
            None => Ok(()),
        }
    }
}

/// Adapt a stream of byte chunks into a stream of messages.
pub fn decode_stream<S, B, E>(
    chunks: S,
    max_message_size: usize,
) -> FramedRead<StreamReader<S, B>, MessageCodec>
where
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: Into<std::io::Error>,
{
    FramedRead::new(StreamReader::new(chunks), MessageCodec::new(max_message_size))
}
