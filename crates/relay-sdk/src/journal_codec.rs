// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pluggable transform for journal-bound payloads (encryption, compression).
//!
//! The provider is asked for a codec exactly once, when the endpoint is
//! built; that single instance is shared by every invocation.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Transform applied to handler input (decode) and output (encode).
pub trait JournalValueCodec: Send + Sync {
    fn encode(&self, value: Bytes) -> Result<Bytes>;

    fn decode(&self, value: Bytes) -> Result<Bytes>;
}

/// Factory for the endpoint's [`JournalValueCodec`].
pub trait JournalValueCodecProvider: Send + Sync {
    fn create(&self) -> Result<Arc<dyn JournalValueCodec>>;
}

/// Passes payloads through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl JournalValueCodec for IdentityCodec {
    fn encode(&self, value: Bytes) -> Result<Bytes> {
        Ok(value)
    }

    fn decode(&self, value: Bytes) -> Result<Bytes> {
        Ok(value)
    }
}

impl<F> JournalValueCodecProvider for F
where
    F: Fn() -> Result<Arc<dyn JournalValueCodec>> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn JournalValueCodec>> {
        self()
    }
}
