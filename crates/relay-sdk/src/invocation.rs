// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-invocation execution.
//!
//! An [`InvocationDriver`] owns everything scoped to one invocation: the
//! message decoder over the inbound stream, the encoder over the outbound
//! stream and one [`SequentialQueue`]. None of it is shared with other
//! invocations.
//!
//! Stream shape:
//!
//! ```text
//! inbound:  Start ─ Input ─ (completions, side-effect results, ...)* ─ EOF
//! outbound: (messages sent by the handler)* ─ Output | Error ─ End
//! ```
//!
//! Inbound messages after `Input` are delivered to the handler through the
//! queue, so they interleave with queued handler work in arrival order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use relay_protocol::{Message, MessageCodec, MessageType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{HandlerError, Result, SdkError};
use crate::journal_codec::JournalValueCodec;
use crate::queue::{SequentialQueue, panic_message};
use crate::registry::{HandlerBinding, ServiceOptions};

struct ContextInner {
    invocation_id: Bytes,
    target: String,
    options: ServiceOptions,
    queue: SequentialQueue,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<Message>>,
}

/// Handle given to handler code for one invocation. Cheap to clone.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("target", &self.inner.target)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl InvocationContext {
    /// Payload of the `Start` message.
    pub fn invocation_id(&self) -> &Bytes {
        &self.inner.invocation_id
    }

    /// `<component>/<handler>` being invoked.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Effective options of the invoked handler.
    pub fn options(&self) -> &ServiceOptions {
        &self.inner.options
    }

    /// The invocation's sequential queue. Work that must reach the server in
    /// program order goes through here.
    pub fn queue(&self) -> &SequentialQueue {
        &self.inner.queue
    }

    /// Send a message to the server. Messages leave in the order sent.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.is_cancelled() {
            return Err(SdkError::Cancelled);
        }
        self.inner
            .outbound
            .send(message)
            .map_err(|_| SdkError::Internal("invocation output stream closed".to_string()))
    }

    /// Next inbound message after `Input`, or `None` once the server closed
    /// its side of the stream.
    pub async fn next_message(&self) -> Result<Option<Message>> {
        let mut inbound = self.inner.inbound.lock().await;
        let token = self.inner.queue.cancellation_token();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SdkError::Cancelled),
            message = inbound.recv() => Ok(message),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.queue.cancellation_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.queue.is_cancelled()
    }
}

/// How a driven invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The handler returned a value; `Output` was written
    Completed,
    /// The handler failed; `Error` was written
    Failed(HandlerError),
}

/// Runs one invocation of a resolved handler over a pair of byte streams.
pub struct InvocationDriver {
    binding: HandlerBinding,
    codec: Arc<dyn JournalValueCodec>,
    max_message_size: usize,
    token: CancellationToken,
}

impl InvocationDriver {
    /// `parent` cancels this invocation together with everything else
    /// derived from it.
    pub fn new(
        binding: HandlerBinding,
        codec: Arc<dyn JournalValueCodec>,
        max_message_size: usize,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            binding,
            codec,
            max_message_size,
            token: parent.child_token(),
        }
    }

    /// Cancelling this token aborts the invocation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[instrument(skip_all, fields(target = %self.binding.fully_qualified_name()))]
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<InvocationOutcome>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut inbound = FramedRead::new(reader, MessageCodec::new(self.max_message_size));
        let mut outbound = FramedWrite::new(writer, MessageCodec::new(self.max_message_size));

        let (start, input) = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(SdkError::Cancelled),
            head = read_head(&mut inbound) => head?,
        };
        let input = self.codec.decode(input.into_payload())?;
        debug!(input_size = input.len(), "Invocation started");

        let queue = SequentialQueue::with_cancellation(self.token.clone());
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let ctx = InvocationContext {
            inner: Arc::new(ContextInner {
                invocation_id: start.into_payload(),
                target: self.binding.fully_qualified_name(),
                options: self.binding.options().clone(),
                queue: queue.clone(),
                outbound: outbound_tx,
                inbound: Mutex::new(inbound_rx),
            }),
        };

        let handler = Arc::clone(self.binding.handler());
        let handler_run = AssertUnwindSafe(async move { handler.invoke(ctx, input).await })
            .catch_unwind();
        tokio::pin!(handler_run);

        let mut inbound_tx = Some(inbound_tx);
        let result = loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    queue.cancel();
                    debug!("Invocation cancelled");
                    return Err(SdkError::Cancelled);
                }
                result = &mut handler_run => {
                    break result.unwrap_or_else(|panic| {
                        Err(HandlerError::new(format!(
                            "handler panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                }
                Some(message) = outbound_rx.recv() => {
                    outbound.send(message).await?;
                }
                frame = inbound.next(), if inbound_tx.is_some() => match frame {
                    Some(Ok(message)) => {
                        trace!(message_type = ?message.message_type(), "Inbound message");
                        if let Some(tx) = inbound_tx.clone() {
                            queue.enqueue(move || async move {
                                // The handler may have stopped listening; that is not a failure.
                                let _ = tx.send(message);
                                Ok::<(), SdkError>(())
                            })?;
                        }
                    }
                    Some(Err(e)) => {
                        queue.cancel();
                        warn!(error = %e, "Inbound stream failed");
                        return Err(SdkError::Protocol(e));
                    }
                    None => {
                        // Close the mailbox only after every earlier delivery.
                        if let Some(tx) = inbound_tx.take() {
                            queue.enqueue(move || async move {
                                drop(tx);
                                Ok::<(), SdkError>(())
                            })?;
                        }
                    }
                },
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                queue.cancel();
                return Err(SdkError::Cancelled);
            }
            _ = queue.drain() => {}
        }
        while let Ok(message) = outbound_rx.try_recv() {
            outbound.send(message).await?;
        }

        let outcome = match result {
            Ok(output) => {
                let payload = self.codec.encode(output)?;
                outbound.send(Message::output(payload)?).await?;
                info!("Invocation completed");
                InvocationOutcome::Completed
            }
            Err(error) => {
                let payload = serde_json::to_vec(&error)
                    .map_err(|e| SdkError::Internal(format!("failed to serialize error: {}", e)))?;
                outbound.send(Message::error(payload)?).await?;
                warn!(code = error.code, error = %error.message, "Invocation failed");
                InvocationOutcome::Failed(error)
            }
        };
        outbound.send(Message::end()).await?;
        outbound.close().await?;
        Ok(outcome)
    }
}

async fn read_head<R>(frames: &mut FramedRead<R, MessageCodec>) -> Result<(Message, Message)>
where
    R: AsyncRead + Unpin,
{
    let start = expect(frames, MessageType::Start, "start").await?;
    let input = expect(frames, MessageType::Input, "input").await?;
    Ok((start, input))
}

async fn expect<R>(
    frames: &mut FramedRead<R, MessageCodec>,
    expected: MessageType,
    name: &'static str,
) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    match frames.next().await {
        Some(Ok(message)) if message.message_type() == expected => Ok(message),
        Some(Ok(message)) => Err(SdkError::UnexpectedMessage {
            expected: name,
            actual: Some(message.message_type()),
        }),
        Some(Err(e)) => Err(SdkError::Protocol(e)),
        None => Err(SdkError::UnexpectedMessage {
            expected: name,
            actual: None,
        }),
    }
}
