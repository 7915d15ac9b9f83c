// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Externally settled futures.
//!
//! Bridges push-style callbacks (a message arriving from the network, a queued
//! task finishing) into values that async code can await. A promise is settled
//! at most once; the first `resolve`/`reject`/`cancel` wins and later calls
//! return [`AlreadySettled`] without touching the stored outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

/// Why a promise did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromiseError<E> {
    /// Settled with an error
    #[error("rejected: {0}")]
    Rejected(E),

    /// The task producing the value panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Cancelled, or every completer was dropped without settling
    #[error("cancelled")]
    Cancelled,
}

impl<E> PromiseError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PromiseError::Cancelled)
    }

    /// The rejection value, if this is a rejection.
    pub fn into_rejection(self) -> Option<E> {
        match self {
            PromiseError::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

/// Returned by a second attempt to settle a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise already settled")]
pub struct AlreadySettled;

type Outcome<T, E> = Result<T, PromiseError<E>>;

/// Settling side of a [`CompletablePromise`]. Cheap to clone.
pub struct Completer<T, E> {
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome<T, E>>>>>,
}

impl<T, E> Clone for Completer<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T, E> std::fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T, E> Completer<T, E> {
    pub fn resolve(&self, value: T) -> Result<(), AlreadySettled> {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: E) -> Result<(), AlreadySettled> {
        self.settle(Err(PromiseError::Rejected(error)))
    }

    /// Settle with [`PromiseError::Cancelled`] so the awaiting side does not hang.
    pub fn cancel(&self) -> Result<(), AlreadySettled> {
        self.settle(Err(PromiseError::Cancelled))
    }

    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    pub(crate) fn settle(&self, outcome: Outcome<T, E>) -> Result<(), AlreadySettled> {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(AlreadySettled)?;
        // The awaiting side may be gone already; settling still counts.
        let _ = sender.send(outcome);
        Ok(())
    }
}

/// A future resolved or rejected from outside.
///
/// ```ignore
/// let (completer, promise) = CompletablePromise::<u32, String>::new();
/// tokio::spawn(async move { completer.resolve(42) });
/// assert_eq!(promise.await, Ok(42));
/// ```
#[must_use = "a promise does nothing unless awaited"]
pub struct CompletablePromise<T, E> {
    receiver: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> std::fmt::Debug for CompletablePromise<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletablePromise").finish_non_exhaustive()
    }
}

impl<T, E> CompletablePromise<T, E> {
    /// Create a pending promise together with its first completer.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Completer<T, E>, CompletablePromise<T, E>) {
        let (sender, receiver) = oneshot::channel();
        let completer = Completer {
            slot: Arc::new(Mutex::new(Some(sender))),
        };
        (completer, CompletablePromise { receiver })
    }

    /// A promise that is already resolved.
    pub fn resolved(value: T) -> Self {
        let (completer, promise) = Self::new();
        let _ = completer.resolve(value);
        promise
    }

    /// A promise that is already cancelled.
    pub fn cancelled() -> Self {
        let (completer, promise) = Self::new();
        let _ = completer.cancel();
        promise
    }
}

impl<T, E> Future for CompletablePromise<T, E> {
    type Output = Outcome<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PromiseError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
