// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sequential execution queue.
//!
//! One queue exists per invocation. Tasks run strictly one after another in
//! submission order: task N+1 starts only after task N has settled, whether it
//! succeeded, failed or panicked. This keeps side effects and replayed journal
//! entries in the order the handler issued them even though the runtime may
//! interleave unrelated work.
//!
//! The runner is a plain loop over a channel:
//!
//! ```text
//! idle ──job──▶ running ──await──▶ settled ──▶ idle
//!   ▲                                            │
//!   └──────────────── next job ◀─────────────────┘
//! ```
//!
//! Failures of fire-and-forget tasks ([`SequentialQueue::enqueue`]) are logged
//! and the latest one is kept for diagnostics ([`SequentialQueue::last_error`]).
//! Failures of awaited tasks ([`SequentialQueue::enqueue_and_await`]) are
//! delivered only to the awaiting caller.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, SdkError};
use crate::promise::{CompletablePromise, PromiseError};

type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, Option<String>> + Send>;

enum Job {
    Task { id: u64, run: TaskFn },
    Barrier(oneshot::Sender<()>),
}

struct Shared {
    token: CancellationToken,
    last_error: Mutex<Option<String>>,
    pending: AtomicUsize,
    next_id: AtomicU64,
}

/// Handle to a per-invocation FIFO task runner. Clones share the same queue.
#[derive(Clone)]
pub struct SequentialQueue {
    sender: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SequentialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialQueue")
            .field("pending", &self.pending())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl SequentialQueue {
    /// Create a queue and spawn its runner on the current tokio runtime.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a queue cancelled together with `parent`.
    pub fn with_cancellation(parent: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            token: parent.child_token(),
            last_error: Mutex::new(None),
            pending: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        });
        tokio::spawn(run(receiver, Arc::clone(&shared)));
        Self { sender, shared }
    }

    /// Run `task` after everything enqueued before it. Failures are logged,
    /// not returned.
    pub fn enqueue<F, Fut, E>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.submit(Box::new(move || {
            async move {
                match AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(panic) => Some(format!("task panicked: {}", panic_message(&*panic))),
                }
            }
            .boxed()
        }))
    }

    /// Run `task` after everything enqueued before it and return a promise
    /// settled with its outcome.
    ///
    /// If the queue is already cancelled the returned promise is settled with
    /// [`PromiseError::Cancelled`].
    pub fn enqueue_and_await<F, Fut, T, E>(&self, task: F) -> CompletablePromise<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (completer, promise) = CompletablePromise::new();
        let submitted = self.submit(Box::new(move || {
            async move {
                let outcome = match AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(PromiseError::Rejected(e)),
                    Err(panic) => Err(PromiseError::Panicked(panic_message(&*panic))),
                };
                let _ = completer.settle(outcome);
                None
            }
            .boxed()
        }));
        if let Err(SdkError::Internal(reason)) = submitted {
            warn!(reason = %reason, "Queued task was not accepted");
        }
        // A rejected job is dropped with its completer, which cancels the promise.
        promise
    }

    /// Resolves once every task enqueued before this call has settled.
    ///
    /// The barrier is placed at call time, not when the future is first polled.
    pub fn drain(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done, wait) = oneshot::channel();
        let _ = self.sender.send(Job::Barrier(done));
        async move {
            let _ = wait.await;
        }
    }

    /// Stop the queue: refuse new tasks, let the running task finish and skip
    /// the rest. Promises of skipped tasks are cancelled without waiting for
    /// the running task.
    pub fn cancel(&self) {
        if !self.shared.token.is_cancelled() {
            debug!(pending = self.pending(), "Cancelling sequential queue");
        }
        self.shared.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Token tasks can watch to stop cooperatively.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Number of tasks enqueued but not yet settled.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Message of the most recent fire-and-forget task failure.
    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn submit(&self, run: TaskFn) -> Result<()> {
        if self.shared.token.is_cancelled() {
            return Err(SdkError::Cancelled);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Job::Task { id, run }).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(SdkError::Internal("sequential queue runner stopped".to_string()));
        }
        Ok(())
    }
}

impl Default for SequentialQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut jobs: mpsc::UnboundedReceiver<Job>, shared: Arc<Shared>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Task { id, run } if !shared.token.is_cancelled() => {
                trace!(task_id = id, "Running queued task");
                if let Some(error) = settle_running(run(), &mut jobs, &shared).await {
                    warn!(task_id = id, error = %error, "Queued task failed");
                    *shared
                        .last_error
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
                }
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            job => discard(job, &shared),
        }
    }
    trace!("Sequential queue runner stopped");
}

/// Drive the running task to completion. If the queue is cancelled meanwhile,
/// jobs queued behind it are discarded as they arrive so their promises settle
/// without waiting for the task. Barriers are held until the task settles.
async fn settle_running(
    mut task: BoxFuture<'static, Option<String>>,
    jobs: &mut mpsc::UnboundedReceiver<Job>,
    shared: &Shared,
) -> Option<String> {
    tokio::select! {
        biased;
        outcome = &mut task => return outcome,
        () = shared.token.cancelled() => {}
    }

    debug!("Queue cancelled while a task is running, discarding queued tasks");
    let mut barriers = Vec::new();
    let mut open = true;
    let outcome = loop {
        tokio::select! {
            biased;
            outcome = &mut task => break outcome,
            job = jobs.recv(), if open => match job {
                Some(Job::Barrier(done)) => barriers.push(done),
                Some(job) => discard(job, shared),
                None => open = false,
            },
        }
    };
    for done in barriers {
        let _ = done.send(());
    }
    outcome
}

fn discard(job: Job, shared: &Shared) {
    match job {
        Job::Barrier(done) => {
            let _ = done.send(());
        }
        Job::Task { id, run } => {
            trace!(task_id = id, "Skipping task of cancelled queue");
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            // Dropping the job drops its completer, which cancels the promise.
            drop(run);
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
