//! The future returned by [`SerializedQueue::submit`](crate::SerializedQueue::submit).
//!
//! A `Submission` is the submitter's view of its completion slot. Polling it
//! also drives the queue, so bodies make progress as long as someone awaits a
//! submission of that queue.
//!
//! This module also provides `SubmissionHandle`, which cancels a submission
//! without owning it.
use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    channel::oneshot::{self, Receiver},
    future::FusedFuture,
};

use crate::{
    TaskError,
    body::Outcome,
    queue::{Shared, Signal, Step, Withdrawal},
};

/// A handle for canceling a submitted task.
///
/// Obtained by calling [`Submission::handle`]. Canceling has the same effect
/// as dropping the submission, except that the submission itself resolves with
/// [`TaskError::Canceled`]:
/// - If the body has **not been invoked**, it never will be.
/// - If the body is **running**, it is dropped at its next poll and the queue
///   moves on to the next task.
/// - If the task has **already completed**, calling `cancel()` has no effect.
#[derive(Clone)]
pub struct SubmissionHandle {
    signal: Arc<Signal>,
}

impl SubmissionHandle {
    /// Cancels the task.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Returns `true` if [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.signal.is_canceled()
    }
}

impl fmt::Debug for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionHandle")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// A task waiting its turn in a [`SerializedQueue`](crate::SerializedQueue).
///
/// Resolves to the body's value, or to a [`TaskError`]. Dropping an
/// unresolved `Submission` cancels its task.
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Submission<T, E> {
    id: u64,
    shared: Arc<Shared<T, E>>,
    receiver: Receiver<Outcome<T, E>>,
    signal: Arc<Signal>,
    // Set once this submission polled a body; it may then hold the drainer role.
    drove: bool,
    terminated: bool,
}

impl<T, E> Submission<T, E> {
    pub(crate) fn new(
        id: u64,
        shared: Arc<Shared<T, E>>,
        receiver: Receiver<Outcome<T, E>>,
        signal: Arc<Signal>,
    ) -> Self {
        Self {
            id,
            shared,
            receiver,
            signal,
            drove: false,
            terminated: false,
        }
    }

    /// Returns a handle that cancels this submission.
    #[must_use]
    pub fn handle(&self) -> SubmissionHandle {
        SubmissionHandle {
            signal: Arc::clone(&self.signal),
        }
    }

    // Checks the completion slot.
    fn poll_slot(&mut self, cx: &mut Context<'_>) -> Poll<Outcome<T, E>> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The record was dropped without being resolved.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(TaskError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn complete(&mut self, outcome: Outcome<T, E>) -> Poll<Outcome<T, E>> {
        self.terminated = true;
        if self.drove {
            self.shared.hand_off();
        }
        Poll::Ready(outcome)
    }
}

impl<T, E> Future for Submission<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.terminated {
            return Poll::Pending;
        }
        // Register before touching the queue so a hand-off can't be missed.
        self.signal.register(cx.waker());

        if self.signal.is_canceled() {
            match self.shared.withdraw(self.id) {
                Withdrawal::Removed => return self.complete(Err(TaskError::Canceled)),
                Withdrawal::InFlight | Withdrawal::Gone => {}
            }
        }

        loop {
            if let Poll::Ready(outcome) = self.poll_slot(cx) {
                return self.complete(outcome);
            }
            match self.shared.drive(cx) {
                Step::Advanced => self.drove = true,
                Step::Suspended => {
                    self.drove = true;
                    return Poll::Pending;
                }
                Step::Busy => return Poll::Pending,
                // Our record was popped and its slot is about to be resolved,
                // which wakes the receiver.
                Step::Empty => return Poll::Pending,
            }
        }
    }
}

impl<T, E> FusedFuture for Submission<T, E> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T, E> Drop for Submission<T, E> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        self.signal.cancel();
        self.shared.withdraw(self.id);
    }
}

impl<T, E> fmt::Debug for Submission<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .field("terminated", &self.terminated)
            .finish()
    }
}
