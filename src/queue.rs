//! Defines the `SerializedQueue`, an ordered async task queue.
//!
//! A `SerializedQueue` accepts bodies (closures producing futures) and runs
//! them strictly one after another, in submission order. Submitting never
//! invokes a body; a body is only invoked once every body submitted before it
//! has completed.
//!
//! There is no background worker. The queue is drained by whichever live
//! [`Submission`] is being polled: it takes the drainer role, invokes and
//! polls the body at the head, resolves the head's completion slot and moves
//! on to the next record. The drainer keeps absorbing records until its own
//! has completed, then wakes the waiting submissions so one of them takes
//! over.
//! This keeps the queue independent of any specific async runtime.
use std::{
    collections::VecDeque,
    convert::Infallible,
    fmt, mem,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll, Waker},
};

use futures::{channel::oneshot, future::BoxFuture, task::AtomicWaker};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
    Submission, TaskError,
    body::{self, Body, Outcome},
};

const DEFAULT_CAPACITY: usize = 16;

/// Cancellation flag and wake-up registration shared by a record, its
/// [`Submission`] and any [`SubmissionHandle`](crate::SubmissionHandle).
#[derive(Default)]
pub(crate) struct Signal {
    canceled: AtomicBool,
    waker: AtomicWaker,
}

impl Signal {
    pub(crate) fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn register(&self, waker: &Waker) {
        self.waker.register(waker);
    }
}

enum Stage<T, E> {
    // Not invoked yet.
    Queued(Body<T, E>),
    // Invoked. `None` while a drainer polls the future outside the lock.
    Running(Option<BoxFuture<'static, Outcome<T, E>>>),
}

struct Record<T, E> {
    id: u64,
    stage: Stage<T, E>,
    slot: oneshot::Sender<Outcome<T, E>>,
    signal: Arc<Signal>,
}

struct State<T, E> {
    records: VecDeque<Record<T, E>>,
    // Set while a drainer polls the head body with the lock released.
    driving: bool,
}

/// Result of a single drain step.
pub(crate) enum Step {
    /// Another context is polling the head body right now.
    Busy,
    /// The head body is suspended and holds the caller's waker.
    Suspended,
    /// The head record was resolved and removed.
    Advanced,
    /// Nothing left to drain.
    Empty,
}

/// Result of withdrawing a canceled record.
pub(crate) enum Withdrawal {
    /// The record was removed without its body completing.
    Removed,
    /// The record's body is being polled; the drainer removes it afterwards.
    InFlight,
    /// The record is no longer queued.
    Gone,
}

pub(crate) struct Shared<T, E> {
    name: Option<String>,
    next_id: AtomicU64,
    state: Mutex<State<T, E>>,
}

impl<T, E> Shared<T, E> {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }

    /// Runs one drain step on behalf of the submission polled with `cx`.
    pub(crate) fn drive(&self, cx: &mut Context<'_>) -> Step {
        let mut state = self.state.lock();
        if state.driving {
            return Step::Busy;
        }
        let Some(head) = state.records.front_mut() else {
            return Step::Empty;
        };
        let id = head.id;

        if head.signal.is_canceled() {
            return self.finish(state, Err(TaskError::Canceled));
        }

        let mut future = match mem::replace(&mut head.stage, Stage::Running(None)) {
            Stage::Running(Some(future)) => {
                state.driving = true;
                drop(state);
                future
            }
            Stage::Queued(body) => {
                state.driving = true;
                drop(state);
                trace!(queue = self.label(), task = id, "invoking task body");
                match body::invoke(body) {
                    Ok(future) => future,
                    Err(msg) => {
                        let mut state = self.state.lock();
                        state.driving = false;
                        return self.finish(state, Err(TaskError::Panicked(msg)));
                    }
                }
            }
            // Unreachable while `driving` is clear, keep the slot as it was.
            Stage::Running(None) => return Step::Busy,
        };

        let poll = future.as_mut().poll(cx);

        let mut state = self.state.lock();
        state.driving = false;
        match poll {
            Poll::Ready(outcome) => self.finish(state, outcome),
            Poll::Pending => {
                // `driving` kept the head in place, so it is still this record.
                let canceled = state
                    .records
                    .front()
                    .is_none_or(|head| head.signal.is_canceled());
                if canceled {
                    let step = self.finish(state, Err(TaskError::Canceled));
                    drop(future);
                    return step;
                }
                if let Some(head) = state.records.front_mut() {
                    head.stage = Stage::Running(Some(future));
                }
                Step::Suspended
            }
        }
    }

    // Removes the head record and resolves it with `outcome`.
    fn finish(
        &self,
        mut state: MutexGuard<'_, State<T, E>>,
        outcome: Outcome<T, E>,
    ) -> Step {
        let Some(record) = state.records.pop_front() else {
            return Step::Empty;
        };
        let remaining = state.records.len();
        drop(state);

        match &outcome {
            Ok(_) => trace!(queue = self.label(), task = record.id, remaining, "task completed"),
            Err(TaskError::Failed(_)) => {
                debug!(queue = self.label(), task = record.id, remaining, "task failed")
            }
            Err(TaskError::Panicked(msg)) => {
                debug!(queue = self.label(), task = record.id, remaining, panic = %msg, "task panicked")
            }
            Err(TaskError::Canceled) => {
                debug!(queue = self.label(), task = record.id, remaining, "task canceled")
            }
        }
        // The submitter may be gone already.
        let _ = record.slot.send(outcome);
        Step::Advanced
    }

    /// Removes a canceled record, unless its body is being polled.
    pub(crate) fn withdraw(&self, id: u64) -> Withdrawal {
        let mut state = self.state.lock();
        let Some(pos) = state.records.iter().position(|r| r.id == id) else {
            return Withdrawal::Gone;
        };
        if pos == 0 && state.driving {
            return Withdrawal::InFlight;
        }
        let record = state.records.remove(pos);
        drop(state);

        debug!(queue = self.label(), task = id, "task withdrawn");
        drop(record);
        // A suspended head body may hold the waker of the withdrawn submission.
        self.hand_off();
        Withdrawal::Removed
    }

    /// Wakes every waiting submission; the first one polled becomes the
    /// drainer. A submission that is held but never polled again must not
    /// stall the ones behind it.
    pub(crate) fn hand_off(&self) {
        let wakers: Vec<Waker> = {
            let state = self.state.lock();
            state
                .records
                .iter()
                .filter_map(|r| r.signal.waker.take())
                .collect()
        };
        if !wakers.is_empty() {
            trace!(queue = self.label(), waiting = wakers.len(), "handing off drainer role");
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Configuration for a [`SerializedQueue`].
///
/// # Example
/// ```
/// # use syncron::{QueueBuilder, SerializedQueue};
/// let queue: SerializedQueue<u32> = QueueBuilder::new()
///     .name("payments")
///     .capacity(64)
///     .build();
///
/// assert_eq!(queue.name(), Some("payments"));
/// ```
#[derive(Clone, Debug)]
pub struct QueueBuilder {
    name: Option<String>,
    capacity: usize,
}

impl QueueBuilder {
    /// Creates a builder with no name and the default record capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Sets the name reported in the queue's `tracing` events.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Sets how many pending records the queue holds before reallocating.
    pub fn capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Builds a new, empty queue.
    #[must_use]
    pub fn build<T, E>(&self) -> SerializedQueue<T, E> {
        SerializedQueue {
            shared: Arc::new(Shared {
                name: self.name.clone(),
                next_id: AtomicU64::new(0),
                state: Mutex::new(State {
                    records: VecDeque::with_capacity(self.capacity),
                    driving: false,
                }),
            }),
        }
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered async task queue that runs at most one body at a time.
///
/// Bodies are invoked and completed in the order they were submitted. A body
/// that fails or panics rejects only its own [`Submission`]; the queue carries
/// on with the next one. After draining, the queue is reusable indefinitely.
///
/// `SerializedQueue` is a handle: clones refer to the same queue, and
/// [`ptr_eq`](Self::ptr_eq) tells whether two handles do.
///
/// # Example
/// ```
/// # use syncron::SerializedQueue;
/// # futures::executor::block_on(async {
/// let queue: SerializedQueue<&str> = SerializedQueue::new();
///
/// let first = queue.submit(|| async { Ok("first") });
/// let second = queue.submit(|| async { Ok("second") });
///
/// let (a, b) = futures::join!(first, second);
/// assert_eq!(a, Ok("first"));
/// assert_eq!(b, Ok("second"));
/// # });
/// ```
pub struct SerializedQueue<T, E = Infallible> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> SerializedQueue<T, E> {
    /// Creates a new, empty, unnamed queue.
    #[must_use]
    pub fn new() -> Self {
        QueueBuilder::new().build()
    }

    /// The name given through [`QueueBuilder::name`], if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Number of submitted tasks that have not completed yet, including the
    /// one currently running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().records.len()
    }

    /// Returns `true` if no task is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().records.is_empty()
    }

    /// Returns `true` if both handles refer to the same queue.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // Number of handles and submissions keeping this queue alive.
    pub(crate) fn holders(&self) -> usize {
        Arc::strong_count(&self.shared)
    }
}

impl<T, E> SerializedQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Submits a body to run after every previously submitted one.
    ///
    /// The body is **not** invoked here. It is invoked once the queue drains
    /// to it, which requires that some submission of this queue is being
    /// polled. The returned [`Submission`] resolves to the body's value, or to
    /// a [`TaskError`] if the body failed, panicked or was canceled.
    ///
    /// Dropping the returned `Submission` before it resolves cancels the task:
    /// a queued body is never invoked, a running one is dropped.
    pub fn submit<F, Fut>(&self, body: F) -> Submission<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, receiver) = oneshot::channel();
        let signal = Arc::new(Signal::default());

        let mut state = shared.state.lock();
        state.records.push_back(Record {
            id,
            stage: Stage::Queued(body::guard(body)),
            slot,
            signal: Arc::clone(&signal),
        });
        let len = state.records.len();
        drop(state);

        if len == 1 {
            trace!(queue = shared.label(), task = id, "queue idle, submission takes drainer role");
        } else {
            trace!(queue = shared.label(), task = id, pending = len, "task queued");
        }
        Submission::new(id, Arc::clone(shared), receiver, signal)
    }

    /// Submits an already constructed future as the body.
    ///
    /// Futures do nothing until polled, so `future` does not start before the
    /// queue drains to it, exactly like a body passed to [`submit`](Self::submit).
    pub fn submit_future<Fut>(&self, future: Fut) -> Submission<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.submit(move || future)
    }
}

impl<T, E> Clone for SerializedQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Default for SerializedQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for SerializedQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedQueue")
            .field("name", &self.shared.name)
            .field("len", &self.len())
            .finish()
    }
}
