//! Serializing every call of a function through a queue.
//!
//! [`Synchronized`] pairs a callable with a [`SerializedQueue`]. Each
//! [`call`](Synchronized::call) submits one invocation, so calls never overlap
//! and complete in the order they were made.
//!
//! A wrapper created with [`Synchronized::new`] owns a private queue. Storing
//! it as a field therefore serializes calls per instance of the owning type.
//! To serialize across instances, build each wrapper with
//! [`Synchronized::with_queue`] from one shared queue.

use std::{convert::Infallible, fmt, sync::Arc};

use crate::{SerializedQueue, Submission};

/// A callable whose invocations run one at a time, in call order.
///
/// Clones share both the callable and the queue.
///
/// # Example
/// ```
/// # use syncron::Synchronized;
/// # futures::executor::block_on(async {
/// let double: Synchronized<_, u32> = Synchronized::new(|n: u32| async move { Ok(n * 2) });
///
/// let (a, b) = futures::join!(double.call(1), double.call(2));
/// assert_eq!((a, b), (Ok(2), Ok(4)));
/// # });
/// ```
pub struct Synchronized<F, T, E = Infallible> {
    func: Arc<F>,
    queue: SerializedQueue<T, E>,
}

impl<F, T, E> Synchronized<F, T, E> {
    /// Wraps `func` with a private queue.
    pub fn new(func: F) -> Self {
        Self::with_queue(SerializedQueue::new(), func)
    }

    /// Wraps `func` so its calls go through `queue`, possibly shared with
    /// other wrappers or submitters.
    pub fn with_queue(queue: SerializedQueue<T, E>, func: F) -> Self {
        Self {
            func: Arc::new(func),
            queue,
        }
    }

    /// The queue every call goes through.
    #[must_use]
    pub fn queue(&self) -> &SerializedQueue<T, E> {
        &self.queue
    }
}

impl<F, T, E> Synchronized<F, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Queues an invocation of the wrapped function with `args`.
    ///
    /// The function is not called until every earlier call has completed.
    /// Pass a tuple to forward several arguments.
    pub fn call<A, Fut>(&self, args: A) -> Submission<T, E>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let func = Arc::clone(&self.func);
        self.queue.submit(move || func(args))
    }
}

impl<F, T, E> Clone for Synchronized<F, T, E> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
            queue: self.queue.clone(),
        }
    }
}

impl<F, T, E> fmt::Debug for Synchronized<F, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronized")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Wraps `func` so its calls are serialized through a private queue.
///
/// Shorthand for [`Synchronized::new`].
pub fn synchronized<F, T, E>(func: F) -> Synchronized<F, T, E> {
    Synchronized::new(func)
}
