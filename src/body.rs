//! Panic-guarded wrapper around a task body's future.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    pin::Pin,
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use pin_project_lite::pin_project;

use crate::TaskError;

/// Output of a body once it has been guarded.
pub(crate) type Outcome<T, E> = Result<T, TaskError<E>>;

/// A boxed, not yet invoked task body.
pub(crate) type Body<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Outcome<T, E>> + Send>;

pin_project! {
    /// Drives a body future and turns both its error and any panic raised
    /// while polling into a [`TaskError`].
    ///
    /// Once the inner future panics it is never polled again; the guard
    /// resolves immediately with [`TaskError::Panicked`].
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub(crate) struct Guarded<F> {
        #[pin]
        future: F,
    }
}

impl<F> Guarded<F> {
    pub(crate) fn new(future: F) -> Self {
        Guarded { future }
    }
}

impl<F, T, E> Future for Guarded<F>
where
    F: Future<Output = Result<T, E>>,
{
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self.project().future;
        match catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(Ok(value))) => Poll::Ready(Ok(value)),
            Ok(Poll::Ready(Err(e))) => Poll::Ready(Err(TaskError::Failed(e))),
            Err(payload) => Poll::Ready(Err(TaskError::Panicked(panic_message(payload)))),
        }
    }
}

/// Wraps a body closure so invoking it yields a guarded, boxed future.
pub(crate) fn guard<F, Fut, T, E>(body: F) -> Body<T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    Box::new(move || Box::pin(Guarded::new(body())) as BoxFuture<'static, Outcome<T, E>>)
}

/// Invokes a body, catching a panic raised by the closure itself before it
/// produced a future.
pub(crate) fn invoke<T, E>(body: Body<T, E>) -> Result<BoxFuture<'static, Outcome<T, E>>, String> {
    catch_unwind(AssertUnwindSafe(body)).map_err(panic_message)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
