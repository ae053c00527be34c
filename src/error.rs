//! Error type observed by submitters of serialized tasks.

/// Reason a [`Submission`](crate::Submission) resolved without a value.
///
/// There is exactly one failure source a caller controls, the body itself, so
/// `Failed` carries the body's error value untouched. The other variants
/// describe what happened to the body rather than what it returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError<E> {
    /// The body returned an error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The body panicked while being invoked or polled.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The submission was canceled or dropped before the body completed.
    #[error("task was canceled")]
    Canceled,
}

impl<E> TaskError<E> {
    /// Returns the body's own error, if that is why the task failed.
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if the body returned an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskError::Failed(_))
    }

    /// Returns `true` if the body panicked.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }

    /// Returns `true` if the task was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}
