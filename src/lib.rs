//! Ordered, non-overlapping execution of asynchronous work.
//!
//! `syncron` provides a mutual-exclusion primitive for async code that
//! guarantees more than a lock: work submitted to a [`SerializedQueue`] starts
//! and completes in exactly the order it was submitted, and at most one body
//! is in progress at a time, even while bodies suspend at `.await` points.
//!
//! The crate works independently of any specific async runtime. There is no
//! background worker: awaiting a [`Submission`] drives the queue it belongs
//! to.
//!
//! Features include:
//! - A `SerializedQueue` that runs submitted bodies lazily, one by one, in FIFO
//!   order, forwarding each body's value or error to its own submitter
//! - A `KeyedQueues` registry that hands out one queue per key, so work under
//!   the same key is serialized while different keys run concurrently
//! - A `Synchronized` wrapper that funnels every call of a function through a
//!   queue
//! - Cancellation of pending or running work through `SubmissionHandle` or by
//!   dropping the `Submission`

mod body;
pub mod error;
pub mod queue;
pub mod registry;
pub mod submission;
pub mod synchronized;

pub use error::TaskError;
pub use queue::{QueueBuilder, SerializedQueue};
pub use registry::{Id, KeyedQueues};
pub use submission::{Submission, SubmissionHandle};
pub use synchronized::{Synchronized, synchronized};
