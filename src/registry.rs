//! Provides `KeyedQueues`, a lazily populated map from key to
//! [`SerializedQueue`].
//!
//! Submissions under the same key serialize against each other, while
//! submissions under different keys run fully concurrently.

use std::{convert::Infallible, fmt, hash::Hash};

use dashmap::DashMap;
use tracing::debug;

use crate::{QueueBuilder, SerializedQueue};

/// A trait for types that can be used as keys of a [`KeyedQueues`].
///
/// Implementations must support equality comparison, hashing, and cloning so
/// equal keys always map to the same queue.
///
/// It is automatically implemented for common identifier types such as `char`,
/// `String`, `&str`, and all primitive integer types.
pub trait Id: Eq + Hash + Clone {}

impl Id for char {}
impl Id for &str {}
impl Id for String {}
impl Id for i8 {}
impl Id for u8 {}
impl Id for i16 {}
impl Id for u16 {}
impl Id for i32 {}
impl Id for u32 {}
impl Id for i64 {}
impl Id for u64 {}
impl Id for i128 {}
impl Id for u128 {}
impl Id for isize {}
impl Id for usize {}

/// A registry of independent [`SerializedQueue`]s indexed by key.
///
/// A queue is created the first time its key is seen and stays in the
/// registry afterwards, so calling [`get`](Self::get) twice with equal keys
/// returns the same queue instance.
///
/// # Example
/// ```
/// # use syncron::KeyedQueues;
/// # futures::executor::block_on(async {
/// let payments: KeyedQueues<u64, u32> = KeyedQueues::new();
///
/// // Never runs concurrently with other work for user 7.
/// let receipt = payments.get(7).submit(|| async { Ok(42) }).await;
///
/// assert_eq!(receipt, Ok(42));
/// assert!(payments.get(7).ptr_eq(&payments.get(7)));
/// # });
/// ```
pub struct KeyedQueues<K, T, E = Infallible> {
    queues: DashMap<K, SerializedQueue<T, E>>,
    builder: QueueBuilder,
}

impl<K: Id, T, E> KeyedQueues<K, T, E> {
    /// Creates an empty registry whose queues use the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_builder(QueueBuilder::new())
    }

    /// Creates an empty registry whose queues are built from `builder`.
    #[must_use]
    pub fn with_builder(builder: QueueBuilder) -> Self {
        Self {
            queues: DashMap::new(),
            builder,
        }
    }

    /// Returns the queue bound to `key`, creating it on first use.
    pub fn get(&self, key: K) -> SerializedQueue<T, E> {
        if let Some(queue) = self.queues.get(&key) {
            return queue.clone();
        }
        let mut created = false;
        let queue = self
            .queues
            .entry(key)
            .or_insert_with(|| {
                created = true;
                self.builder.build()
            })
            .clone();
        // The shard lock is released here, so the map can be read again.
        if created {
            debug!(queue = ?queue.name(), keys = self.queues.len(), "created queue for new key");
        }
        queue
    }

    /// Returns `true` if a queue was already created for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.queues.contains_key(key)
    }

    /// Number of keys with a queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Returns `true` if no queue was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Removes queues that are idle and not held by anyone but the registry.
    ///
    /// A queue still referenced by a handle or a pending submission is kept,
    /// so no caller can observe two different queues for one key. Returns the
    /// number of removed queues.
    pub fn prune_idle(&self) -> usize {
        let mut removed = 0;
        self.queues.retain(|_, queue| {
            let unused = queue.is_idle() && queue.holders() == 1;
            removed += usize::from(unused);
            !unused
        });
        if removed > 0 {
            debug!(removed, keys = self.queues.len(), "pruned idle queues");
        }
        removed
    }
}

impl<K: Id, T, E> Default for KeyedQueues<K, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Id, T, E> fmt::Debug for KeyedQueues<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedQueues")
            .field("keys", &self.queues.len())
            .finish()
    }
}
