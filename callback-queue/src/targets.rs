//! Callback target registration
//!
//! Script code registers handlers here and gets back a [`TargetId`]. Queue
//! entries carry only the id; the handler is looked up at delivery time, so
//! unregistering a target simply makes its pending entries undeliverable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Stable identifier for a registered callback target
///
/// Ids are handed out in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Create a TargetId with the given value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target-{}", self.0)
    }
}

/// A callback that receives queued payloads
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Target<T> {
    handler: Handler<T>,
    once: bool,
}

/// Registry of callback targets keyed by [`TargetId`]
pub struct TargetTable<T> {
    targets: DashMap<TargetId, Target<T>>,
    next_id: AtomicU64,
}

impl<T> TargetTable<T> {
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler that stays until unregistered
    pub fn register<F>(&self, handler: F) -> TargetId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Arc::new(handler), false)
    }

    /// Register a handler that is removed together with its first delivery
    pub fn register_once<F>(&self, handler: F) -> TargetId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Arc::new(handler), true)
    }

    fn insert(&self, handler: Handler<T>, once: bool) -> TargetId {
        let id = TargetId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.targets.insert(id, Target { handler, once });
        tracing::trace!(target_id = %id, once, "registered callback target");
        id
    }

    /// Swap the handler behind an existing id
    ///
    /// Returns `false` if the id is not registered.
    pub fn replace<F>(&self, id: TargetId, handler: F) -> bool
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        match self.targets.get_mut(&id) {
            Some(mut target) => {
                target.handler = Arc::new(handler);
                true
            }
            None => false,
        }
    }

    /// Remove a target; returns whether it existed
    pub fn unregister(&self, id: TargetId) -> bool {
        let removed = self.targets.remove(&id).is_some();
        if removed {
            tracing::trace!(target_id = %id, "unregistered callback target");
        }
        removed
    }

    pub fn is_registered(&self, id: TargetId) -> bool {
        self.targets.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Look up the handler for a delivery
    ///
    /// One-shot targets are removed by this call. The handler is cloned out
    /// so no map shard stays locked while it runs.
    pub(crate) fn take_for_delivery(&self, id: TargetId) -> Option<Handler<T>> {
        let once = self.targets.get(&id)?.once;
        if once {
            self.targets.remove(&id).map(|(_, target)| target.handler)
        } else {
            self.targets.get(&id).map(|target| Arc::clone(&target.handler))
        }
    }
}

impl<T> Default for TargetTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TargetTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetTable")
            .field("registered", &self.targets.len())
            .finish()
    }
}
