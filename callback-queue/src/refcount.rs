//! Atomically reference-counted handles with exactly-once teardown
//!
//! A `RefCounted<T>` is a cloneable owner of a shared value. Every handle
//! counts as one reference; the value is torn down synchronously inside the
//! release (explicit or via drop) that takes the count from one to zero.
//! Handles never expose a raw aliasing pointer, so "retain after the final
//! release" cannot be expressed.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Outcome of [`RefCounted::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Other handles still reference the value
    Alive,
    /// This release observed the transition to zero and ran teardown
    Destroyed,
}

impl Released {
    /// Whether this release destroyed the value
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Released::Destroyed)
    }
}

/// Shared, reference-counted owner of a value
///
/// # Example
///
/// ```rust
/// use callback_queue::{RefCounted, Released};
///
/// let first = RefCounted::new(String::from("offer"));
/// let second = first.retain();
/// assert_eq!(first.ref_count(), 2);
///
/// assert_eq!(first.release(), Released::Alive);
/// assert_eq!(second.release(), Released::Destroyed);
/// ```
pub struct RefCounted<T> {
    inner: Arc<T>,
}

impl<T> RefCounted<T> {
    /// Wrap a value with a reference count of one
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// Add a reference and return a handle to the same value
    pub fn retain(&self) -> Self {
        debug_assert!(Arc::strong_count(&self.inner) > 0);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Drop this reference
    ///
    /// When this was the last reference, the value is dropped before this
    /// call returns and `Released::Destroyed` is reported. Concurrent
    /// releases agree on a single destroyer.
    pub fn release(self) -> Released {
        match Arc::into_inner(self.inner) {
            Some(value) => {
                drop(value);
                Released::Destroyed
            }
            None => Released::Alive,
        }
    }

    /// Snapshot of the current reference count
    ///
    /// Other threads may change the count immediately after this returns.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same value
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Take the value out if this is the only reference
    pub fn try_unwrap(self) -> Result<T, Self> {
        Arc::try_unwrap(self.inner).map_err(|inner| Self { inner })
    }
}

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl<T> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> AsRef<T> for RefCounted<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("ref_count", &self.ref_count())
            .field("value", &*self.inner)
            .finish()
    }
}

impl<T> From<T> for RefCounted<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_starts_at_one() {
        let handle = RefCounted::new(5u32);
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(*handle, 5);
    }

    #[test]
    fn test_retain_increments() {
        let handle = RefCounted::new("event");
        let other = handle.retain();
        assert_eq!(handle.ref_count(), 2);
        assert!(RefCounted::ptr_eq(&handle, &other));
    }

    #[test]
    fn test_release_destroys_on_last() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = RefCounted::new(Tracked(Arc::clone(&drops)));
        let other = handle.retain();

        assert_eq!(handle.release(), Released::Alive);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert_eq!(other.release(), Released::Destroyed);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_is_implicit_release() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = RefCounted::new(Tracked(Arc::clone(&drops)));
        let other = handle.clone();

        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(other.ref_count(), 1);

        drop(other);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_unwrap_only_when_unique() {
        let handle = RefCounted::new(7u8);
        let other = handle.retain();
        let handle = handle.try_unwrap().unwrap_err();
        drop(other);
        assert_eq!(handle.try_unwrap().ok(), Some(7));
    }
}
