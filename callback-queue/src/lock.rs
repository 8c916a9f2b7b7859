//! Named mutual exclusion with scope-bound guards
//!
//! `Guarded<T>` pairs a value with a non-reentrant `parking_lot` mutex. The
//! only way to reach the value is through a [`ScopedLock`], which releases
//! the mutex on every exit path from the scope that acquired it, unwinding
//! included. Locking the same `Guarded` twice from one thread deadlocks.

use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// A value protected by a named, non-reentrant mutex
pub struct Guarded<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> Guarded<T> {
    /// Wrap `value`; `name` shows up in `Debug` and condvar wait traces
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    /// Block until the lock is held
    pub fn lock(&self) -> ScopedLock<'_, T> {
        ScopedLock {
            name: self.name,
            guard: self.inner.lock(),
        }
    }

    /// Acquire the lock only if it is free right now
    pub fn try_lock(&self) -> Option<ScopedLock<'_, T>> {
        let guard = self.inner.try_lock()?;
        Some(ScopedLock {
            name: self.name,
            guard,
        })
    }

    /// Whether some thread currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Consume the wrapper and return the value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for Guarded<T> {
    fn default() -> Self {
        Self::new("guarded", T::default())
    }
}

impl<T> fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Guard for a held [`Guarded`] lock
///
/// Released when dropped. Acquire and release emit no events; the queue
/// takes these locks once per push.
pub struct ScopedLock<'a, T> {
    name: &'static str,
    guard: MutexGuard<'a, T>,
}

impl<'a, T> ScopedLock<'a, T> {
    /// Release the lock, block until `condvar` is notified, then reacquire
    pub fn wait(&mut self, condvar: &Condvar) {
        tracing::trace!(lock = self.name, "waiting");
        condvar.wait(&mut self.guard);
    }

    /// Wait on `condvar` until `condition` returns false
    pub fn wait_while<F>(&mut self, condvar: &Condvar, mut condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *self.guard) {
            self.wait(condvar);
        }
    }
}

impl<'a, T> Deref for ScopedLock<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for ScopedLock<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_released_at_scope_end() {
        let guarded = Guarded::new("test", 0u32);
        {
            let mut value = guarded.lock();
            *value += 1;
            assert!(guarded.is_locked());
        }
        assert!(!guarded.is_locked());
        assert_eq!(*guarded.lock(), 1);
    }

    #[test]
    fn test_released_on_early_return() {
        fn bump_if_small(guarded: &Guarded<u32>) -> bool {
            let mut value = guarded.lock();
            if *value > 10 {
                return false;
            }
            *value += 1;
            true
        }

        let guarded = Guarded::new("early", 11u32);
        assert!(!bump_if_small(&guarded));
        assert!(!guarded.is_locked());
    }

    #[test]
    fn test_released_on_unwind() {
        let guarded = Guarded::new("unwind", Vec::<u8>::new());
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _held = guarded.lock();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!guarded.is_locked());
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let guarded = Guarded::new("try", ());
        let held = guarded.lock();
        assert!(guarded.try_lock().is_none());
        drop(held);
        assert!(guarded.try_lock().is_some());
    }

    /// Subscriber that accepts everything and counts events
    #[derive(Default)]
    struct CountingSubscriber {
        events: Arc<AtomicUsize>,
    }

    impl tracing::Subscriber for CountingSubscriber {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }
        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, _: &tracing::Event<'_>) {
            self.events.fetch_add(1, Ordering::Relaxed);
        }
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_lock_and_unlock_emit_no_events() {
        let subscriber = CountingSubscriber::default();
        let events = Arc::clone(&subscriber.events);
        let guarded = Guarded::new("quiet", 0u64);

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..1000 {
                *guarded.lock() += 1;
                if let Some(mut value) = guarded.try_lock() {
                    *value += 1;
                }
            }
            tracing::trace!("sentinel");
        });

        assert_eq!(*guarded.lock(), 2000);
        // Only the sentinel reached the subscriber
        assert_eq!(events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_wait_while_wakes_on_notify() {
        let shared = Arc::new((Guarded::new("cv", false), Condvar::new()));
        let setter = Arc::clone(&shared);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            *setter.0.lock() = true;
            setter.1.notify_all();
        });

        let mut ready = shared.0.lock();
        ready.wait_while(&shared.1, |ready| !*ready);
        assert!(*ready);
        drop(ready);
        handle.join().unwrap();
    }
}
