//! Ordered cross-thread callback queue
//!
//! Producers on any thread `push` entries; the script-callback thread calls
//! `drain_all` to deliver them. Pushing takes the queue lock only long enough
//! to append, and the lock is never held while a callback runs, so a
//! producer never waits on script code.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::lock::Guarded;
use crate::refcount::RefCounted;
use crate::targets::{TargetId, TargetTable};

/// Pending length at which the queue logs a warning
pub const DEFAULT_WARN_THRESHOLD: usize = 10_000;

/// Hook invoked when the queue goes from empty to non-empty
pub type NotifyHook = Arc<dyn Fn() + Send + Sync>;

/// One pending delivery
pub struct CallbackEntry<T> {
    target: TargetId,
    payload: RefCounted<T>,
    sequence: u64,
    created_at: Instant,
}

impl<T> CallbackEntry<T> {
    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn payload(&self) -> &RefCounted<T> {
        &self.payload
    }

    /// Position in push order, starting at zero
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time spent queued so far
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<T> fmt::Debug for CallbackEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("target", &self.target)
            .field("sequence", &self.sequence)
            .field("age", &self.age())
            .finish()
    }
}

/// Result of one `drain_all` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries handed to a live target, including callbacks that panicked
    pub delivered: usize,
    /// Entries whose target was gone at delivery time
    pub dropped: usize,
}

impl DrainReport {
    /// Total entries removed from the queue
    pub fn total(&self) -> usize {
        self.delivered + self.dropped
    }
}

/// Lifetime counters for a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub pending: usize,
}

struct Pending<T> {
    entries: VecDeque<CallbackEntry<T>>,
    next_sequence: u64,
}

/// FIFO queue of callback entries shared between producer threads and the
/// script-callback thread
pub struct CallbackQueue<T> {
    pending: Guarded<Pending<T>>,
    notify: Guarded<Option<NotifyHook>>,
    warn_threshold: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    draining: AtomicBool,
    drain_thread: OnceLock<ThreadId>,
}

impl<T> CallbackQueue<T> {
    pub fn new() -> Self {
        Self::with_warn_threshold(DEFAULT_WARN_THRESHOLD)
    }

    /// Create a queue that warns once its backlog reaches `warn_threshold`
    pub fn with_warn_threshold(warn_threshold: usize) -> Self {
        Self {
            pending: Guarded::new(
                "callback-queue",
                Pending {
                    entries: VecDeque::new(),
                    next_sequence: 0,
                },
            ),
            notify: Guarded::new("callback-queue-notify", None),
            warn_threshold: warn_threshold.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            drain_thread: OnceLock::new(),
        }
    }

    /// Install a hook run whenever the queue becomes non-empty
    ///
    /// The hook runs on the pushing thread, after the queue lock has been
    /// released. It should only schedule a drain, never perform one.
    pub fn set_notify<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.notify.lock() = Some(Arc::new(hook));
    }

    pub fn clear_notify(&self) {
        *self.notify.lock() = None;
    }

    /// Append an entry for `target`; never blocks on the consumer
    ///
    /// Returns the entry's sequence number.
    pub fn push(&self, target: TargetId, payload: RefCounted<T>) -> u64 {
        let (sequence, len) = {
            let mut pending = self.pending.lock();
            let sequence = pending.next_sequence;
            pending.next_sequence += 1;
            pending.entries.push_back(CallbackEntry {
                target,
                payload,
                sequence,
                created_at: Instant::now(),
            });
            (sequence, pending.entries.len())
        };

        tracing::trace!(target_id = %target, sequence, pending = len, "queued callback entry");

        if len == self.warn_threshold {
            tracing::warn!(
                "Callback queue backlog reached {} entries; is the host draining?",
                len
            );
        }

        if len == 1 {
            let hook = self.notify.lock().clone();
            if let Some(hook) = hook {
                hook();
            }
        }

        sequence
    }

    /// Wrap `value` in a fresh handle and push it
    pub fn push_value(&self, target: TargetId, value: T) -> u64 {
        self.push(target, RefCounted::new(value))
    }

    /// Deliver every pending entry in push order
    ///
    /// The pending sequence is detached under the lock, then delivered with
    /// the lock released. Each payload handle is released right after its
    /// callback returns. Entries whose target is no longer registered are
    /// dropped. A callback that panics still counts as delivered and the
    /// rest of the batch is delivered after it. A drain started from inside
    /// a callback delivers nothing.
    pub fn drain_all(&self, targets: &TargetTable<T>) -> DrainReport {
        self.check_drain_thread();

        if self.draining.swap(true, Ordering::AcqRel) {
            tracing::trace!("Nested drain ignored; outer drain still delivering");
            return DrainReport::default();
        }
        let _draining = DrainingFlag(&self.draining);

        let batch = std::mem::take(&mut self.pending.lock().entries);
        let mut report = DrainReport::default();

        for entry in batch {
            let CallbackEntry {
                target,
                payload,
                sequence,
                ..
            } = entry;

            match targets.take_for_delivery(target) {
                Some(handler) => {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| handler(payload.as_ref())));
                    if outcome.is_err() {
                        tracing::error!(
                            target_id = %target,
                            sequence,
                            "callback panicked; continuing drain"
                        );
                    }
                    report.delivered += 1;
                }
                None => {
                    tracing::debug!(
                        target_id = %target,
                        sequence,
                        "Callback target no longer registered, dropping entry"
                    );
                    report.dropped += 1;
                }
            }

            drop(payload);
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);

        if report.total() > 0 {
            tracing::trace!(
                delivered = report.delivered,
                dropped = report.dropped,
                "drained callback queue"
            );
        }

        report
    }

    /// Discard every pending entry without delivering it
    pub fn clear(&self) -> usize {
        let batch = std::mem::take(&mut self.pending.lock().entries);
        let count = batch.len();
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let (pushed, pending) = {
            let pending = self.pending.lock();
            (pending.next_sequence, pending.entries.len())
        };
        QueueStats {
            pushed,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pending,
        }
    }

    /// The first thread to drain becomes the only thread allowed to drain
    fn check_drain_thread(&self) {
        let current = thread::current().id();
        let owner = *self.drain_thread.get_or_init(|| current);
        if owner != current {
            tracing::error!(
                ?owner,
                ?current,
                "drain_all called off the script-callback thread"
            );
            debug_assert_eq!(owner, current, "drain_all called off the script-callback thread");
        }
    }
}

impl<T> Default for CallbackQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallbackQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Clears the draining flag on every exit path, unwinding included
struct DrainingFlag<'a>(&'a AtomicBool);

impl Drop for DrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
