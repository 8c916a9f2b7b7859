//! Cross-thread callback marshalling primitives
//!
//! Building blocks for handing values produced on an engine-owned worker
//! thread to callbacks that must run on a single script thread.
//!
//! # Features
//!
//! - **Reference-counted handles**: [`RefCounted`] tears its value down
//!   exactly once, inside the release that drops the last reference
//! - **Scoped locks**: [`Guarded`] / [`ScopedLock`] release on every exit path
//! - **Ordered queue**: [`CallbackQueue`] accepts pushes from any thread
//!   without ever waiting on the consumer, and delivers in push order
//! - **Target table**: [`TargetTable`] maps stable ids to handlers; entries
//!   for an unregistered target are silently dropped at drain time
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use callback_queue::{CallbackQueue, TargetTable};
//!
//! let queue = Arc::new(CallbackQueue::new());
//! let targets = TargetTable::new();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let target = targets.register(move |value: &String| {
//!     sink.lock().unwrap().push(value.clone());
//! });
//!
//! // Worker thread side
//! let producer = Arc::clone(&queue);
//! std::thread::spawn(move || {
//!     producer.push_value(target, "candidate:1".to_string());
//! })
//! .join()
//! .unwrap();
//!
//! // Script thread side
//! let report = queue.drain_all(&targets);
//! assert_eq!(report.delivered, 1);
//! assert_eq!(*seen.lock().unwrap(), vec!["candidate:1".to_string()]);
//! ```
//!
//! # Architecture
//!
//! ```text
//! worker thread(s)                       script-callback thread
//!      │                                          │
//!      │ push(target, RefCounted<T>)              │ drain_all(&TargetTable<T>)
//!      ▼                                          ▼
//! CallbackQueue<T> ── Guarded<VecDeque<CallbackEntry<T>>> ── detach, unlock,
//!                                                            deliver in order
//! ```

pub mod lock;
pub mod queue;
pub mod refcount;
pub mod targets;

pub use lock::{Guarded, ScopedLock};
pub use queue::{
    CallbackEntry, CallbackQueue, DrainReport, NotifyHook, QueueStats, DEFAULT_WARN_THRESHOLD,
};
pub use refcount::{RefCounted, Released};
pub use targets::{Handler, TargetId, TargetTable};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::lock::{Guarded, ScopedLock};
    pub use crate::queue::{CallbackQueue, DrainReport};
    pub use crate::refcount::{RefCounted, Released};
    pub use crate::targets::{TargetId, TargetTable};
}
