//! Engine worker thread
//!
//! Spawns a named thread with its own single-threaded tokio runtime. Engine
//! calls are posted to it as boxed closures and run one at a time in post
//! order; the engine raises its observer hooks from inside those closures.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::error::{BridgeError, Result};

/// Work item run on the worker thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Commands sent to the worker thread
pub enum Command {
    /// Run a closure on the worker
    Run(Task),
    /// Stop the worker after the commands already queued
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Run(_) => f.write_str("Run(..)"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable sender side of a worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Command>,
    thread_id: ThreadId,
}

impl WorkerHandle {
    /// Queue `task` on the worker; never blocks
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Command::Run(Box::new(task)))
            .map_err(|_| BridgeError::WorkerStopped)
    }

    /// Run `f` on the worker and wait for its result
    ///
    /// Runs inline when already on the worker thread. Blocking is refused
    /// from inside any other tokio runtime context with
    /// [`BridgeError::BlockingInRuntime`]; `f` is not run in that case. Use
    /// [`post`](Self::post) or `spawn_blocking` there instead.
    pub fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!("blocking worker call attempted from inside an async runtime");
            return Err(BridgeError::BlockingInRuntime);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move || {
            let _ = reply_tx.send(f());
        })?;
        reply_rx.blocking_recv().map_err(|_| BridgeError::WorkerStopped)
    }

    /// Whether the calling thread is this worker
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Owner of the worker thread
#[derive(Debug)]
pub struct Worker {
    handle: WorkerHandle,
    join: Option<JoinHandle<()>>,
    name: String,
}

impl Worker {
    /// Spawn a worker thread named `name`
    pub fn spawn(name: &str) -> Result<Worker> {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(rx))?;

        let handle = WorkerHandle {
            tx,
            thread_id: join.thread().id(),
        };
        tracing::debug!(worker = name, "worker thread started");

        Ok(Worker {
            handle,
            join: Some(join),
            name: name.to_string(),
        })
    }

    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the worker after the tasks already posted
    ///
    /// Joins the thread, except when called from the worker itself: then the
    /// thread is detached and exits once the current task returns.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.handle.tx.send(Command::Shutdown);

        if self.handle.is_current() {
            tracing::debug!(worker = %self.name, "worker released from its own thread; detaching");
            return;
        }
        if join.join().is_err() {
            tracing::error!(worker = %self.name, "worker thread panicked");
        }
        tracing::debug!(worker = %self.name, "worker thread joined");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(rx: mpsc::UnboundedReceiver<Command>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime for worker: {}", e);
            return;
        }
    };

    rt.block_on(run_loop(rx));
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!("worker task panicked; continuing");
                }
            }
            Command::Shutdown => {
                tracing::debug!("worker received shutdown command");
                break;
            }
        }
    }
    // Tasks still queued are dropped here, on the worker thread
    rx.close();
    while rx.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc as std_mpsc, Arc};

    #[test]
    fn test_tasks_run_in_post_order_on_worker() {
        let worker = Worker::spawn("test-worker").unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            worker
                .handle()
                .post(move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send((i, name)).unwrap();
                })
                .unwrap();
        }
        worker.shutdown();

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, name)| name.as_deref() == Some("test-worker")));
    }

    #[test]
    fn test_call_returns_value() {
        let worker = Worker::spawn("call-worker").unwrap();
        let handle = worker.handle().clone();
        assert!(!handle.is_current());
        let on_worker = handle
            .call({
                let handle = handle.clone();
                move || handle.is_current()
            })
            .unwrap();
        assert!(on_worker);
    }

    #[test]
    fn test_call_from_async_context_is_refused() {
        let worker = Worker::spawn("async-caller").unwrap();
        let handle = worker.handle().clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let counter = Arc::clone(&ran);
        let result = rt.block_on(async move {
            handle.call(move || counter.fetch_add(1, Ordering::SeqCst))
        });
        assert!(matches!(result, Err(BridgeError::BlockingInRuntime)));

        // The closure never reached the worker and the worker still serves calls
        assert_eq!(worker.handle().call(|| 5).unwrap(), 5);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let worker = Worker::spawn("stopped-worker").unwrap();
        let handle = worker.handle().clone();
        worker.shutdown();

        assert!(!handle.is_running());
        assert!(matches!(handle.post(|| {}), Err(BridgeError::WorkerStopped)));
        assert!(matches!(handle.call(|| 1), Err(BridgeError::WorkerStopped)));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let worker = Worker::spawn("panic-worker").unwrap();
        worker.handle().post(|| panic!("task failure")).unwrap();
        assert_eq!(worker.handle().call(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_shutdown_from_worker_detaches() {
        let worker = Worker::spawn("self-stop").unwrap();
        let handle = worker.handle().clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = std_mpsc::channel();

        let counter = Arc::clone(&ran);
        handle
            .post(move || {
                worker.shutdown();
                counter.fetch_add(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            })
            .unwrap();

        done_rx.recv().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_command_debug() {
        assert_eq!(format!("{:?}", Command::Shutdown), "Shutdown");
        assert_eq!(format!("{:?}", Command::Run(Box::new(|| {}))), "Run(..)");
    }
}
