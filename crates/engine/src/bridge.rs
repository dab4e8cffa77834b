//! Confinement bridge: one home thread per store
//!
//! The store is created on a dedicated OS thread (the home context) and never
//! leaves it. Callers hand the bridge closures ("bodies") that receive
//! `&mut S`; the home thread runs them one at a time in submission order and
//! sends each result back through a oneshot channel.
//!
//! Because the only way to reach the store is through a body, a store type
//! that is not `Send` can still be driven from any thread or task.

use cordon_core::{Error, Result, Store, StoreId};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type Body<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Bridge metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    /// Number of bodies waiting for the home context.
    pub queue_depth: usize,
    /// Total number of bodies run since the bridge started, panicked ones included.
    pub bodies_completed: u64,
    /// Whether the bridge still accepts bodies.
    pub accepting: bool,
}

struct BridgeInner<S> {
    queue: Mutex<VecDeque<Body<S>>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    bodies_completed: AtomicU64,
    capacity: usize,
    drain_on_shutdown: bool,
}

/// Single-consumer queue feeding the home context of one store.
pub struct Bridge<S: Store> {
    inner: Arc<BridgeInner<S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    home: ThreadId,
    name: String,
}

impl<S: Store> Bridge<S> {
    /// Spawn the home thread and build the store on it with `factory`.
    ///
    /// Blocks until the factory returns. The thread is named
    /// `cordon-home-{name}`.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or `ContextUnavailable` if the thread
    /// could not be spawned or the factory panicked.
    pub fn start<F>(
        name: &str,
        capacity: usize,
        drain_on_shutdown: bool,
        factory: F,
    ) -> Result<(Self, StoreId)>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let inner = Arc::new(BridgeInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            bodies_completed: AtomicU64::new(0),
            capacity,
            drain_on_shutdown,
        });

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<StoreId>>(1);
        let inner_clone = Arc::clone(&inner);
        let thread_name = format!("cordon-home-{}", name);
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let store = match factory() {
                    Ok(store) => store,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(store.id()));
                home_loop(&inner_clone, store);
            })
            .map_err(|e| {
                error!(target: "cordon::bridge", thread = %thread_name, error = %e, "Failed to spawn home thread");
                Error::ContextUnavailable
            })?;

        let home = handle.thread().id();
        let store_id = match ready_rx.recv() {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                // factory panicked before reporting
                let _ = handle.join();
                return Err(Error::ContextUnavailable);
            }
        };

        debug!(target: "cordon::bridge", thread = %thread_name, capacity, "Home context started");
        Ok((
            Self {
                inner,
                worker: Mutex::new(Some(handle)),
                home,
                name: name.to_string(),
            },
            store_id,
        ))
    }

    /// Run `body` on the home context and await its result.
    ///
    /// The calling task is suspended, not blocked. A panic inside `body` is
    /// resumed in the caller.
    ///
    /// # Errors
    ///
    /// Returns `ContextUnavailable` if the home context is shut down before
    /// the body runs, `QueueFull` if the queue is at capacity, or whatever
    /// `body` itself returns.
    pub async fn run<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Box::new(move |store: &mut S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(store)));
            let _ = tx.send(outcome);
        }))?;

        match rx.await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(Error::ContextUnavailable),
        }
    }

    /// Run `body` on the home context and block the calling thread until it
    /// finishes.
    ///
    /// # Errors
    ///
    /// Same as [`Bridge::run`], plus `InvalidOperation` when called from the
    /// home context itself (the body could never run).
    pub fn run_sync<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_home_context() {
            return Err(Error::invalid_operation(
                "run_sync called from the home context",
            ));
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.enqueue(Box::new(move |store: &mut S| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(store)));
            let _ = tx.send(outcome);
        }))?;

        match rx.recv() {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(Error::ContextUnavailable),
        }
    }

    /// Queue `body` without waiting for it.
    ///
    /// A panic inside `body` is logged on the home thread and otherwise lost.
    pub fn submit<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.enqueue(Box::new(body))
    }

    fn enqueue(&self, body: Body<S>) -> Result<()> {
        {
            let mut queue = self.inner.queue.lock();
            // Checked under the lock: the home loop only exits after seeing
            // the flag while holding it.
            if self.inner.shutdown.load(Ordering::Acquire) {
                warn!(target: "cordon::bridge", bridge = %self.name, "Rejected body: home context is shut down");
                return Err(Error::ContextUnavailable);
            }
            if queue.len() >= self.inner.capacity {
                warn!(target: "cordon::bridge", bridge = %self.name, capacity = self.inner.capacity, "Rejected body: queue full");
                return Err(Error::QueueFull {
                    capacity: self.inner.capacity,
                });
            }
            queue.push_back(body);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Whether the current thread is this bridge's home context.
    pub fn is_home_context(&self) -> bool {
        std::thread::current().id() == self.home
    }

    /// Whether the bridge still accepts bodies.
    pub fn is_accepting(&self) -> bool {
        !self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting bodies, finish (or drop) the queued ones, close the
    /// store and join the home thread.
    ///
    /// Idempotent. When called from the home context itself the thread is
    /// left to exit on its own after the current body returns.
    pub fn shutdown(&self) {
        let first = !self.inner.shutdown.swap(true, Ordering::AcqRel);

        // Notify under the lock so a home loop between its flag check and
        // wait() cannot miss the wakeup
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        if first {
            info!(target: "cordon::bridge", bridge = %self.name, "Home context shutting down");
        }
        if self.is_home_context() {
            return;
        }

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
    }

    /// Return a snapshot of bridge metrics.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            bodies_completed: self.inner.bodies_completed.load(Ordering::Relaxed),
            accepting: self.is_accepting(),
        }
    }
}

impl<S: Store> Drop for Bridge<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn home_loop<S: Store>(inner: &BridgeInner<S>, mut store: S) {
    loop {
        let body = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(Ordering::Acquire) && !inner.drain_on_shutdown {
                    let dropped = std::mem::take(&mut *queue);
                    inner.queue_depth.store(0, Ordering::Release);
                    drop(queue);
                    if !dropped.is_empty() {
                        warn!(target: "cordon::bridge", dropped = dropped.len(), "Dropped queued bodies at shutdown");
                    }
                    // Bodies may own values whose drop re-enters the bridge
                    drop(dropped);
                    break None;
                }
                if let Some(body) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    break Some(body);
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let Some(body) = body else { break };

        // Execute outside the lock. Awaited bodies catch their own panics and
        // hand them to the caller; this catches fire-and-forget ones.
        if let Err(e) = panic::catch_unwind(AssertUnwindSafe(|| body(&mut store))) {
            error!(
                target: "cordon::bridge",
                "home context body panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
        inner.bodies_completed.fetch_add(1, Ordering::Relaxed);
    }

    store.close();
    debug!(target: "cordon::bridge", "Home context stopped");
}
