//! Serializing task queue with recursive child scopes.
//!
//! `AsyncQueue` executes the operations submitted via `enqueue` one at a time,
//! in the order in which they were enqueued. The processing loop runs in a
//! tokio task, which is spawned whenever an operation is enqueued into an idle
//! queue and exits once the queue empties.
//!
//! Every dispatched operation receives a fresh child `AsyncQueue` as its only
//! argument. Operations enqueued into the child run after (or concurrently
//! with) the parent operation, but the parent's `Settled` future completes only
//! once the child queue has been fully drained. Hence nested work never
//! overtakes the entries queued behind its parent, and nothing enqueued into a
//! child scope outlives the entry which owns it.
//!
//! Only the child handle is covered by that guarantee. An operation which
//! enqueues into some other queue (for example a clone of the outer queue
//! captured by the closure) gets its work scheduled there, behind whatever is
//! already queued, and its own entry settles without waiting for it.
//! Awaiting such work from within the operation deadlocks the outer queue.
use crate::{
    error::OperationError,
    metrics::METRICS,
    store::{self, Store, StoreFactory},
};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task,
};
use tokio::sync::watch;
use tracing::Instrument as _;

mod entry;

pub use entry::Entry;
use entry::{ResultReceiver, Status};

/// Name of the queues constructed without one.
const DEFAULT_NAME: &str = "queue";

/// Phase of the processing loop of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Processing loop is not running.
    Idle,
    /// An entry is executing, or its child queue is being drained.
    Running,
    /// An entry has just settled; the loop is picking the next one.
    Draining,
}

/// Configuration of a root queue. Child queues inherit it.
#[derive(Clone, Default)]
pub struct Config {
    /// Name used in logs. Defaults to "queue".
    pub name: Option<String>,
    /// Factory of the FIFO store. Defaults to `store::default_factory()`.
    pub store: Option<StoreFactory>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("custom_store", &self.store.is_some())
            .finish()
    }
}

/// State guarded by the queue mutex. The mutex is never held across an await.
struct State {
    store: Box<dyn Store<Entry>>,
    phase: Phase,
    next_id: u64,
}

struct Inner {
    /// Base name, shared by the whole tree of child queues.
    name: Arc<str>,
    /// Nesting depth: 0 for root queues, parent's depth + 1 for child queues.
    depth: usize,
    factory: StoreFactory,
    state: Mutex<State>,
    /// Number of entries enqueued but not settled yet (including the running one).
    size: watch::Sender<usize>,
}

/// Serializing task queue. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct AsyncQueue(Arc<Inner>);

impl fmt::Debug for AsyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueue")
            .field("name", &self.name())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl Default for AsyncQueue {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl AsyncQueue {
    /// Constructs an idle queue with the given name and the default store.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(Config {
            name: Some(name.into()),
            store: None,
        })
    }

    /// Constructs an idle queue.
    pub fn with_config(cfg: Config) -> Self {
        let name = cfg.name.unwrap_or_else(|| DEFAULT_NAME.to_owned());
        let factory = cfg.store.unwrap_or_else(store::default_factory);
        Self::make(name.into(), 0, factory)
    }

    fn make(name: Arc<str>, depth: usize, factory: StoreFactory) -> Self {
        let (size, _) = watch::channel(0);
        Self(Arc::new(Inner {
            state: Mutex::new(State {
                store: factory(),
                phase: Phase::Idle,
                next_id: 0,
            }),
            name,
            depth,
            factory,
            size,
        }))
    }

    /// Constructs the scope of an entry dispatched from this queue.
    fn child(&self) -> Self {
        METRICS.child_scopes.inc();
        Self::make(self.0.name.clone(), self.0.depth + 1, self.0.factory.clone())
    }

    /// Name of the queue. Child queues get the depth appended, e.g. `name[2]`.
    pub fn name(&self) -> String {
        match self.0.depth {
            0 => self.0.name.to_string(),
            depth => format!("{}[{depth}]", self.0.name),
        }
    }

    /// Nesting depth of the queue: 0 for a root queue.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// Number of entries enqueued but not settled yet,
    /// including the one currently executing.
    pub fn size(&self) -> usize {
        *self.0.size.borrow()
    }

    /// Current phase of the processing loop.
    pub fn phase(&self) -> Phase {
        self.0.state.lock().unwrap().phase
    }

    /// Checks if the processing loop is stopped.
    pub fn is_idle(&self) -> bool {
        self.phase() == Phase::Idle
    }

    /// Enqueues an asynchronous operation.
    ///
    /// The operation is never executed before `enqueue` returns. It receives
    /// the child queue of its entry as the argument. The returned future
    /// settles once the operation has completed and its child queue has been
    /// drained. Dropping the returned future does not cancel the operation.
    ///
    /// Has to be called from within a tokio runtime.
    pub fn enqueue<T, F, Fut>(&self, operation: F) -> Settled<T>
    where
        T: 'static + Send,
        F: 'static + Send + FnOnce(AsyncQueue) -> Fut,
        Fut: 'static + Send + Future<Output = anyhow::Result<T>>,
    {
        let mut state = self.0.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let (entry, recv) = Entry::new(id, operation);
        // The size is bumped before the push, so that `drained()` never observes
        // an empty queue while an entry is stored. Nobody waits for it to grow.
        self.0.size.send_if_modified(|n| {
            *n += 1;
            false
        });
        let len = state.store.push(entry);
        METRICS.enqueued.inc();
        tracing::trace!(queue = %self.name(), id, len, "enqueued");
        if state.phase == Phase::Idle {
            state.phase = Phase::Running;
            drop(state);
            let span = tracing::debug_span!("async_queue", name = %self.name(), depth = self.0.depth);
            tokio::spawn(self.clone().run().instrument(span));
        }
        Settled(recv)
    }

    /// Enqueues a synchronous operation.
    /// Its error (or panic) is reported exactly like the one of an asynchronous operation.
    pub fn enqueue_sync<T, F>(&self, operation: F) -> Settled<T>
    where
        T: 'static + Send,
        F: 'static + Send + FnOnce(AsyncQueue) -> anyhow::Result<T>,
    {
        self.enqueue(move |child| std::future::ready(operation(child)))
    }

    /// Waits until the queue has no pending or executing entries.
    pub fn drained(&self) -> impl 'static + Send + Future<Output = ()> {
        let mut size = self.0.size.subscribe();
        async move {
            // `Inner` (and hence the sender) outlives every non-empty state.
            let _ = size.wait_for(|n| *n == 0).await;
        }
    }

    /// Pops the next entry, or marks the queue idle if there is none.
    fn next(&self) -> Option<Entry> {
        let mut state = self.0.state.lock().unwrap();
        let entry = state.store.pop_front();
        state.phase = match entry {
            Some(_) => Phase::Running,
            None => Phase::Idle,
        };
        entry
    }

    /// Processing loop: dispatches the entries one by one until the store is empty.
    async fn run(self) {
        while let Some(entry) = self.next() {
            let id = entry.id();
            tracing::debug!(id, "dispatching");
            let latency = METRICS.settle_latency.start();
            let outcome = entry
                .dispatch(self.child())
                .instrument(tracing::debug_span!("entry", id))
                .await;
            latency.observe();
            match outcome.status() {
                Status::Succeeded => METRICS.succeeded.inc(),
                Status::Failed => METRICS.failed.inc(),
                Status::Panicked => METRICS.panicked.inc(),
            };
            self.0.state.lock().unwrap().phase = Phase::Draining;
            self.0.size.send_modify(|n| *n -= 1);
            tracing::debug!(id, status = ?outcome.status(), "settled");
            outcome.deliver();
        }
        tracing::debug!("idle");
    }
}

/// Future returned by `AsyncQueue::enqueue`.
/// Resolves to the result of the operation once its entry settles.
#[pin_project::pin_project]
pub struct Settled<T>(#[pin] ResultReceiver<T>);

impl<T> fmt::Debug for Settled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled").finish_non_exhaustive()
    }
}

impl<T> Future for Settled<T> {
    type Output = Result<T, OperationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        match self.project().0.poll(cx) {
            task::Poll::Ready(Ok(res)) => task::Poll::Ready(res),
            // The sender is dropped without sending only if the runtime is
            // shutting down, in which case the entry will never settle.
            task::Poll::Ready(Err(_)) | task::Poll::Pending => task::Poll::Pending,
        }
    }
}
