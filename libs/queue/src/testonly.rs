//! Testonly utilities for queue tests.
use std::{
    future::Future,
    io::IsTerminal as _,
    sync::{Arc, Mutex},
};
use tokio::sync::Semaphore;

/// Routes the queue's `tracing` events into the captured test output.
/// Verbosity is controlled with `RUST_LOG`; repeated calls are ignored.
pub fn init_tracing() {
    let colored = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .with_ansi(colored)
        .with_target(false)
        .try_init()
        .ok();
}

/// Runs `scenario` to completion once per tokio runtime flavor the queue
/// supports: first on a current-thread runtime, then on a multi-thread one.
pub fn with_runtimes<Fut: Future>(scenario: impl Fn() -> Fut) {
    let builders: [(&str, fn() -> tokio::runtime::Builder); 2] = [
        ("current_thread", tokio::runtime::Builder::new_current_thread),
        ("multi_thread", tokio::runtime::Builder::new_multi_thread),
    ];
    for (flavor, builder) in builders {
        let runtime = builder().enable_all().build().unwrap();
        let _guard = tracing::info_span!("runtime", flavor).entered();
        runtime.block_on(scenario());
    }
}

/// Barrier which stays closed until a test opens it.
/// Operations can await it to stay in the running state for as long as the test wants.
#[derive(Clone, Debug)]
pub struct Gate(Arc<Semaphore>);

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Constructs a closed gate.
    pub fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    /// Opens the gate, waking all the waiters. Idempotent.
    pub fn open(&self) {
        // No permits are ever added, so closing the semaphore is the only way
        // for `acquire()` to return.
        self.0.close();
    }

    /// Waits until the gate is opened.
    pub async fn wait(&self) {
        let res = self.0.acquire().await;
        debug_assert!(res.is_err());
    }
}

/// Shared log of events, for asserting the order in which operations ran.
#[derive(Clone, Debug, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    /// Checks if `event` has been logged and not taken yet.
    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == event)
    }

    /// Removes and returns all the events logged so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}
