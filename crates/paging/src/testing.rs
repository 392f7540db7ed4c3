//! Test doubles, only available when the `test` feature is enabled.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use env_logger::Env;
use futures::FutureExt as _;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::source::{FetchFuture, Fetched, Source};

/// Initialise `env_logger` for tests, once.
pub fn enable_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

/// Error returned by [`MemorySource`] when told to fail.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("injected failure fetching start={start} len={len}")]
pub struct InjectedFailure {
    pub start: usize,
    pub len: usize,
}

/// A [`Source`] backed by a vector.
///
/// Records every fetch it is asked for, and can hold responses back until
/// released, or fail a number of fetches.
/// Windows beyond the end of the vector yield empty responses.
pub struct MemorySource<T> {
    items: Arc<Mutex<Vec<T>>>,
    calls: Mutex<Vec<(usize, usize)>>,
    gate: Option<Arc<Semaphore>>,
    failures: Arc<AtomicUsize>,
}

impl<T> MemorySource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items.into_iter().collect())),
            calls: Mutex::new(Vec::new()),
            gate: None,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every fetch wait for a call to [`Self::release`] or [`Self::open`]
    /// before responding.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` waiting (or future) fetches respond.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Let all fetches respond from now on.
    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    /// Fail the next `n` fetches to respond.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Replace the backing vector.
    ///
    /// Fetches waiting at the gate respond with the new contents.
    pub fn replace(&self, items: impl IntoIterator<Item = T>) {
        *self.items.lock() = items.into_iter().collect();
    }

    /// The windows `(start, len)` fetched so far, in the order requested.
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Source for MemorySource<T> {
    type Item = T;
    type Error = InjectedFailure;

    fn fetch(&self, start: usize, len: usize) -> FetchFuture<T, InjectedFailure> {
        self.calls.lock().push((start, len));
        let items = self.items.clone();
        let gate = self.gate.clone();
        let failures = self.failures.clone();
        async move {
            if let Some(gate) = gate {
                // A closed gate is an open gate.
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            let fail = failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(InjectedFailure { start, len });
            }

            let items = items.lock();
            let total_count = items.len();
            let window = start.min(total_count)..start.saturating_add(len).min(total_count);
            Ok(Fetched {
                total_count,
                start,
                items: items[window].to_vec(),
            })
        }
        .boxed()
    }
}
