use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
};

use futures::FutureExt as _;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use tracing::instrument;

use crate::{
    error::LoadError,
    notify::Notifier,
    page::{Done, LoadId, Loading, PageState},
    pages::{clamp_len, Pages},
    source::{FetchFuture, Fetched, Source},
};

/// Everything guarded by the table lock.
#[derive(Debug)]
pub(crate) struct State<T> {
    pub pages: Pages<T>,
    pub page_size: usize,
    pub total_count: Option<usize>,
}

/// The state shared between a [`crate::VirtualList`] and its background loads.
pub(crate) struct Loader<S: Source> {
    source: S,
    runtime: tokio::runtime::Handle,
    pub state: Mutex<State<S::Item>>,
    pub notifier: Notifier,
    next_load: AtomicU64,
}

impl<S: Source> Loader<S> {
    pub fn new(source: S, runtime: tokio::runtime::Handle, page_size: usize, event_capacity: usize) -> Self {
        Self {
            source,
            runtime,
            state: Mutex::new(State {
                pages: Pages::default(),
                page_size,
                total_count: None,
            }),
            notifier: Notifier::new(event_capacity),
            next_load: AtomicU64::new(0),
        }
    }

    /// Issue a fetch for the page at `idx`, unless it is already loaded or loading.
    ///
    /// Returns the handle of the load the page is waiting for, if any.
    ///
    /// The fetch is issued right away, but its future is driven by a
    /// background task, which re-acquires the table lock once the source has
    /// responded. The caller must hold the lock, i.e.
    /// `state` is the content of [`Self::state`].
    pub fn ensure_loaded(self: &Arc<Self>, state: &mut State<S::Item>, idx: usize) -> Option<Done> {
        let page = &mut state.pages[idx];
        if !page.state.needs_load() {
            return page.loading.as_ref().map(|loading| loading.done.clone());
        }

        let id = self.next_load.fetch_add(1, Relaxed);
        let (start, len) = (page.start, page.len);
        debug!("load#{id}: fetching {} start={start} len={len}", page.id);

        let fetch = self.source.fetch(start, len);
        let this = Arc::downgrade(self);
        let done = self
            .runtime
            .spawn(self.clone().load(id, start, len, fetch))
            .map(move |res| {
                res.unwrap_or_else(|e| {
                    // The runtime is shutting down.
                    warn!("load#{id}: task did not complete: {e}");
                    if let Some(this) = this.upgrade() {
                        this.state.lock().pages.settle(id);
                    }
                    Err(LoadError::Aborted { start, len })
                })
            })
            .boxed()
            .shared();

        page.state = PageState::Loading;
        page.loading = Some(Loading { id, done: done.clone() });
        state.pages.track(id, done.clone());

        Some(done)
    }

    #[instrument(name = "virtseq::load", skip(self, fetch))]
    async fn load(
        self: Arc<Self>,
        id: LoadId,
        start: usize,
        len: usize,
        fetch: FetchFuture<S::Item, S::Error>,
    ) -> Result<(), LoadError> {
        let res = AssertUnwindSafe(fetch).catch_unwind().await;
        match res {
            Ok(Ok(fetched)) => {
                self.commit(id, fetched);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("load#{id}: fetch start={start} len={len} failed: {e}");
                self.state.lock().pages.settle(id);
                Err(LoadError::Fetch {
                    start,
                    len,
                    source: Arc::new(e),
                })
            }
            Err(_) => {
                warn!("load#{id}: fetch start={start} len={len} panicked");
                self.state.lock().pages.settle(id);
                Err(LoadError::Aborted { start, len })
            }
        }
    }

    /// Apply the response of load `id` to the table.
    fn commit(&self, id: LoadId, fetched: Fetched<S::Item>) {
        let Fetched {
            total_count,
            start,
            mut items,
        } = fetched;
        if items.len() > clamp_len(start, items.len()) {
            warn!(
                "load#{id}: response start={start} len={} overflows, truncating",
                items.len()
            );
            items.truncate(clamp_len(start, items.len()));
        }

        let mut state = self.state.lock();
        if state.total_count != Some(total_count) {
            debug!(
                "load#{id}: total count changed from {:?} to {total_count}",
                state.total_count
            );
            state.total_count = Some(total_count);
            self.notifier.count_changed(total_count);
        }

        if !items.is_empty() {
            let len = items.len();
            let stale = state.pages.is_stale(id);
            let window = state.pages.carve(start, len);
            let page = &mut state.pages[window.idx];
            page.fill(start, items);
            // Positions invalidated while the fetch was in flight stay
            // invalid, and the result of a load whose pages were invalidated
            // never counts as loaded.
            if window.invalid {
                page.state = PageState::Invalid;
                page.loading = None;
            } else if !stale {
                page.state = PageState::Loaded;
                page.loading = None;
            }
            trace!("load#{id}: committed {} start={start} len={len} as {:?}", page.id, page.state);
        }

        state.pages.settle(id);
    }
}
