use std::{fmt, ops::Range, sync::Arc};

use log::debug;
use tokio::sync::broadcast;

use crate::{
    error::{Error, LoadError, Mutation},
    loader::{Loader, State},
    notify::{KnownCount, Property},
    page::{PageInfo, PageState},
    pages::align,
    source::Source,
    Options,
};

/// A read-only, randomly indexable view over the sequence behind a [`Source`].
///
/// Reads never block: positions which have not been fetched yet read as
/// `None`, and a fetch of the page-aligned window around them is issued on a
/// background task. Once it completes, the values are served from the cache.
///
/// The handle is cheap to clone; clones share the same cache.
pub struct VirtualList<S: Source> {
    inner: Arc<Loader<S>>,
}

impl<S: Source> Clone for VirtualList<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Source> fmt::Debug for VirtualList<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualList")
            .field("page_size", &state.page_size)
            .field("total_count", &state.total_count)
            .field("pages", &state.pages.len())
            .finish()
    }
}

impl<S: Source> VirtualList<S> {
    /// Create a [`VirtualList`] over `source`.
    ///
    /// Fetches are driven by tasks spawned onto the provided tokio runtime.
    /// Nothing is fetched until the list is first read.
    pub fn new(source: S, runtime: tokio::runtime::Handle, opts: Options) -> Result<Self, Error> {
        if opts.page_size == 0 {
            return Err(Error::InvalidPageSize(opts.page_size));
        }
        if opts.event_capacity == 0 {
            return Err(Error::InvalidEventCapacity);
        }
        Ok(Self {
            inner: Arc::new(Loader::new(source, runtime, opts.page_size, opts.event_capacity)),
        })
    }

    /// The number of elements in the sequence, as last reported by the source.
    ///
    /// Returns `0` until the first fetch has completed. If nothing has been
    /// read yet, the first page is fetched so the count becomes known.
    pub fn count(&self) -> usize {
        let mut state = self.inner.state.lock();
        self.count_locked(&mut state)
    }

    /// The number of elements last reported by the source, without side effects.
    pub fn total_count(&self) -> Option<usize> {
        self.inner.state.lock().total_count
    }

    fn count_locked(&self, state: &mut State<S::Item>) -> usize {
        if let Some(count) = state.total_count {
            return count;
        }
        if state.pages.is_empty() {
            debug!("count unknown, fetching first page");
            let page_size = state.page_size;
            let idx = state.pages.ensure_window(0, page_size);
            self.inner.ensure_loaded(state, idx);
        }
        0
    }

    /// The element at `position`, or `None` if it is not known yet.
    ///
    /// If the page covering `position` has not been loaded, or has been
    /// invalidated, a fetch of the page-aligned window around it is issued.
    /// This includes positions at or beyond the last known [`Self::count`],
    /// so that growth of the sequence is picked up.
    ///
    /// Note that values salvaged from pages that were reshaped may be returned
    /// while the page covering them is still being (re)loaded.
    pub fn get(&self, position: usize) -> Option<S::Item> {
        let mut state = self.inner.state.lock();
        let idx = self.request(&mut state, position);
        state.pages[idx].get(position).cloned()
    }

    /// Like [`Self::get`], but waits for the load of the page covering
    /// `position` to complete first, if one is in flight or issued.
    ///
    /// If the response did not cover `position`, `Ok(None)` is returned.
    pub async fn get_loaded(&self, position: usize) -> Result<Option<S::Item>, LoadError> {
        let pending = {
            let mut state = self.inner.state.lock();
            let idx = self.request(&mut state, position);
            state.pages[idx].loading.as_ref().map(|loading| loading.done.clone())
        };
        if let Some(done) = pending {
            done.await?;
        }

        let state = self.inner.state.lock();
        Ok(state
            .pages
            .find(position)
            .and_then(|idx| state.pages[idx].get(position).cloned()))
    }

    /// Resolve the page covering `position`, issuing a load if necessary.
    fn request(&self, state: &mut State<S::Item>, position: usize) -> usize {
        let page_size = state.page_size;
        let idx = state.pages.page_containing(position, page_size);
        if !state.pages[idx].state.needs_load() {
            return idx;
        }
        let idx = state.pages.ensure_window(align(position, page_size), page_size);
        self.inner.ensure_loaded(state, idx);
        idx
    }

    /// Fetch the window `start..start + len`, unless it is already loaded
    /// or loading.
    ///
    /// The window need not be aligned to the page size; the page table is
    /// reshaped around it. The window must end at or before `usize::MAX`.
    pub fn prefetch(&self, start: usize, len: usize) -> Result<(), Error> {
        if len == 0 {
            return Err(Error::EmptyWindow { start });
        }
        if start.checked_add(len - 1).is_none() {
            return Err(Error::WindowOverflow { start, len });
        }
        let mut state = self.inner.state.lock();
        let idx = state.pages.ensure_window(start, len);
        self.inner.ensure_loaded(&mut state, idx);
        Ok(())
    }

    /// Wait for all loads in flight to complete.
    ///
    /// Loads issued while waiting are waited for as well.
    /// Failed loads are not reported here, see [`Self::get_loaded`].
    pub async fn settled(&self) {
        loop {
            let pending = self.inner.state.lock().pages.pending();
            if pending.is_empty() {
                break;
            }
            for done in pending {
                let _ = done.await;
            }
        }
    }

    /// The position of the first element equal to `value`, among the pages
    /// loaded so far.
    ///
    /// Positions which have not been fetched, or which belong to an
    /// invalidated page, are not searched.
    pub fn index_of(&self, value: &S::Item) -> Option<usize>
    where
        S::Item: PartialEq,
    {
        let state = self.inner.state.lock();
        state
            .pages
            .iter()
            .filter(|page| page.state != PageState::Invalid && page.has_items())
            .find_map(|page| page.known().find(|(_, known)| *known == value).map(|(pos, _)| pos))
    }

    /// Whether `value` is among the pages loaded so far, see [`Self::index_of`].
    pub fn contains(&self, value: &S::Item) -> bool
    where
        S::Item: PartialEq,
    {
        self.index_of(value).is_some()
    }

    /// Copy the loaded elements into `dest[offset..offset + count]`.
    ///
    /// Positions not covered by a [`PageState::Loaded`] page become `None`.
    pub fn copy_to(&self, dest: &mut [Option<S::Item>], offset: usize) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        let count = self.count_locked(&mut state);
        let required = offset.saturating_add(count);
        if dest.len() < required {
            return Err(Error::DestinationTooSmall {
                required,
                actual: dest.len(),
            });
        }

        let dest = &mut dest[offset..required];
        dest.fill(None);
        for page in state.pages.iter().filter(|page| page.state == PageState::Loaded) {
            for (pos, value) in page.known().take_while(|(pos, _)| *pos < count) {
                dest[pos] = Some(value.clone());
            }
        }
        Ok(())
    }

    /// Iterate over the positions `0..count`, as of the start of the iteration,
    /// reading every position via [`Self::get`].
    pub fn iter(&self) -> Iter<'_, S> {
        Iter {
            list: self,
            range: 0..self.count(),
        }
    }

    /// The size of pages created on demand.
    pub fn page_size(&self) -> usize {
        self.inner.state.lock().page_size
    }

    /// Change the size of pages created on demand.
    ///
    /// Existing pages are not resized.
    pub fn set_page_size(&self, page_size: usize) -> Result<(), Error> {
        if page_size == 0 {
            return Err(Error::InvalidPageSize(page_size));
        }
        let mut state = self.inner.state.lock();
        if state.page_size != page_size {
            debug!("page size changed from {} to {page_size}", state.page_size);
            state.page_size = page_size;
            self.inner.notifier.page_size_changed();
        }
        Ok(())
    }

    /// Mark the pages intersecting `range` as invalid, e.g. because the
    /// backing data changed. They are fetched again on their next read.
    ///
    /// Returns the number of pages invalidated.
    pub fn invalidate(&self, range: Range<usize>) -> usize {
        if range.is_empty() {
            return 0;
        }
        let invalidated = self.inner.state.lock().pages.invalidate(range.start, range.end - 1);
        debug!("invalidated {invalidated} page(s) in {range:?}");
        invalidated
    }

    /// Mark all pages as invalid, see [`Self::invalidate`].
    pub fn invalidate_all(&self) -> usize {
        let invalidated = self.inner.state.lock().pages.invalidate(0, usize::MAX);
        debug!("invalidated all {invalidated} page(s)");
        invalidated
    }

    /// A snapshot of the page table.
    pub fn pages(&self) -> Vec<PageInfo> {
        self.inner.state.lock().pages.snapshot()
    }

    /// Subscribe to [`Property`] change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Property> {
        self.inner.notifier.subscribe()
    }

    /// Obtain a handle to the total count reported by the source.
    pub fn watch_count(&self) -> KnownCount {
        self.inner.notifier.watch_count()
    }

    /// Always fails with [`Error::ReadOnly`].
    pub fn insert(&self, _position: usize, _value: S::Item) -> Result<(), Error> {
        Err(Error::ReadOnly(Mutation::Insert))
    }

    /// Always fails with [`Error::ReadOnly`].
    pub fn remove(&self, _position: usize) -> Result<S::Item, Error> {
        Err(Error::ReadOnly(Mutation::Remove))
    }

    /// Always fails with [`Error::ReadOnly`].
    pub fn set(&self, _position: usize, _value: S::Item) -> Result<(), Error> {
        Err(Error::ReadOnly(Mutation::Set))
    }

    /// Always fails with [`Error::ReadOnly`].
    pub fn clear(&self) -> Result<(), Error> {
        Err(Error::ReadOnly(Mutation::Clear))
    }
}

/// Iterator created by [`VirtualList::iter`].
pub struct Iter<'a, S: Source> {
    list: &'a VirtualList<S>,
    range: Range<usize>,
}

impl<S: Source> Iterator for Iter<'_, S> {
    type Item = Option<S::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.range.next().map(|position| self.list.get(position))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl<S: Source> ExactSizeIterator for Iter<'_, S> {}

impl<'a, S: Source> IntoIterator for &'a VirtualList<S> {
    type Item = Option<S::Item>;
    type IntoIter = Iter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
