//! Provides [`Pages`], the sorted table of page fragments and the algorithm
//! reshaping it around newly requested windows.

use core::ops::{Index, IndexMut};

use log::trace;
use smallvec::SmallVec;
use virtseq_data_structures::binary_search::binary_search_by;

use crate::page::{Done, LoadId, Loading, Page, PageId, PageInfo, PageState};

/// The page table.
///
/// Pages are sorted by their start position and pairwise disjoint,
/// i.e. `pages[i].last() < pages[i + 1].start`.
/// Positions not covered by any page have never been requested.
///
/// The table also tracks every load in flight, independently of the pages
/// waiting for it: a load whose pages were invalidated or reshaped away still
/// writes its result when it completes.
#[derive(Debug)]
pub(crate) struct Pages<T> {
    pages: Vec<Page<T>>,
    in_flight: Vec<InFlight>,
    next_id: u64,
}

#[derive(Debug)]
struct InFlight {
    load: Loading,
    /// Some page waiting for the load was invalidated.
    stale: bool,
}

/// The page created or found by [`Pages::carve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Window {
    pub idx: usize,
    /// Some page the window was carved from (or the page itself) is
    /// [`PageState::Invalid`].
    pub invalid: bool,
}

impl<T> Default for Pages<T> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            in_flight: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> Index<usize> for Pages<T> {
    type Output = Page<T>;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.pages[idx]
    }
}

impl<T> IndexMut<usize> for Pages<T> {
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.pages[idx]
    }
}

impl<T: Clone> Pages<T> {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page<T>> {
        self.pages.iter()
    }

    fn alloc_id(&mut self) -> PageId {
        let id = PageId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Find the page starting exactly at `start`,
    /// or the index at which such a page would be inserted.
    fn search_start(&self, start: usize) -> Result<usize, usize> {
        binary_search_by(&self.pages, |page| page.start.cmp(&start))
    }

    /// The index of the page covering `position`, if any.
    pub fn find(&self, position: usize) -> Option<usize> {
        match self.search_start(position) {
            Ok(idx) => Some(idx),
            Err(idx) if idx > 0 && self.pages[idx - 1].contains(position) => Some(idx - 1),
            Err(_) => None,
        }
    }

    /// Make sure the table contains a page covering exactly `start..start + len`,
    /// and return its index.
    ///
    /// `len` is shortened if the window would extend past `usize::MAX`.
    ///
    /// If such a page already exists, it is returned unchanged.
    /// Otherwise, a new page is created and every page intersecting the window
    /// is carved up:
    ///
    /// - the parts of an intersecting page before and after the window survive
    ///   as remainder pages, with the original page's state and in-flight load;
    /// - values already known for positions inside the window are copied into
    ///   the new page, which nevertheless starts out [`PageState::NotLoaded`];
    /// - the intersecting pages themselves are removed.
    pub fn ensure_window(&mut self, start: usize, len: usize) -> usize {
        self.carve(start, len).idx
    }

    /// Like [`Self::ensure_window`], but also reports whether the window
    /// covers positions of an invalidated page.
    pub fn carve(&mut self, start: usize, len: usize) -> Window {
        debug_assert!(len > 0, "windows cover at least one position");
        let len = clamp_len(start, len);
        let last = start + (len - 1);

        let found = self.search_start(start);
        if let Ok(idx) = found
            && self.pages[idx].len == len
        {
            return Window {
                idx,
                invalid: self.pages[idx].state == PageState::Invalid,
            };
        }

        // `[lo, hi)` are the pages intersecting the window.
        // Since pages are disjoint, at most one page before the insertion
        // point can reach into the window, but walk back to be sure.
        let mut lo = match found {
            Ok(idx) | Err(idx) => idx,
        };
        while lo > 0 && self.pages[lo - 1].last() >= start {
            lo -= 1;
        }
        let mut hi = lo;
        while hi < self.pages.len() && self.pages[hi].start <= last {
            hi += 1;
        }

        let replaced: SmallVec<[Page<T>; 4]> = self.pages.drain(lo..hi).collect();
        let mut window = Page::new(self.alloc_id(), start, len);
        let mut prefix = None;
        let mut suffix = None;

        // Walk from the highest page down; the suffix can only come from the
        // highest intersecting page, the prefix only from the lowest.
        for old in replaced.iter().rev() {
            if old.last() > last {
                suffix = Some(old.remainder(self.alloc_id(), last + 1, old.last()));
            }
            for (position, value) in old.known().filter(|(position, _)| (start..=last).contains(position)) {
                window.set(position, value.clone());
            }
            if old.start < start {
                prefix = Some(old.remainder(self.alloc_id(), old.start, start - 1));
            }
        }
        let invalid = replaced.iter().any(|old| old.state == PageState::Invalid);

        trace!(
            "window start={start} len={len}: replaced {} page(s), prefix={:?} suffix={:?}",
            replaced.len(),
            prefix.as_ref().map(|p: &Page<T>| p.info().range()),
            suffix.as_ref().map(|p: &Page<T>| p.info().range()),
        );

        let idx = lo + usize::from(prefix.is_some());
        self.pages
            .splice(lo..lo, prefix.into_iter().chain(Some(window)).chain(suffix));
        debug_assert!(self.check_invariants(), "page table corrupted: {:?}", self.snapshot());
        Window { idx, invalid }
    }

    /// The index of the page covering `position`.
    ///
    /// If no page covers it, the page-aligned window of `page_size` positions
    /// around `position` is created via [`Self::ensure_window`].
    pub fn page_containing(&mut self, position: usize, page_size: usize) -> usize {
        match self.find(position) {
            Some(idx) => idx,
            None => self.ensure_window(align(position, page_size), page_size),
        }
    }

    /// Mark every page intersecting `first..=last` as [`PageState::Invalid`],
    /// returning how many pages were affected.
    ///
    /// The in-flight load of an invalidated page, if any, is marked stale:
    /// its result will still be written when it arrives, but won't make any
    /// page [`PageState::Loaded`].
    pub fn invalidate(&mut self, first: usize, last: usize) -> usize {
        let mut invalidated = 0;
        for page in self.pages.iter_mut().filter(|page| page.overlaps(first, last)) {
            page.state = PageState::Invalid;
            if let Some(loading) = page.loading.take() {
                for load in self.in_flight.iter_mut().filter(|load| load.load.id == loading.id) {
                    load.stale = true;
                }
            }
            invalidated += 1;
        }
        invalidated
    }

    /// Record the load `id` as in flight.
    pub fn track(&mut self, id: LoadId, done: Done) {
        self.in_flight.push(InFlight {
            load: Loading { id, done },
            stale: false,
        });
    }

    /// Whether pages waiting for the load `id` were invalidated since it was issued.
    pub fn is_stale(&self, id: LoadId) -> bool {
        self.in_flight.iter().any(|load| load.load.id == id && load.stale)
    }

    /// Forget the load `id`, which has completed.
    ///
    /// Pages still waiting for it were not covered by its result,
    /// and become [`PageState::NotLoaded`] so the next access fetches them again.
    pub fn settle(&mut self, id: LoadId) {
        self.in_flight.retain(|load| load.load.id != id);
        for page in &mut self.pages {
            if page.loading.as_ref().is_some_and(|loading| loading.id == id) {
                page.loading = None;
                if page.state == PageState::Loading {
                    page.state = PageState::NotLoaded;
                }
            }
        }
    }

    /// Handles to all loads currently in flight.
    pub fn pending(&self) -> Vec<Done> {
        self.in_flight.iter().map(|load| load.load.done.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<PageInfo> {
        self.pages.iter().map(Page::info).collect()
    }

    /// Whether the pages are sorted by start and pairwise disjoint.
    pub fn check_invariants(&self) -> bool {
        self.pages.windows(2).all(|pair| pair[0].last() < pair[1].start)
    }
}

/// The start of the `page_size`-aligned window containing `position`.
pub(crate) fn align(position: usize, page_size: usize) -> usize {
    position / page_size * page_size
}

/// `len`, shortened so that the window `start..start + len` ends at or before
/// `usize::MAX`.
pub(crate) fn clamp_len(start: usize, len: usize) -> usize {
    let max = usize::MAX - start;
    if len > max { max.saturating_add(1) } else { len }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn windows(pages: &Pages<u32>) -> Vec<(usize, usize, PageState)> {
        pages.iter().map(|p| (p.start, p.len, p.state)).collect()
    }

    fn values(pages: &Pages<u32>, idx: usize) -> Vec<Option<u32>> {
        let page = &pages[idx];
        (page.start..=page.last()).map(|pos| page.get(pos).copied()).collect()
    }

    fn assert_sorted_disjoint(pages: &Pages<u32>) {
        assert!(
            pages.check_invariants(),
            "pages overlap or are out of order: {:?}",
            pages.snapshot()
        );
    }

    /// A loaded page `start..start + len` with value `pos` at position `pos`.
    fn loaded(pages: &mut Pages<u32>, start: usize, len: usize) -> usize {
        let idx = pages.ensure_window(start, len);
        let page = &mut pages[idx];
        page.fill(start, (start..start + len).map(|pos| pos as u32));
        page.state = PageState::Loaded;
        idx
    }

    #[test]
    fn ensure_window_is_idempotent() {
        let mut pages = Pages::<u32>::default();
        let a = pages.ensure_window(10, 10);
        let id = pages[a].id;
        let b = pages.ensure_window(10, 10);
        assert_eq!(a, b);
        assert_eq!(pages[b].id, id);
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn disjoint_windows_are_inserted_in_order() {
        let mut pages = Pages::<u32>::default();
        pages.ensure_window(20, 10);
        pages.ensure_window(0, 10);
        pages.ensure_window(40, 5);
        pages.ensure_window(30, 10);
        assert_eq!(
            windows(&pages),
            [
                (0, 10, PageState::NotLoaded),
                (20, 10, PageState::NotLoaded),
                (30, 10, PageState::NotLoaded),
                (40, 5, PageState::NotLoaded),
            ]
        );
    }

    #[test]
    fn split_preserves_known_values() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 10);

        let idx = pages.ensure_window(3, 4);
        assert_eq!(
            windows(&pages),
            [
                (0, 3, PageState::Loaded),
                (3, 4, PageState::NotLoaded),
                (7, 3, PageState::Loaded),
            ]
        );
        assert_eq!(idx, 1);
        assert_eq!(values(&pages, 0), [Some(0), Some(1), Some(2)]);
        assert_eq!(values(&pages, 1), [Some(3), Some(4), Some(5), Some(6)]);
        assert_eq!(values(&pages, 2), [Some(7), Some(8), Some(9)]);
    }

    #[test]
    fn merge_subsumes_fragments() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 10);
        pages.ensure_window(3, 4);

        let idx = pages.ensure_window(0, 10);
        assert_eq!(windows(&pages), [(0, 10, PageState::NotLoaded)]);
        assert_eq!(values(&pages, idx), (0..10).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn window_spanning_several_pages() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 10);
        loaded(&mut pages, 10, 10);
        loaded(&mut pages, 20, 10);

        let idx = pages.ensure_window(5, 20);
        assert_eq!(
            windows(&pages),
            [
                (0, 5, PageState::Loaded),
                (5, 20, PageState::NotLoaded),
                (25, 5, PageState::Loaded),
            ]
        );
        assert_eq!(values(&pages, idx), (5..25).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn window_over_a_gap_keeps_slots_empty() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 4);
        loaded(&mut pages, 8, 4);

        let idx = pages.ensure_window(2, 8);
        let expected = [Some(2), Some(3), None, None, None, None, Some(8), Some(9)];
        assert_eq!(values(&pages, idx), expected);
        assert_sorted_disjoint(&pages);
    }

    #[test]
    fn same_start_different_len() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 10);

        let idx = pages.ensure_window(0, 1);
        assert_eq!(idx, 0);
        assert_eq!(
            windows(&pages),
            [(0, 1, PageState::NotLoaded), (1, 9, PageState::Loaded)]
        );
        assert_eq!(values(&pages, 0), [Some(0)]);
    }

    #[test]
    fn page_containing_prefers_existing_pages() {
        let mut pages = Pages::<u32>::default();
        pages.ensure_window(5, 3);

        // Covered by the existing, unaligned page.
        assert_eq!(pages.page_containing(6, 10), 0);
        assert_eq!(pages.len(), 1);

        // Not covered: the aligned window is carved around the existing page.
        let idx = pages.page_containing(12, 10);
        assert_eq!((pages[idx].start, pages[idx].len), (10, 10));
        assert_eq!(windows(&pages).len(), 2);

        let idx = pages.page_containing(2, 10);
        assert_eq!((pages[idx].start, pages[idx].len), (0, 10));
        assert_eq!(
            windows(&pages),
            [(0, 10, PageState::NotLoaded), (10, 10, PageState::NotLoaded)]
        );
    }

    #[test]
    fn invalidate_marks_intersecting_pages() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 10);
        loaded(&mut pages, 10, 10);
        loaded(&mut pages, 20, 10);

        assert_eq!(pages.invalidate(5, 14), 2);
        assert_eq!(
            windows(&pages),
            [
                (0, 10, PageState::Invalid),
                (10, 10, PageState::Invalid),
                (20, 10, PageState::Loaded),
            ]
        );
        assert_eq!(pages.invalidate(30, 30), 0);
    }

    #[test]
    fn find_does_not_create_pages() {
        let mut pages = Pages::<u32>::default();
        pages.ensure_window(10, 10);
        assert_eq!(pages.find(10), Some(0));
        assert_eq!(pages.find(19), Some(0));
        assert_eq!(pages.find(20), None);
        assert_eq!(pages.find(3), None);
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn windows_are_clamped_at_the_end_of_the_address_space() {
        let mut pages = Pages::<u32>::default();
        let start = align(usize::MAX, 10);
        let idx = pages.page_containing(usize::MAX, 10);
        assert_eq!((pages[idx].start, pages[idx].last()), (start, usize::MAX));
        assert_eq!(pages[idx].len, usize::MAX - start + 1);

        let idx = pages.ensure_window(usize::MAX - 1, 5);
        assert_eq!((pages[idx].start, pages[idx].len), (usize::MAX - 1, 2));
        assert_eq!(pages.find(usize::MAX), Some(idx));
        assert_sorted_disjoint(&pages);

        assert_eq!(clamp_len(0, usize::MAX), usize::MAX);
        assert_eq!(clamp_len(usize::MAX, 10), 1);
        assert_eq!(clamp_len(5, 10), 10);
    }

    #[test]
    fn carve_reports_invalidated_sources() {
        let mut pages = Pages::<u32>::default();
        loaded(&mut pages, 0, 10);
        loaded(&mut pages, 10, 10);
        pages.invalidate(12, 12);

        assert_eq!(pages.carve(2, 5), Window { idx: 1, invalid: false });
        assert_eq!(pages.carve(8, 4), Window { idx: 3, invalid: true });
        // Fast path.
        assert!(pages.carve(12, 8).invalid);
        assert!(!pages.carve(0, 2).invalid);
    }

    #[test]
    fn invalidated_loads_stay_in_flight_until_settled() {
        use futures::FutureExt as _;

        let mut pages = Pages::<u32>::default();
        let idx = pages.ensure_window(0, 10);
        let done: Done = futures::future::ready(Ok(())).boxed().shared();
        pages[idx].state = PageState::Loading;
        pages[idx].loading = Some(Loading { id: 4, done: done.clone() });
        pages.track(4, done);
        assert!(!pages.is_stale(4));

        pages.invalidate(3, 3);
        assert!(pages.is_stale(4));
        assert!(pages[idx].loading.is_none());
        assert_eq!(pages.pending().len(), 1);

        pages.settle(4);
        assert!(!pages.is_stale(4));
        assert!(pages.pending().is_empty());
        assert_eq!(pages[idx].state, PageState::Invalid);
    }

    #[test]
    fn align_to_page_size() {
        assert_eq!(align(0, 10), 0);
        assert_eq!(align(9, 10), 0);
        assert_eq!(align(10, 10), 10);
        assert_eq!(align(12, 7), 7);
    }

    proptest! {
        #[test]
        fn table_stays_sorted_and_disjoint(requests in vec((0usize..200, 1usize..40), 1..50)) {
            let mut pages = Pages::<u32>::default();
            for (start, len) in requests {
                let idx = pages.ensure_window(start, len);
                prop_assert_eq!((pages[idx].start, pages[idx].len), (start, len));
                assert_sorted_disjoint(&pages);
            }
        }

        #[test]
        fn reshaping_never_loses_known_values(requests in vec((0usize..200, 1usize..40), 1..50)) {
            // Every page starts out filled with `pos` at position `pos`,
            // so any value found anywhere must sit at its own position,
            // and every position ever filled must still be known.
            let mut pages = Pages::<u32>::default();
            let mut filled = std::collections::BTreeSet::new();
            for (start, len) in requests {
                let idx = loaded(&mut pages, start, len);
                prop_assert_eq!(pages[idx].len, len);
                filled.extend(start..start + len);
            }
            for page in pages.iter() {
                for (pos, value) in page.known() {
                    prop_assert_eq!(*value as usize, pos);
                }
            }
            for pos in filled {
                let idx = pages.find(pos);
                prop_assert!(idx.is_some_and(|idx| pages[idx].get(pos) == Some(&(pos as u32))));
            }
        }
    }
}
