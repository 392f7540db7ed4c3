use std::{fmt, ops::RangeInclusive};

use futures::future::{BoxFuture, Shared};

use crate::error::LoadError;

/// The load state of a page.
///
/// The state, not the buffer, decides whether a page's contents are
/// trustworthy: a page created by reshaping the table may already hold
/// values salvaged from the pages it replaced, but stays [`PageState::NotLoaded`]
/// until its own fetch completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageState {
    NotLoaded,
    Loading,
    Loaded,
    Invalid,
}

impl PageState {
    /// Whether a read of the page should issue a fetch.
    pub fn needs_load(self) -> bool {
        matches!(self, Self::NotLoaded | Self::Invalid)
    }
}

/// Identity of a page object.
///
/// Every page created by the table gets a fresh id, including the remainders
/// split off an existing page. Two snapshots with the same id thus refer to
/// the same, unreshaped page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub(crate) u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// A point-in-time snapshot of a page, obtained via [`crate::VirtualList::pages`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub id: PageId,
    pub start: usize,
    pub len: usize,
    pub state: PageState,
    /// Whether the page's buffer has been allocated, i.e. any slot was ever written.
    pub has_items: bool,
    /// The load the page is waiting for, if any.
    ///
    /// Pages split off a loading page keep waiting for the same load.
    pub load: Option<u64>,
}

impl PageInfo {
    pub fn last(&self) -> usize {
        self.start + self.len - 1
    }

    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.last()
    }
}

pub(crate) type LoadId = u64;

/// Resolves once the background load has been applied to the page table.
pub(crate) type Done = Shared<BoxFuture<'static, Result<(), LoadError>>>;

/// Handle to the in-flight load of a page.
#[derive(Clone)]
pub(crate) struct Loading {
    pub id: LoadId,
    pub done: Done,
}

impl fmt::Debug for Loading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loading").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A contiguous window `start..start + len` of the sequence.
///
/// `start` and `len` never change after creation;
/// only the buffer contents, the state and the in-flight load do.
#[derive(Debug)]
pub(crate) struct Page<T> {
    pub id: PageId,
    pub start: usize,
    pub len: usize,
    pub state: PageState,
    /// Present while a load issued for this page (or the page it was split off) is in flight.
    pub loading: Option<Loading>,
    /// Allocated on first write.
    items: Option<Box<[Option<T>]>>,
}

impl<T: Clone> Page<T> {
    pub fn new(id: PageId, start: usize, len: usize) -> Self {
        debug_assert!(len > 0, "pages cover at least one position");
        Self {
            id,
            start,
            len,
            state: PageState::NotLoaded,
            loading: None,
            items: None,
        }
    }

    /// A page covering `first..=last`, which must lie within `self`,
    /// with the same state, in-flight load and known values as `self`.
    pub fn remainder(&self, id: PageId, first: usize, last: usize) -> Self {
        debug_assert!(self.start <= first && first <= last && last <= self.last());
        let mut page = Self::new(id, first, last - first + 1);
        page.state = self.state;
        page.loading = self.loading.clone();
        for (position, value) in self.known().filter(|(position, _)| (first..=last).contains(position)) {
            page.set(position, value.clone());
        }
        page
    }

    pub fn last(&self) -> usize {
        self.start + self.len - 1
    }

    pub fn contains(&self, position: usize) -> bool {
        self.start <= position && position <= self.last()
    }

    /// Whether the page intersects `first..=last`.
    pub fn overlaps(&self, first: usize, last: usize) -> bool {
        self.start <= last && first <= self.last()
    }

    pub fn has_items(&self) -> bool {
        self.items.is_some()
    }

    /// The value at absolute `position`, if one is known.
    pub fn get(&self, position: usize) -> Option<&T> {
        if !self.contains(position) {
            return None;
        }
        self.items.as_ref()?[position - self.start].as_ref()
    }

    /// Store `value` at absolute `position`, which must be covered by the page.
    pub fn set(&mut self, position: usize, value: T) {
        debug_assert!(self.contains(position));
        let len = self.len;
        let items = self
            .items
            .get_or_insert_with(|| std::iter::repeat_with(|| None).take(len).collect());
        items[position - self.start] = Some(value);
    }

    /// Store `values` starting at absolute `position`.
    pub fn fill(&mut self, position: usize, values: impl IntoIterator<Item = T>) {
        for (offset, value) in values.into_iter().enumerate() {
            self.set(position + offset, value);
        }
    }

    /// Iterate over the known values and their absolute positions.
    pub fn known(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        let start = self.start;
        self.items
            .iter()
            .flat_map(|items| items.iter().enumerate())
            .filter_map(move |(offset, slot)| slot.as_ref().map(|value| (start + offset, value)))
    }

    pub fn info(&self) -> PageInfo {
        PageInfo {
            id: self.id,
            start: self.start,
            len: self.len,
            state: self.state,
            has_items: self.has_items(),
            load: self.loading.as_ref().map(|loading| loading.id),
        }
    }
}
