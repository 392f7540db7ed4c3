//! A demand-paged, randomly indexable view over a large, externally backed sequence.
//!
//! [`VirtualList`] behaves like a read-only list whose elements live behind a
//! [`Source`], e.g. a remote query or a database cursor. Only the windows
//! ("pages") that have actually been read are fetched and cached. Reads never
//! block: a miss returns `None` and arranges a background fetch, after which
//! later reads of the same positions are served from the cache.
//!
//! The cached pages form a sorted table of disjoint fragments. When a window
//! with a different granularity than the cached pages is requested, the table
//! is reshaped around it, keeping whatever was already known about the
//! overlapping positions.

mod list;
mod loader;
mod page;
mod pages;

pub mod error;
pub mod notify;
pub mod source;

#[cfg(any(test, feature = "test"))]
pub mod testing;

pub use crate::{
    error::{Error, LoadError, Mutation},
    list::{Iter, VirtualList},
    notify::Property,
    page::{PageId, PageInfo, PageState},
    source::{FetchFuture, Fetched, Source},
};

/// [`VirtualList`] options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// The number of positions covered by a page which is created on demand,
    /// i.e. the size of the windows requested from the [`Source`] on a cache miss.
    ///
    /// Must be greater than zero.
    /// It can be changed later via [`VirtualList::set_page_size`],
    /// which does not resize pages that already exist.
    ///
    /// Default: 100
    pub page_size: usize,
    /// The capacity of the channel handed out by [`VirtualList::subscribe`].
    ///
    /// Subscribers which fall behind by more than this many notifications
    /// observe a lag error and skip the oldest ones.
    ///
    /// Must be greater than zero.
    ///
    /// Default: 64
    pub event_capacity: usize,
}

impl Options {
    pub const DEFAULT_PAGE_SIZE: usize = 100;
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}
