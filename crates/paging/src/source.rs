//! The boundary to the backing data source.

use std::sync::Arc;

use futures::future::BoxFuture;

/// The response to a [`Source::fetch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched<T> {
    /// The length of the whole sequence, as currently known by the source.
    ///
    /// The source is authoritative: every response replaces the previously
    /// known count, which may thus grow or shrink over time.
    pub total_count: usize,
    /// The position of the first element in `items`.
    ///
    /// Need not equal the requested start, e.g. if the source aligns or
    /// clamps windows.
    pub start: usize,
    /// The elements at `start..start + items.len()`.
    ///
    /// May be shorter than requested, or empty if the requested window lies
    /// beyond the end of the sequence.
    pub items: Vec<T>,
}

/// Future returned by [`Source::fetch`].
///
/// This is a boxed future rather than an associated type, so that [`Source`]
/// can be used as a trait object without knowing the type of the future.
pub type FetchFuture<T, E> = BoxFuture<'static, Result<Fetched<T>, E>>;

/// The backing data source of a [`crate::VirtualList`].
///
/// The cache trusts and applies exactly what the source returns.
/// Retries, backoff and deadlines are the source's business:
/// a failed fetch is reported, but never retried by the cache.
pub trait Source: Send + Sync + 'static {
    /// The element type of the sequence.
    type Item: Clone + Send + Sync + 'static;
    /// The error a fetch may fail with.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the window `start..start + len` of the sequence.
    ///
    /// `len` is always greater than zero.
    ///
    /// This method is called while the page table is locked, and must not
    /// block. The returned future is driven on a background task, and is
    /// never polled while the page table is locked.
    fn fetch(&self, start: usize, len: usize) -> FetchFuture<Self::Item, Self::Error>;
}

impl<S: Source + ?Sized> Source for Arc<S> {
    type Item = S::Item;
    type Error = S::Error;

    fn fetch(&self, start: usize, len: usize) -> FetchFuture<Self::Item, Self::Error> {
        (**self).fetch(start, len)
    }
}
