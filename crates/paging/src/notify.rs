//! Change notifications for reactive consumers of a [`crate::VirtualList`].

use std::fmt;

use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// A property of a [`crate::VirtualList`] whose value changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    /// The total count reported by the source.
    Count,
    /// The page size used for pages created on demand.
    PageSize,
}

impl Property {
    /// The name of the property, as used by data-binding layers.
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "Count",
            Self::PageSize => "PageSize",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("the virtual list went away")]
pub struct ListDropped;

/// Handle to the total count, obtained via [`crate::VirtualList::watch_count`].
///
/// The handle can be used to read the last count reported by the source,
/// or wait for a count satisfying some condition to be reported.
#[derive(Clone)]
pub struct KnownCount {
    inner: watch::Receiver<Option<usize>>,
}

impl KnownCount {
    /// The last count reported by the source, or `None` if no fetch has
    /// completed yet.
    pub fn get(&self) -> Option<usize> {
        *self.inner.borrow()
    }

    /// Wait until the source reports a count for which `f` returns `true`.
    ///
    /// Returns immediately if the current count satisfies the condition.
    /// Returns `Err` if the list is dropped before that happens.
    pub async fn wait_for(&mut self, mut f: impl FnMut(usize) -> bool) -> Result<usize, ListDropped> {
        let count = self
            .inner
            .wait_for(|count| count.is_some_and(&mut f))
            .await
            .map_err(|_| ListDropped)?;
        Ok((*count).unwrap_or_default())
    }

    /// Wait until the source reports any count.
    pub async fn known(&mut self) -> Result<usize, ListDropped> {
        self.wait_for(|_| true).await
    }
}

impl From<watch::Receiver<Option<usize>>> for KnownCount {
    fn from(inner: watch::Receiver<Option<usize>>) -> Self {
        Self { inner }
    }
}

/// The sending half of the notification channels.
#[derive(Debug)]
pub(crate) struct Notifier {
    events: broadcast::Sender<Property>,
    count: watch::Sender<Option<usize>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (count, _) = watch::channel(None);
        Self { events, count }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Property> {
        self.events.subscribe()
    }

    pub fn watch_count(&self) -> KnownCount {
        self.count.subscribe().into()
    }

    pub fn count_changed(&self, count: usize) {
        self.count.send_replace(Some(count));
        self.notify(Property::Count);
    }

    pub fn page_size_changed(&self) {
        self.notify(Property::PageSize);
    }

    fn notify(&self, property: Property) {
        // No receivers is not an error.
        let _ = self.events.send(property);
    }
}
