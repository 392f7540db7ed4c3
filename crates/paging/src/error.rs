use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// Error returned by [`crate::VirtualList`] operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("page size must be greater than zero, got {0}")]
    InvalidPageSize(usize),
    #[error("event channel capacity must be greater than zero")]
    InvalidEventCapacity,
    #[error("cannot load an empty window at position {start}")]
    EmptyWindow { start: usize },
    #[error("window start={start} len={len} extends past the last addressable position")]
    WindowOverflow { start: usize, len: usize },
    /// The sequence is owned by its [`crate::Source`] and cannot be modified
    /// through the cache.
    #[error("{0} is not supported on a read-only sequence")]
    ReadOnly(Mutation),
    #[error("destination too small: {required} slots required, {actual} available")]
    DestinationTooSmall { required: usize, actual: usize },
}

/// A structural modification of the sequence, all of which are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    Insert,
    Remove,
    Set,
    Clear,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Remove => "remove",
            Self::Set => "set",
            Self::Clear => "clear",
        })
    }
}

/// Outcome of a failed background load, as observed by
/// [`crate::VirtualList::get_loaded`].
///
/// The error is shared between everyone awaiting the same load,
/// hence the underlying [`crate::Source::Error`] is kept behind an [`Arc`].
#[derive(Clone, Debug, Error)]
pub enum LoadError {
    #[error("failed to fetch window start={start} len={len}")]
    Fetch {
        start: usize,
        len: usize,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },
    /// The fetch panicked, or the runtime shut down before it completed.
    #[error("load of window start={start} len={len} did not complete")]
    Aborted { start: usize, len: usize },
}

impl LoadError {
    /// The window `(start, len)` the failed load was issued for.
    pub fn window(&self) -> (usize, usize) {
        match *self {
            Self::Fetch { start, len, .. } | Self::Aborted { start, len } => (start, len),
        }
    }
}
