//! Binary search over any indexable, ordered sequence.
//!
//! The standard library only searches slices. Callers here also need to
//! search containers that are not contiguous, such as a [`VecDeque`],
//! so the algorithm is written once against the small [`Indexed`] capability.
//!
//! Every search returns `Ok(index)` when a matching element is found,
//! and `Err(index)` with the insertion point that keeps the sequence ordered otherwise.
//! If several elements match, any one of their indices may be returned.
//!
//! Some callers prefer the result as one signed integer,
//! where a negative value is the bitwise complement of the insertion point.
//! [`to_complement`] and [`from_complement`] convert between both forms.
//!
//! ```
//! use virtseq_data_structures::binary_search::{binary_search, binary_search_by, to_complement};
//! use std::collections::VecDeque;
//!
//! let starts: VecDeque<usize> = [0, 10, 20, 30].into();
//! assert_eq!(binary_search(&starts, &20), Ok(2));
//! assert_eq!(binary_search_by(&starts, |s| s.cmp(&25)), Err(3));
//! assert_eq!(to_complement(Err(3)), !3);
//! ```

use core::cmp::Ordering;
use core::ops::Range;
use std::collections::VecDeque;

/// A sequence with a known length and random access by position.
pub trait Indexed {
    type Item;

    /// The number of elements in the sequence.
    fn len(&self) -> usize;

    /// Returns the element at `index`.
    ///
    /// Panics if `index >= self.len()`.
    fn at(&self, index: usize) -> &Self::Item;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Indexed for [T] {
    type Item = T;

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn at(&self, index: usize) -> &T {
        &self[index]
    }
}

impl<T, const N: usize> Indexed for [T; N] {
    type Item = T;

    fn len(&self) -> usize {
        N
    }

    fn at(&self, index: usize) -> &T {
        &self[index]
    }
}

impl<T> Indexed for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn at(&self, index: usize) -> &T {
        &self[index]
    }
}

impl<T> Indexed for VecDeque<T> {
    type Item = T;

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn at(&self, index: usize) -> &T {
        &self[index]
    }
}

impl<S: Indexed + ?Sized> Indexed for &S {
    type Item = S::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn at(&self, index: usize) -> &S::Item {
        (**self).at(index)
    }
}

/// A three-way ordering rule between an element `A` of a sequence and a search key `B`.
///
/// Any `Fn(&A, &B) -> Ordering` is a comparer.
/// [`Natural`] orders by [`Ord`].
pub trait Comparer<A: ?Sized, B: ?Sized> {
    /// How `element` orders relative to `key`.
    fn compare(&self, element: &A, key: &B) -> Ordering;
}

impl<A: ?Sized, B: ?Sized, F> Comparer<A, B> for F
where
    F: Fn(&A, &B) -> Ordering,
{
    fn compare(&self, element: &A, key: &B) -> Ordering {
        self(element, key)
    }
}

/// Orders elements by their [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Natural;

impl<T: Ord + ?Sized> Comparer<T, T> for Natural {
    fn compare(&self, element: &T, key: &T) -> Ordering {
        element.cmp(key)
    }
}

/// Searches `seq[range]` with `f`, which reports how an element orders relative to the target.
///
/// The returned indices are absolute, i.e. relative to the start of `seq`, not of `range`.
/// An insertion point is always within `range.start..=range.end`.
///
/// Panics if `range` is not contained in `0..seq.len()`.
pub fn binary_search_in_by<S, F>(seq: &S, range: Range<usize>, mut f: F) -> Result<usize, usize>
where
    S: Indexed + ?Sized,
    F: FnMut(&S::Item) -> Ordering,
{
    assert!(
        range.start <= range.end && range.end <= seq.len(),
        "search range {range:?} out of bounds for length {}",
        seq.len()
    );

    let Range { start: mut lo, end: mut hi } = range;
    // Elements in `[range.start, lo)` order before the target,
    // elements in `[hi, range.end)` order after it.
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match f(seq.at(mid)) {
            Ordering::Equal => return Ok(mid),
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
        }
    }
    Err(lo)
}

/// Searches all of `seq` with `f`, which reports how an element orders relative to the target.
pub fn binary_search_by<S, F>(seq: &S, f: F) -> Result<usize, usize>
where
    S: Indexed + ?Sized,
    F: FnMut(&S::Item) -> Ordering,
{
    binary_search_in_by(seq, 0..seq.len(), f)
}

/// Searches `seq` for `key` using the ordering rule `comparer`.
pub fn binary_search_with<S, K, C>(seq: &S, key: &K, comparer: &C) -> Result<usize, usize>
where
    S: Indexed + ?Sized,
    K: ?Sized,
    C: Comparer<S::Item, K> + ?Sized,
{
    binary_search_by(seq, |element| comparer.compare(element, key))
}

/// Searches `seq` for `key` using the natural ordering of the elements.
pub fn binary_search<S>(seq: &S, key: &S::Item) -> Result<usize, usize>
where
    S: Indexed + ?Sized,
    S::Item: Ord,
{
    binary_search_with(seq, key, &Natural)
}

/// Encodes a search result as a single integer.
///
/// `Ok(i)` becomes `i`, `Err(i)` becomes `!i`, which is always negative.
pub fn to_complement(result: Result<usize, usize>) -> isize {
    match result {
        Ok(found) => found as isize,
        Err(insert_at) => !(insert_at as isize),
    }
}

/// Inverse of [`to_complement`].
pub fn from_complement(encoded: isize) -> Result<usize, usize> {
    if encoded >= 0 {
        Ok(encoded as usize)
    } else {
        Err(!encoded as usize)
    }
}
