//! Assorted data structures and search helpers used in virtseq.

pub mod binary_search;
