//! Storage abstraction for the persisted indexes.
//!
//! The index only needs an ordered byte-keyed map: point reads and writes
//! plus a lexicographic range scan. Anything providing [`Store`] works as
//! a backend; the crate ships an [in-memory](memory::Store) and a
//! [persistent](fs::Store) implementation.

use crate::Result;

#[cfg(feature = "fs-store")]
pub mod fs;
pub mod memory;

/// An ordered store of byte keys and byte values.
///
/// Implementations must be safe for concurrent point reads and writes;
/// the [`Set`](crate::Set) façade serialises multi-key operations on top.
/// Absence is reported as `None` (or an absent range entry), never as an
/// error.
pub trait Store: std::fmt::Debug + Clone + Send + Sync + 'static {
    /// Iterator over one key range, in lexicographic key order.
    type RangeIter<'a>: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>
    where
        Self: 'a;

    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites the value at `key`.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key` if present.
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Iterates every entry with `from <= key < to`.
    ///
    /// The iterator observes a snapshot taken at the call: writes issued
    /// while it is alive do not show up in it.
    fn range(&self, from: &[u8], to: &[u8]) -> Result<Self::RangeIter<'_>>;
}

/// Owning iterator over a snapshotted key range.
#[derive(Debug, derive_more::From)]
pub struct RangeIterator(std::vec::IntoIter<Result<(Vec<u8>, Vec<u8>)>>);

impl Iterator for RangeIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}
