//! In-memory storage backend.

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use parking_lot::RwLock;

use super::RangeIterator;
use crate::Result;

/// An ordered in-memory store.
///
/// Clones share the same map. Mainly useful for tests and for indexes
/// that are rebuilt from a scan on every start anyway.
#[derive(Debug, Clone, Default)]
pub struct Store {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl super::Store for Store {
    type RangeIter<'a> = RangeIterator
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn range(&self, from: &[u8], to: &[u8]) -> Result<Self::RangeIter<'_>> {
        let entries = self.entries.read();
        // TODO: avoid collect?
        let items: Vec<_> = entries
            .range::<[u8], _>((Bound::Included(from), Bound::Excluded(to)))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Ok(items.into_iter().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store as _;

    #[test]
    fn roundtrip_and_range() -> Result<()> {
        let store = Store::new();
        store.insert(b"b", b"2")?;
        store.insert(b"a", b"1")?;
        store.insert(b"c", b"3")?;
        store.insert(b"a", b"one")?;

        assert_eq!(store.get(b"a")?, Some(b"one".to_vec()));
        assert_eq!(store.get(b"missing")?, None);

        let keys: Vec<Vec<u8>> = store
            .range(b"a", b"c")?
            .map(|item| item.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(keys, [b"a".to_vec(), b"b".to_vec()]);

        store.remove(b"a")?;
        assert_eq!(store.get(b"a")?, None);
        Ok(())
    }
}
