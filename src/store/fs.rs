//! Persistent storage backend on top of [`redb`].

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};

use super::RangeIterator;
use crate::{Error, Result};

/// All index entries live in one table; the key schema in
/// [`crate::keys`] partitions it.
const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index-v0");

/// An ordered store backed by a single redb database file.
///
/// Clones share the underlying database. Every operation runs in its own
/// transaction; the [`Set`](crate::Set) façade provides the serialisation
/// that multi-key operations need.
#[derive(Debug, Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Creates or opens a store at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|err| Error::Backend(err.into()))?;
        Self::new_impl(db)
    }

    /// Creates a store on an in-memory redb backend.
    ///
    /// Useful for tests that want the persistent code path without a file.
    pub fn memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|err| Error::Backend(err.into()))?;
        Self::new_impl(db)
    }

    fn new_impl(db: Database) -> Result<Self> {
        let store = Store { db: Arc::new(db) };
        // Create the table so that later read transactions can open it.
        store
            .write(|_table| Ok(()))
            .map_err(Error::Backend)?;
        Ok(store)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut redb::Table<'_, &'static [u8], &'static [u8]>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let tx = self.db.begin_write()?;
        let result = {
            let mut table = tx.open_table(INDEX_TABLE)?;
            f(&mut table)?
        };
        tx.commit()?;
        Ok(result)
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&redb::ReadOnlyTable<&'static [u8], &'static [u8]>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(INDEX_TABLE)?;
        f(&table)
    }
}

impl super::Store for Store {
    type RangeIter<'a> = RangeIterator
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|table| Ok(table.get(key)?.map(|guard| guard.value().to_vec())))
            .map_err(Error::Backend)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(|table| {
            table.insert(key, value)?;
            Ok(())
        })
        .map_err(Error::Backend)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.write(|table| {
            table.remove(key)?;
            Ok(())
        })
        .map_err(Error::Backend)
    }

    fn range(&self, from: &[u8], to: &[u8]) -> Result<Self::RangeIter<'_>> {
        let items = self
            .read(|table| {
                let mut items = Vec::new();
                for entry in table.range(from..to)? {
                    let (key, value) = entry?;
                    items.push(Ok((key.value().to_vec(), value.value().to_vec())));
                }
                Ok(items)
            })
            .map_err(Error::Backend)?;
        Ok(items.into_iter().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store as _;

    #[test]
    fn roundtrip_and_range() -> anyhow::Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let store = Store::persistent(file.path())?;
        store.insert(b"b", b"2")?;
        store.insert(b"a", b"1")?;
        store.insert(b"c", b"3")?;

        assert_eq!(store.get(b"b")?, Some(b"2".to_vec()));
        assert_eq!(store.get(b"missing")?, None);

        let keys: Vec<Vec<u8>> = store
            .range(b"a", b"c")?
            .map(|item| item.map(|(k, _)| k))
            .collect::<crate::Result<_>>()?;
        assert_eq!(keys, [b"a".to_vec(), b"b".to_vec()]);

        store.remove(b"b")?;
        assert_eq!(store.get(b"b")?, None);
        Ok(())
    }

    #[test]
    fn survives_reopen() -> anyhow::Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        {
            let store = Store::persistent(file.path())?;
            store.insert(b"key", b"value")?;
        }
        let store = Store::persistent(file.path())?;
        assert_eq!(store.get(b"key")?, Some(b"value".to_vec()));
        Ok(())
    }
}
