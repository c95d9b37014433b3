//! Index maintenance: the ordered-merge reconciler, the derived global
//! index and the queries over both.
//!
//! Everything here runs under the serialisation provided by
//! [`Set`](crate::Set); the store itself is only required to handle
//! concurrent single-key operations.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::trace;

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
#[cfg(feature = "metrics")]
use iroh_metrics::inc;

use crate::{
    keys,
    lamport::Clock,
    record::{FileRecord, PeerId, VersionList, FLAG_DELETED},
    store::Store,
    Error, Result,
};

/// How a reconciliation treats files that are in the store but missing
/// from the incoming list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// The list is the complete state of a remote peer: drop missing files
    /// from its index and withdraw them from the global index.
    Replace,
    /// The list is the complete state of the local peer: missing files
    /// were deleted locally and become tombstones with a fresh version.
    ReplaceWithDelete,
    /// The list is a partial update: missing files stay untouched.
    Update,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_stdvec(value).map_err(|err| Error::Backend(err.into()))
}

fn decode_record(bytes: &[u8]) -> Result<FileRecord> {
    postcard::from_bytes(bytes)
        .map_err(|err| Error::corrupt(format!("undecodable file record: {err}")))
}

fn decode_versions(bytes: &[u8]) -> Result<VersionList> {
    postcard::from_bytes(bytes)
        .map_err(|err| Error::corrupt(format!("undecodable version list: {err}")))
}

fn lossy(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Merges `files` into the stored index for `(repo, peer)` in one ordered
/// pass and returns the number of entries that were mutated.
///
/// `files` is sorted in place by name, the same order the stored range
/// iterates in. Duplicate names are allowed; the last occurrence wins.
/// On failure the merge stops at the first error; entries already written
/// are not rolled back.
pub(crate) fn reconcile<S: Store>(
    store: &S,
    repo: &[u8],
    peer: &PeerId,
    files: &mut [FileRecord],
    mode: Mode,
    clock: &Clock,
) -> Result<u64> {
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let (lo, hi) = keys::peer_key_range(repo, peer);
    let stored: Vec<(Vec<u8>, Vec<u8>)> = store.range(&lo, &hi)?.collect::<Result<_>>()?;

    let mut changed = 0;
    let mut fs_i = 0;
    let mut db_i = 0;
    while fs_i < files.len() || db_i < stored.len() {
        let cmp = if fs_i >= files.len() {
            Ordering::Greater
        } else if db_i >= stored.len() {
            Ordering::Less
        } else {
            files[fs_i]
                .name
                .as_slice()
                .cmp(keys::peer_key_name(&stored[db_i].0))
        };

        match cmp {
            Ordering::Less => {
                // The store is missing this file. Insert it.
                changed += insert_entry(store, repo, peer, &files[fs_i])?;
                fs_i += 1;
            }
            Ordering::Equal => {
                // The file exists on both sides. Overwrite and reapply the
                // version to the global index; both writes are skipped
                // when nothing changed.
                let (key, old_value) = &stored[db_i];
                changed += update_entry(store, repo, peer, &files[fs_i], key, old_value)?;
                fs_i += 1;
                db_i += 1;
            }
            Ordering::Greater => {
                // The incoming list is missing this file.
                let (key, old_value) = &stored[db_i];
                match mode {
                    Mode::Update => {}
                    Mode::Replace => {
                        changed += drop_entry(store, repo, peer, key)?;
                    }
                    Mode::ReplaceWithDelete => {
                        changed += tombstone_entry(store, repo, peer, key, old_value, clock)?;
                    }
                }
                db_i += 1;
            }
        }
    }
    Ok(changed)
}

fn insert_entry<S: Store>(store: &S, repo: &[u8], peer: &PeerId, file: &FileRecord) -> Result<u64> {
    trace!(name = %lossy(&file.name), version = file.version, "insert");
    let key = keys::peer_key(repo, peer, &file.name)?;
    store.insert(&key, &encode(file)?)?;
    update_global(store, repo, peer, &file.name, file.version)?;
    #[cfg(feature = "metrics")]
    inc!(Metrics, entries_inserted);
    Ok(1)
}

fn update_entry<S: Store>(
    store: &S,
    repo: &[u8],
    peer: &PeerId,
    file: &FileRecord,
    key: &[u8],
    old_value: &[u8],
) -> Result<u64> {
    let value = encode(file)?;
    let mut changed = 0;
    if value != old_value {
        trace!(name = %lossy(&file.name), version = file.version, "update");
        store.insert(key, &value)?;
        changed = 1;
        #[cfg(feature = "metrics")]
        inc!(Metrics, entries_updated);
    }
    update_global(store, repo, peer, &file.name, file.version)?;
    Ok(changed)
}

fn drop_entry<S: Store>(store: &S, repo: &[u8], peer: &PeerId, key: &[u8]) -> Result<u64> {
    let name = keys::peer_key_name(key);
    trace!(name = %lossy(name), "drop");
    store.remove(key)?;
    remove_from_global(store, repo, peer, name)?;
    #[cfg(feature = "metrics")]
    inc!(Metrics, entries_deleted);
    Ok(1)
}

/// Converts a locally deleted file into a tombstone: blocks cleared,
/// deleted flag set, version bumped past everything seen so far. The
/// tombstone stays in the peer index so that `have` and the global index
/// keep announcing the deletion. Stored tombstones are left untouched.
fn tombstone_entry<S: Store>(
    store: &S,
    repo: &[u8],
    peer: &PeerId,
    key: &[u8],
    old_value: &[u8],
    clock: &Clock,
) -> Result<u64> {
    let mut file = decode_record(old_value)?;
    if file.is_deleted() {
        return Ok(0);
    }
    file.blocks.clear();
    file.version = clock.tick(file.version);
    file.flags |= FLAG_DELETED;
    trace!(name = %lossy(&file.name), version = file.version, "tombstone");
    store.insert(key, &encode(&file)?)?;
    update_global(store, repo, peer, &file.name, file.version)?;
    #[cfg(feature = "metrics")]
    inc!(Metrics, entries_tombstoned);
    Ok(1)
}

/// Records `(peer, version)` in the version list for `name`, creating the
/// list if the file was unknown. The write-back is skipped when the list
/// already holds this exact entry.
fn update_global<S: Store>(
    store: &S,
    repo: &[u8],
    peer: &PeerId,
    name: &[u8],
    version: u64,
) -> Result<()> {
    let key = keys::global_key(repo, name)?;
    let mut list = match store.get(&key)? {
        Some(bytes) => decode_versions(&bytes)?,
        None => VersionList::default(),
    };
    if list.insert_or_replace(*peer, version) {
        store.insert(&key, &encode(&list)?)?;
    }
    Ok(())
}

/// Withdraws `peer` from the version list for `name`. The list must
/// exist; a peer-index entry without one means the indexes have diverged.
/// An emptied list is deleted outright.
fn remove_from_global<S: Store>(
    store: &S,
    repo: &[u8],
    peer: &PeerId,
    name: &[u8],
) -> Result<()> {
    let key = keys::global_key(repo, name)?;
    let bytes = store
        .get(&key)?
        .ok_or_else(|| Error::corrupt(format!("no version list for {}", lossy(name))))?;
    let mut list = decode_versions(&bytes)?;
    if list.remove(peer) {
        store.remove(&key)?;
    } else {
        store.insert(&key, &encode(&list)?)?;
    }
    Ok(())
}

/// Every file `(repo, peer)` holds, in name order.
pub(crate) fn have<S: Store>(store: &S, repo: &[u8], peer: &PeerId) -> Result<Vec<FileRecord>> {
    let (lo, hi) = keys::peer_key_range(repo, peer);
    let mut files = Vec::new();
    for item in store.range(&lo, &hi)? {
        let (_key, value) = item?;
        files.push(decode_record(&value)?);
    }
    Ok(files)
}

/// The record `(repo, peer)` holds for `name`, or the zero record.
pub(crate) fn get<S: Store>(
    store: &S,
    repo: &[u8],
    peer: &PeerId,
    name: &[u8],
) -> Result<FileRecord> {
    let key = keys::peer_key(repo, peer, name)?;
    match store.get(&key)? {
        Some(bytes) => decode_record(&bytes),
        None => Ok(FileRecord::default()),
    }
}

/// Fetches the record behind the head of a version list.
fn global_record<S: Store>(
    store: &S,
    repo: &[u8],
    name: &[u8],
    list: &VersionList,
) -> Result<FileRecord> {
    let peer = list
        .max_peer()
        .ok_or_else(|| Error::corrupt(format!("empty version list for {}", lossy(name))))?;
    let key = keys::peer_key(repo, &peer, name)?;
    let bytes = store.get(&key)?.ok_or_else(|| {
        Error::corrupt(format!(
            "version list for {} points at peer {peer} which has no entry",
            lossy(name)
        ))
    })?;
    decode_record(&bytes)
}

/// The newest known version of every file in `repo`, in name order.
pub(crate) fn global<S: Store>(store: &S, repo: &[u8]) -> Result<Vec<FileRecord>> {
    let (lo, hi) = keys::global_key_range(repo);
    let mut files = Vec::new();
    for item in store.range(&lo, &hi)? {
        let (key, value) = item?;
        let list = decode_versions(&value)?;
        files.push(global_record(store, repo, keys::global_key_name(&key), &list)?);
    }
    Ok(files)
}

/// The newest known version of `name`, or the zero record.
pub(crate) fn get_global<S: Store>(store: &S, repo: &[u8], name: &[u8]) -> Result<FileRecord> {
    let key = keys::global_key(repo, name)?;
    match store.get(&key)? {
        Some(bytes) => global_record(store, repo, name, &decode_versions(&bytes)?),
        None => Ok(FileRecord::default()),
    }
}

/// The peers holding `name` at its maximum known version, in peer order.
/// Empty when the file is unknown.
pub(crate) fn availability<S: Store>(
    store: &S,
    repo: &[u8],
    name: &[u8],
) -> Result<Vec<PeerId>> {
    let key = keys::global_key(repo, name)?;
    let Some(bytes) = store.get(&key)? else {
        return Ok(Vec::new());
    };
    let list = decode_versions(&bytes)?;
    let head = list
        .max()
        .ok_or_else(|| Error::corrupt(format!("empty version list for {}", lossy(name))))?;
    Ok(list.peers_with(head.version))
}

/// The files `peer` must fetch to match the global view: every file whose
/// newest known version it lacks, except files it never had whose newest
/// version is a deletion tombstone.
pub(crate) fn need<S: Store>(store: &S, repo: &[u8], peer: &PeerId) -> Result<Vec<FileRecord>> {
    let (lo, hi) = keys::global_key_range(repo);
    let mut files = Vec::new();
    for item in store.range(&lo, &hi)? {
        let (key, value) = item?;
        let name = keys::global_key_name(&key);
        let list = decode_versions(&value)?;
        let head = list
            .max()
            .ok_or_else(|| Error::corrupt(format!("empty version list for {}", lossy(name))))?;

        let (have, need_newer) = match list.find(peer) {
            Some(version) => (true, version < head.version),
            None => (false, false),
        };
        if have && !need_newer {
            continue;
        }

        let record = global_record(store, repo, name, &list)?;
        if record.is_deleted() && !have {
            // A deletion of a file the peer never had carries no news.
            continue;
        }
        files.push(record);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory, Store as _};

    const REPO: &[u8] = b"test";

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes(&[n; 32])
    }

    fn file(name: &str, version: u64) -> FileRecord {
        FileRecord {
            name: name.as_bytes().to_vec(),
            version,
            ..Default::default()
        }
    }

    /// Checks I1 and I2: peer entries and version lists mirror each other
    /// exactly, and every list is non-empty and version-sorted.
    fn assert_consistent(store: &memory::Store, peers: &[PeerId]) {
        let mut peer_entries = Vec::new();
        for peer in peers {
            let (lo, hi) = keys::peer_key_range(REPO, peer);
            for item in store.range(&lo, &hi).unwrap() {
                let (key, value) = item.unwrap();
                let record = decode_record(&value).unwrap();
                assert_eq!(keys::peer_key_name(&key), record.name.as_slice());
                peer_entries.push((record.name.clone(), *peer, record.version));
            }
        }

        let mut list_entries = Vec::new();
        let (lo, hi) = keys::global_key_range(REPO);
        for item in store.range(&lo, &hi).unwrap() {
            let (key, value) = item.unwrap();
            let name = keys::global_key_name(&key).to_vec();
            let list = decode_versions(&value).unwrap();
            let head = list.max().expect("stored version list must not be empty");
            for peer in peers {
                if let Some(version) = list.find(peer) {
                    assert!(version <= head.version);
                    list_entries.push((name.clone(), *peer, version));
                }
            }
        }

        peer_entries.sort();
        list_entries.sort();
        assert_eq!(peer_entries, list_entries);
    }

    #[test]
    fn dual_index_stays_consistent() -> Result<()> {
        let store = memory::Store::new();
        let clock = Clock::new();
        let local = peer(1);
        let remote = peer(2);
        let peers = [local, remote];

        let mut files = vec![file("a", 1000), file("b", 1000), file("c", 1000)];
        reconcile(&store, REPO, &local, &mut files, Mode::ReplaceWithDelete, &clock)?;
        assert_consistent(&store, &peers);

        let mut files = vec![file("b", 1001), file("d", 1000)];
        reconcile(&store, REPO, &remote, &mut files, Mode::Replace, &clock)?;
        assert_consistent(&store, &peers);

        // Local drops b: tombstoned, version list updated in place.
        let mut files = vec![file("a", 1000), file("c", 1000)];
        reconcile(&store, REPO, &local, &mut files, Mode::ReplaceWithDelete, &clock)?;
        assert_consistent(&store, &peers);

        // Remote drops everything: withdrawn from the global index.
        reconcile(&store, REPO, &remote, &mut [], Mode::Replace, &clock)?;
        assert_consistent(&store, &peers);
        assert_eq!(get(&store, REPO, &remote, b"d")?, FileRecord::default());
        assert_eq!(get_global(&store, REPO, b"d")?, FileRecord::default());
        Ok(())
    }

    #[test]
    fn duplicate_names_last_occurrence_wins() -> Result<()> {
        let store = memory::Store::new();
        let clock = Clock::new();
        let local = peer(1);

        let mut files = vec![file("a", 1000), file("a", 1002), file("b", 1000)];
        reconcile(&store, REPO, &local, &mut files, Mode::Update, &clock)?;

        assert_eq!(get(&store, REPO, &local, b"a")?.version, 1002);
        assert_eq!(get_global(&store, REPO, b"a")?.version, 1002);
        Ok(())
    }

    #[test]
    fn invalid_name_fails_reconciliation() {
        let store = memory::Store::new();
        let clock = Clock::new();
        let local = peer(1);

        let mut files = vec![file("", 1000)];
        let err = reconcile(&store, REPO, &local, &mut files, Mode::Update, &clock).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn withdraw_without_version_list_is_corrupt() -> Result<()> {
        let store = memory::Store::new();
        let clock = Clock::new();
        let local = peer(1);

        // Plant a peer entry whose version list is missing.
        let key = keys::peer_key(REPO, &local, b"orphan")?;
        store.insert(&key, &encode(&file("orphan", 1000))?)?;

        let err = reconcile(&store, REPO, &local, &mut [], Mode::Replace, &clock).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex(_)));
        Ok(())
    }

    #[test]
    fn update_global_skips_redundant_write() -> Result<()> {
        let store = memory::Store::new();
        update_global(&store, REPO, &peer(1), b"a", 1000)?;
        let key = keys::global_key(REPO, b"a")?;
        let before = store.get(&key)?;

        // Same entry again: the stored bytes must be untouched.
        update_global(&store, REPO, &peer(1), b"a", 1000)?;
        assert_eq!(before, store.get(&key)?);

        update_global(&store, REPO, &peer(2), b"a", 1001)?;
        assert_ne!(before, store.get(&key)?);
        Ok(())
    }
}
