//! The per-repository index handle.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    index::{self, Mode},
    keys,
    lamport::Clock,
    record::{FileRecord, PeerId},
    store::Store,
    Result,
};

/// Tracks which files every peer of one repository holds at which
/// version, and answers queries against the derived global view.
///
/// A `Set` is a cheaply cloneable handle; clones share state. File lists
/// enter through [`replace`](Set::replace),
/// [`replace_with_delete`](Set::replace_with_delete) and
/// [`update`](Set::update) and are merged into the stored index in one
/// ordered pass. Mutations take the write side of an internal
/// reader/writer lock and queries the read side, so a query never
/// observes a half-applied reconciliation.
#[derive(Debug, Clone)]
pub struct Set<S: Store> {
    repo: Arc<str>,
    store: Arc<RwLock<S>>,
    changes: Arc<Mutex<HashMap<PeerId, u64>>>,
    clock: Arc<Clock>,
}

impl<S: Store> Set<S> {
    /// Creates a handle for `repo` on `store`, with a fresh version
    /// clock.
    ///
    /// Fails with [`InvalidKey`](crate::Error::InvalidKey) when the
    /// repository name is empty or longer than 64 bytes.
    pub fn new(repo: impl AsRef<str>, store: S) -> Result<Self> {
        Self::with_clock(repo, store, Arc::new(Clock::new()))
    }

    /// Creates a handle sharing `clock` with other sets of the process.
    ///
    /// Use this when several repositories (or the scanner feeding them)
    /// must draw tombstone versions from one counter.
    pub fn with_clock(repo: impl AsRef<str>, store: S, clock: Arc<Clock>) -> Result<Self> {
        let repo = repo.as_ref();
        keys::check_repo(repo.as_bytes())?;
        Ok(Set {
            repo: repo.into(),
            store: Arc::new(RwLock::new(store)),
            changes: Default::default(),
            clock,
        })
    }

    /// The repository name this handle is scoped to.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Replaces the stored file list of a remote `peer` with `files`.
    ///
    /// Files missing from `files` are dropped from the peer's index and
    /// withdrawn from the global view; the remote is authoritative over
    /// its own state.
    pub fn replace(&self, peer: PeerId, files: Vec<FileRecord>) -> Result<()> {
        debug!(repo = %self.repo, %peer, files = files.len(), "replace");
        self.reconcile(peer, files, Mode::Replace)
    }

    /// Replaces the stored file list of the local `peer` with `files`,
    /// tombstoning whatever disappeared.
    ///
    /// Files missing from `files` were deleted locally: their records get
    /// the deleted flag, an empty block list and a version stamp greater
    /// than any seen before, so other peers learn about the deletion.
    pub fn replace_with_delete(&self, peer: PeerId, files: Vec<FileRecord>) -> Result<()> {
        debug!(repo = %self.repo, %peer, files = files.len(), "replace_with_delete");
        self.reconcile(peer, files, Mode::ReplaceWithDelete)
    }

    /// Applies a partial file list for `peer`.
    ///
    /// Files not mentioned in `files` stay untouched.
    pub fn update(&self, peer: PeerId, files: Vec<FileRecord>) -> Result<()> {
        debug!(repo = %self.repo, %peer, files = files.len(), "update");
        self.reconcile(peer, files, Mode::Update)
    }

    fn reconcile(&self, peer: PeerId, mut files: Vec<FileRecord>, mode: Mode) -> Result<()> {
        let store = self.store.write();
        let changed = index::reconcile(
            &*store,
            self.repo.as_bytes(),
            &peer,
            &mut files,
            mode,
            &self.clock,
        )?;
        if changed > 0 {
            *self.changes.lock().entry(peer).or_default() += changed;
        }
        Ok(())
    }

    /// Every file `peer` holds, in name order. Includes tombstones.
    pub fn have(&self, peer: PeerId) -> Result<Vec<FileRecord>> {
        let store = self.store.read();
        index::have(&*store, self.repo.as_bytes(), &peer)
    }

    /// The files `peer` is missing relative to the global view, in name
    /// order.
    ///
    /// A file counts as missing when the peer holds no version of it or a
    /// version older than the newest known one. Deletions of files the
    /// peer never had are not news and are skipped.
    pub fn need(&self, peer: PeerId) -> Result<Vec<FileRecord>> {
        let store = self.store.read();
        index::need(&*store, self.repo.as_bytes(), &peer)
    }

    /// The newest known version of every file, in name order.
    pub fn global(&self) -> Result<Vec<FileRecord>> {
        let store = self.store.read();
        index::global(&*store, self.repo.as_bytes())
    }

    /// The record `peer` holds for `name`; the zero record (empty name)
    /// when the peer does not have the file.
    pub fn get(&self, peer: PeerId, name: impl AsRef<[u8]>) -> Result<FileRecord> {
        let store = self.store.read();
        index::get(&*store, self.repo.as_bytes(), &peer, name.as_ref())
    }

    /// The newest known record for `name`; the zero record when the file
    /// is unknown.
    pub fn get_global(&self, name: impl AsRef<[u8]>) -> Result<FileRecord> {
        let store = self.store.read();
        index::get_global(&*store, self.repo.as_bytes(), name.as_ref())
    }

    /// The peers holding `name` at its newest known version, ordered by
    /// peer id. Empty when the file is unknown.
    pub fn availability(&self, name: impl AsRef<[u8]>) -> Result<Vec<PeerId>> {
        let store = self.store.read();
        index::availability(&*store, self.repo.as_bytes(), name.as_ref())
    }

    /// A counter that strictly increases whenever a reconciliation
    /// mutates at least one entry under `peer`, and is stable across
    /// no-op reconciliations.
    ///
    /// Consumers poll it to detect whether anything happened since a
    /// remembered value; the exact increments carry no meaning.
    pub fn changes(&self, peer: PeerId) -> u64 {
        self.changes.lock().get(&peer).copied().unwrap_or_default()
    }
}
