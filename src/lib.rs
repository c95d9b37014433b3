//! Peer file index and global-view store for folder synchronisation.
//!
//! The crate operates on [Sets](Set). A set tracks, for one replicated
//! folder (a *repository*), which files each peer holds at which version.
//! From that it derives the *global view* (the network-wide newest version
//! of every file) and the *need set* (the files a given peer is missing
//! relative to the global view).
//!
//! Two indexes are persisted on top of an ordered key-value store: a
//! per-peer index mapping file names to [file records](FileRecord), and a
//! per-file index mapping file names to the list of (peer, version) pairs
//! known for that file. The per-file index is denormalised from the
//! per-peer index so that global and need queries do not have to scan
//! every peer.
//!
//! File lists arrive from a local scanner or from remote peers and are
//! merged into the stored index in one ordered pass over both sides. Files
//! that disappear from a *local* listing are not removed but converted to
//! deletion tombstones carrying a fresh [Lamport timestamp](Clock), so
//! that other peers learn about the deletion and do not resurrect the
//! file.
//!
//! The crate exposes a [generic storage interface](store::Store). Two
//! implementations ship with it: [`store::memory::Store`], backed by an
//! in-memory ordered map, and [`store::fs::Store`], backed by [`redb`],
//! an embedded key-value store.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

mod error;
mod index;
mod keys;
mod lamport;
#[cfg(feature = "metrics")]
pub mod metrics;
mod record;
mod set;
pub mod store;

pub use self::error::{Error, Result};
pub use self::lamport::Clock;
pub use self::record::{
    BlockInfo, FileRecord, PeerId, FLAG_DELETED, FLAG_DIRECTORY, FLAG_INVALID,
};
pub use self::set::Set;
