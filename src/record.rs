//! File records, peer identifiers and the per-file version list.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The record describes a deleted file.
pub const FLAG_DELETED: u32 = 1 << 12;
/// The record is invalid and must not be synchronised.
///
/// Set by producers (for example on permanent scan failures); stored and
/// propagated opaquely by the index.
pub const FLAG_INVALID: u32 = 1 << 13;
/// The record describes a directory.
pub const FLAG_DIRECTORY: u32 = 1 << 14;

/// Identifier of a peer participating in a repository.
///
/// An opaque, fixed-width byte string. Equality and ordering are plain
/// byte comparison; the ordering is used as the deterministic tie break
/// between peers holding a file at the same version.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Byte length of a peer identifier.
    pub const LENGTH: usize = 32;

    /// Creates a `PeerId` from a byte array.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        PeerId(*bytes)
    }

    /// Returns the byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PeerId {
    fn from(bytes: [u8; 32]) -> Self {
        PeerId(bytes)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("peer id must be 32 bytes"))?;
        Ok(PeerId(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}

/// A single content block of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset of the block within the file.
    pub offset: u64,
    /// Length of the block in bytes.
    pub size: u32,
    /// Content hash of the block.
    pub hash: Vec<u8>,
}

/// A file as observed by one peer.
///
/// Produced by the on-disk scanner or received from a remote peer. The
/// index interprets only `name`, `version` and `flags`; everything else is
/// carried opaquely. The `Default` value is the zero record returned by
/// point queries for unknown files, distinguishable by its empty name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name, a byte string. Compared bytewise, never locale-aware.
    pub name: Vec<u8>,
    /// Bitfield; see [`FLAG_DELETED`], [`FLAG_DIRECTORY`], [`FLAG_INVALID`].
    pub flags: u32,
    /// Modification time in seconds since the epoch.
    pub modified: i64,
    /// Version counter, monotonically increasing per (peer, file).
    pub version: u64,
    /// Content block list. Empty for directories and tombstones.
    pub blocks: Vec<BlockInfo>,
}

impl FileRecord {
    /// Whether the deleted flag is set.
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    /// Whether the directory flag is set.
    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }
}

/// One peer's version of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FileVersion {
    pub version: u64,
    pub peer: PeerId,
}

/// All known versions of one file across peers.
///
/// Kept ordered by version descending, ties by peer ascending, so the
/// first entry is the source of truth for the file and equal-version runs
/// are deterministic. A peer appears at most once. The list is the value
/// type of the global index; it never persists empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VersionList {
    versions: Vec<FileVersion>,
}

impl VersionList {
    /// Records `peer` at `version`, replacing any previous entry for the
    /// peer. Returns false when the entry was already present at this
    /// version and nothing needs to be written back.
    pub fn insert_or_replace(&mut self, peer: PeerId, version: u64) -> bool {
        if let Some(i) = self.versions.iter().position(|v| v.peer == peer) {
            if self.versions[i].version == version {
                return false;
            }
            self.versions.remove(i);
        }
        let at = self
            .versions
            .iter()
            .position(|v| v.version < version || (v.version == version && v.peer > peer))
            .unwrap_or(self.versions.len());
        self.versions.insert(at, FileVersion { version, peer });
        true
    }

    /// Removes the entry for `peer` if present. Returns whether the list
    /// is empty afterwards.
    pub fn remove(&mut self, peer: &PeerId) -> bool {
        if let Some(i) = self.versions.iter().position(|v| v.peer == *peer) {
            self.versions.remove(i);
        }
        self.versions.is_empty()
    }

    /// The leading entry, holding the maximum version.
    pub fn max(&self) -> Option<&FileVersion> {
        self.versions.first()
    }

    /// The peer holding the maximum version.
    pub fn max_peer(&self) -> Option<PeerId> {
        self.max().map(|v| v.peer)
    }

    /// The version recorded for `peer`, if any.
    pub fn find(&self, peer: &PeerId) -> Option<u64> {
        self.versions
            .iter()
            .find(|v| v.peer == *peer)
            .map(|v| v.version)
    }

    /// All peers recorded at exactly `version`, in peer order.
    pub fn peers_with(&self, version: u64) -> Vec<PeerId> {
        self.versions
            .iter()
            .filter(|v| v.version == version)
            .map(|v| v.peer)
            .collect()
    }
}
