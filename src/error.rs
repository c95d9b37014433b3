//! Error types for the index.

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the index.
///
/// Non-existence is not an error: point queries return the zero record and
/// [`availability`](crate::Set::availability) returns an empty list for
/// unknown files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A repository name, peer id or file name does not fit the key schema.
    ///
    /// Raised before the offending key is written. Repository and peer
    /// sizes are checked at the API boundary; file names are checked when
    /// their key is built, so a reconciliation may have committed earlier
    /// entries by the time this surfaces.
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),
    /// The stored index violates one of its invariants.
    ///
    /// Fatal to the current operation and not retried. The store should be
    /// treated as damaged and rebuilt from the authoritative source.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    /// The underlying store or the record codec failed.
    #[error("backend error")]
    Backend(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptIndex(msg.into())
    }
}
