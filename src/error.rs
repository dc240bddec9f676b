//! Error types for map operations.

use thiserror::Error;

/// Errors returned by [`TtlMap`](crate::TtlMap) operations.
///
/// These signal a broken usage contract, not a transient fault, so none of
/// them is worth retrying as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The key is absent, or the map has been drained.
    #[error("key not found: {0}")]
    NotFound(String),

    /// `KeyExist::MustNotExist` was requested but the key is present.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The map has started draining and accepts no more writes.
    #[error("map was drained")]
    Drained,

    /// The map was built outside a Tokio runtime, so its reaper has nowhere to run.
    #[error("no Tokio runtime available to run the expiry reaper")]
    NoRuntime,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
