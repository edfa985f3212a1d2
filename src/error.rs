//! Crate-wide error type.

#![allow(missing_docs)]

use crate::types::AnchorState;
use ethereum_types::H256;

/// Error returned by the anchoring core.
#[derive(Debug, derive_more::Display, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid option shape or mutually exclusive configuration supplied at construction.
    #[display(fmt = "invalid configuration: {}", _0)]
    Configuration(String),
    /// `append` attempted while the backend already holds `limit` records.
    #[display(fmt = "record store is full (limit = {})", limit)]
    CapacityExceeded { limit: usize },
    /// `update_status` / `mark_locally_verified` / `get` referenced an unknown hash.
    #[display(fmt = "no record for hash {:#x}", _0)]
    NotFound(H256),
    /// A record with this hash was already present in the store.
    #[display(fmt = "duplicate record hash {:#x}", _0)]
    DuplicateHash(H256),
    /// `anchor_fn` reported failure, or threw, in a mode that surfaces the error to the caller.
    #[display(fmt = "anchor failed after {} retries: {}", retry_count, message)]
    AnchorFailure { message: String, retry_count: u32 },
    /// Recomputing a record's hash/signature did not match what was stored.
    #[display(fmt = "signature verification failed")]
    SignatureInvalid,
    /// An `AnchorStatus` transition outside the permitted graph of the consistency coordinator.
    #[display(fmt = "cannot move anchor status from {:?} to {:?}", from, to)]
    InvalidState { from: AnchorState, to: AnchorState },
    /// Underlying filesystem I/O failure in the file-backed store.
    #[display(fmt = "io error: {}", _0)]
    Io(String),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
