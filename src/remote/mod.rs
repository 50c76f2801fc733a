pub mod mem;

use thiserror::Error;

use crate::commit::CommitError;
use crate::entry::{Entry, EntryError};
use crate::hash::Bytes32;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("entry {0} not found")]
    NotFound(Bytes32),
    #[error("chain {0} not found")]
    ChainNotFound(Bytes32),
    #[error("no commit for entry {0}")]
    NoCommit(Bytes32),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

/// The ledger a Data Store lives on.
///
/// Fetches happen concurrently from the download worker pool so implementations
/// must be `Sync`. Timeouts and retries are up to the implementation.
pub trait Remote: Sync {
    // Api for reading entries
    fn fetch_entry(&self, hash: &Bytes32) -> Result<Entry, RemoteError>;
    fn fetch_first_entry(&self, chain_id: &Bytes32) -> Result<Entry, RemoteError>;

    // Api for submitting entries, the commit must come before the reveal
    fn commit(&self, commit: &[u8]) -> Result<(), RemoteError>;
    fn reveal(&self, reveal: &[u8]) -> Result<(), RemoteError>;
}

impl<T: Remote + ?Sized> Remote for &T {
    fn fetch_entry(&self, hash: &Bytes32) -> Result<Entry, RemoteError> {
        (**self).fetch_entry(hash)
    }

    fn fetch_first_entry(&self, chain_id: &Bytes32) -> Result<Entry, RemoteError> {
        (**self).fetch_first_entry(chain_id)
    }

    fn commit(&self, commit: &[u8]) -> Result<(), RemoteError> {
        (**self).commit(commit)
    }

    fn reveal(&self, reveal: &[u8]) -> Result<(), RemoteError> {
        (**self).reveal(reveal)
    }
}
