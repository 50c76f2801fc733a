//! Store arbitrary data on a Factom style ledger as a Data Store chain.
//!
//! The data, optionally compressed, is split into Data Block entries of at most
//! [`ENTRY_MAX_DATA_LEN`](entry::ENTRY_MAX_DATA_LEN) bytes. Their hashes are
//! listed by a linked list of Data Block Index (DBI) entries, and the first
//! entry of the chain holds the [`Metadata`](metadata::Metadata) pointing at
//! the head of that list.
//!
//! Writing goes through [`Generator`](generate::Generator), reading through
//! [`Metadata::lookup`](metadata::Metadata::lookup) and
//! [`Metadata::download`](metadata::Metadata::download).
use thiserror::Error;

pub mod chunk;
pub mod commit;
pub mod dbi;
pub mod download;
pub mod entry;
pub mod generate;
pub mod hash;
pub mod key;
pub mod metadata;
pub mod remote;

pub use crate::download::DownloadError;
pub use crate::generate::{GenerateError, Generated, Generator};
pub use crate::hash::Bytes32;
pub use crate::key::EsKey;
pub use crate::metadata::{Compression, Format, Metadata};
pub use crate::remote::{Remote, RemoteError};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Metadata(#[from] metadata::MetadataError),
    #[error(transparent)]
    Entry(#[from] entry::EntryError),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
}
