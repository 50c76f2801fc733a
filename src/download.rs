use std::io::{copy, Read, Write};

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use log::{debug, info};
use rayon::prelude::*;
use thiserror::Error;

use crate::chunk::block_count;
use crate::dbi::{DbiError, DbiWalker};
use crate::entry::{compute_entry_hash, Entry, EntryError, ENTRY_MAX_DATA_LEN};
use crate::hash::{Bytes32, HashWriter};
use crate::metadata::{Format, Metadata, MetadataError};
use crate::remote::{Remote, RemoteError};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Dbi(#[from] DbiError),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("first entry belongs to chain {got}, expected {expected}")]
    ChainId { expected: Bytes32, got: Bytes32 },
    #[error("fetched entry {expected} hashes to {got}")]
    EntryHash { expected: Bytes32, got: Bytes32 },
    #[error("invalid Data Block {block} content: {len} bytes exceeds its {capacity} bytes")]
    BlockOverflow {
        block: usize,
        len: usize,
        capacity: usize,
    },
    #[error("invalid Data Block {block} content: {len} bytes, expected {capacity}")]
    BlockShort {
        block: usize,
        len: usize,
        capacity: usize,
    },
    #[error("invalid data size: got {got} bytes, expected {expected}")]
    Size { expected: u64, got: u64 },
    #[error("invalid data hash: got {got}, expected {expected}")]
    DataHash { expected: Bytes32, got: Bytes32 },
}

// Fetch an entry and make sure it is the one that was asked for
fn fetch_verified<R: Remote>(remote: &R, hash: &Bytes32) -> Result<Entry, DownloadError> {
    let entry = remote.fetch_entry(hash)?;

    let got = compute_entry_hash(&entry.marshal_binary()?);
    if got != *hash {
        return Err(DownloadError::EntryHash {
            expected: *hash,
            got,
        });
    }
    Ok(entry)
}

impl Metadata {
    /// Fetch the first entry of a Data Store chain and parse its Metadata.
    pub fn lookup<R: Remote>(remote: &R, chain_id: &Bytes32) -> Result<Metadata, DownloadError> {
        let first = remote.fetch_first_entry(chain_id)?;
        if first.chain_id != *chain_id {
            return Err(DownloadError::ChainId {
                expected: *chain_id,
                got: first.chain_id,
            });
        }

        let md = Metadata::from_entry(&first)?;
        debug!(
            "chain {}: size {}, stored size {}, dbi-start {:?}",
            chain_id,
            md.size,
            md.stored_size(),
            md.dbi_start
        );
        Ok(md)
    }

    /// Download the data into `data`, with a worker per available cpu.
    pub fn download<R: Remote, W: Write>(&self, remote: &R, data: W) -> Result<W, DownloadError> {
        self.download_with(remote, data, 0)
    }

    /// Download, verify and write the data.
    ///
    /// The data is streamed into `data` while it is being hashed, so on error
    /// `data` may already hold some incorrect bytes and must be discarded.
    /// `workers` of 0 picks the number of available cpus.
    pub fn download_with<R: Remote, W: Write>(
        &self,
        remote: &R,
        data: W,
        workers: usize,
    ) -> Result<W, DownloadError> {
        self.validate()?;
        let dbi_start = self.dbi_start.ok_or(MetadataError::DbiStart)?;

        let size = self.stored_size();
        let db_count = block_count(size);

        // Walk the DBI linked list for the Data Block hashes. The declared
        // size is untrusted, the list grows as DBI entries are validated.
        let mut db_hashes = Vec::new();
        let mut walker = DbiWalker::new(dbi_start, db_count);
        while let Some(next) = walker.next_entry() {
            let dbi = fetch_verified(remote, &next)?;
            db_hashes.extend(walker.consume(&dbi)?);
            debug!("DBI entry {}: {} blocks left", next, walker.remaining());
        }

        // Each Data Block owns its own region of the stored data, so they can
        // be fetched in any order and written without coordination.
        let mut c_data = vec![0u8; size as usize];
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        debug!(
            "fetching {} data blocks with {} workers",
            db_count,
            pool.current_num_threads()
        );

        pool.install(|| {
            c_data
                .par_chunks_mut(ENTRY_MAX_DATA_LEN)
                .zip(db_hashes.par_iter())
                .enumerate()
                .try_for_each(|(block, (region, hash))| {
                    let db = fetch_verified(remote, hash)?;

                    let (len, capacity) = (db.content.len(), region.len());
                    if len > capacity {
                        return Err(DownloadError::BlockOverflow {
                            block,
                            len,
                            capacity,
                        });
                    }
                    if len < capacity {
                        return Err(DownloadError::BlockShort {
                            block,
                            len,
                            capacity,
                        });
                    }
                    region.copy_from_slice(&db.content);
                    Ok(())
                })
        })?;

        // Decompress the data, if necessary
        let reader: Box<dyn Read + '_> = match self.compression.as_ref().map(|c| &c.format) {
            None => Box::new(&c_data[..]),
            Some(Format::Gzip) => Box::new(MultiGzDecoder::new(&c_data[..])),
            Some(Format::Zlib) => Box::new(ZlibDecoder::new(&c_data[..])),
            Some(Format::Unsupported(x)) => return Err(MetadataError::Format(x.clone()).into()),
        };

        // One byte past the declared size is enough to detect an overrun
        let mut out = HashWriter::new(data);
        let written = copy(&mut reader.take(self.size.saturating_add(1)), &mut out)?;
        out.flush()?;
        let (data, hash) = out.finalize();

        if written != self.size {
            return Err(DownloadError::Size {
                expected: self.size,
                got: written,
            });
        }
        if hash != self.data_hash {
            return Err(DownloadError::DataHash {
                expected: self.data_hash,
                got: hash,
            });
        }

        info!("downloaded and verified {} bytes", written);
        Ok(data)
    }
}
