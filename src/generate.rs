use std::io::Read;

use log::{debug, info};
use serde_json::value::RawValue;
use thiserror::Error;
use time::OffsetDateTime;

use crate::chunk::{Chunk, ChunkError};
use crate::commit::{generate_commit, CommitError};
use crate::dbi;
use crate::entry::{compute_chain_id, entry_cost, Entry, EntryError, Sealed};
use crate::hash::Bytes32;
use crate::key::EsKey;
use crate::metadata::{name_ids, Compression, Metadata, MetadataError};
use crate::remote::{Remote, RemoteError};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    First,
    Index,
    DataBlock,
}

/// An entry ready to be submitted to the ledger.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub kind: Kind,
    pub hash: Bytes32,
    pub commit: Vec<u8>,
    pub reveal: Vec<u8>,
    pub cost: u8,
}

/// Everything needed to create a Data Store chain.
///
/// `entries` is ordered as: the first entry, the DBI entries from head to tail,
/// then the Data Blocks in order. Only the first entry has to be submitted
/// first, the rest may go in any order.
#[derive(Debug, Clone)]
pub struct Generated {
    pub chain_id: Bytes32,
    pub entries: Vec<Prepared>,
    pub total_cost: u64,
}

impl Generated {
    pub fn count(&self, kind: Kind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Commit and reveal every entry in order. There are no retries here, a
    /// failed submission can be resumed by submitting again since reveals of
    /// known entries are accepted.
    pub fn submit<R: Remote>(&self, remote: &R) -> Result<(), RemoteError> {
        for (i, entry) in self.entries.iter().enumerate() {
            debug!("submitting {}/{} {}", i + 1, self.entries.len(), entry.hash);
            remote.commit(&entry.commit)?;
            remote.reveal(&entry.reveal)?;
        }
        info!("submitted {} entries to chain {}", self.entries.len(), self.chain_id);
        Ok(())
    }
}

/// Builds the entries of a Data Store chain for some data.
///
/// `size` is the uncompressed size of the data and `data_hash` its sha256d hash.
/// If the data being read is compressed, set the [`Compression`] with the
/// compressed size. The namespace is appended to the name ids so it must be
/// known, along with the data hash, to recompute the chain id.
pub struct Generator {
    metadata: Metadata,
    namespace: Vec<Vec<u8>>,
    timestamp: Option<OffsetDateTime>,
}

impl Generator {
    pub fn new(size: u64, data_hash: Bytes32) -> Self {
        Generator {
            metadata: Metadata::new(data_hash, size),
            namespace: Vec::new(),
            timestamp: None,
        }
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.metadata.compression = Some(compression);
        self
    }

    pub fn app_metadata(mut self, app_metadata: Box<RawValue>) -> Self {
        self.metadata.app_metadata = Some(app_metadata);
        self
    }

    pub fn namespace<T: AsRef<[u8]>>(mut self, namespace: &[T]) -> Self {
        self.namespace = namespace.iter().map(|ns| ns.as_ref().to_vec()).collect();
        self
    }

    /// Commit timestamp, defaults to now
    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn chain_id(&self) -> Bytes32 {
        compute_chain_id(&name_ids(&self.metadata.data_hash, &self.namespace))
    }

    fn prepare(
        key: &EsKey,
        kind: Kind,
        sealed: Sealed,
        timestamp: OffsetDateTime,
    ) -> Result<Prepared, GenerateError> {
        let new_chain = kind == Kind::First;
        let cost = entry_cost(sealed.data.len(), new_chain)?;
        let (commit, _) = generate_commit(key, &sealed.data, &sealed.hash, new_chain, timestamp)?;

        Ok(Prepared {
            kind,
            hash: sealed.hash,
            commit,
            reveal: sealed.data,
            cost,
        })
    }

    /// Reads exactly the stored size from `data` and builds every entry.
    /// Nothing is submitted.
    pub fn generate<R: Read>(self, key: &EsKey, data: R) -> Result<Generated, GenerateError> {
        let Generator {
            mut metadata,
            namespace,
            timestamp,
        } = self;
        metadata.validate_settings()?;

        let timestamp = timestamp.unwrap_or_else(OffsetDateTime::now_utc);
        let ids = name_ids(&metadata.data_hash, &namespace);
        let chain_id = compute_chain_id(&ids);

        let chunks = Chunk::new(data, metadata.stored_size());
        let block_count = chunks.block_count();
        let index_count = dbi::index_count(block_count);
        debug!(
            "chain {}: {} data blocks, {} dbi entries",
            chain_id, block_count, index_count
        );

        // Grown as blocks are read, the declared size may not match the data
        let mut blocks = Vec::new();
        let mut block_hashes = Vec::new();
        for block in chunks {
            let sealed = Entry::new(chain_id, vec![], block?).seal()?;
            block_hashes.push(sealed.hash);
            blocks.push(Generator::prepare(key, Kind::DataBlock, sealed, timestamp)?);
        }

        let index = dbi::build(&chain_id, &block_hashes)?
            .into_iter()
            .map(|sealed| Generator::prepare(key, Kind::Index, sealed, timestamp))
            .collect::<Result<Vec<_>, _>>()?;
        metadata.dbi_start = index.first().map(|head| head.hash);
        metadata.validate()?;

        let first = Entry::new(chain_id, ids, serde_json::to_vec(&metadata)?).seal()?;

        let mut entries = Vec::with_capacity(1 + index.len() + blocks.len());
        entries.push(Generator::prepare(key, Kind::First, first, timestamp)?);
        entries.extend(index);
        entries.extend(blocks);

        let total_cost = entries.iter().map(|e| e.cost as u64).sum();
        info!(
            "generated {} entries for chain {}, total cost {}",
            entries.len(),
            chain_id,
            total_cost
        );

        Ok(Generated {
            chain_id,
            entries,
            total_cost,
        })
    }
}

#[cfg(test)]
mod test_generate {
    use super::*;
    use crate::dbi::{MAX_DBI_HASH_COUNT, MAX_LINKED_DBI_HASH_COUNT};
    use crate::entry::ENTRY_MAX_DATA_LEN;
    use crate::hash::sha256d;
    use crate::metadata::Format;
    use std::io::Cursor;

    const L: usize = ENTRY_MAX_DATA_LEN;

    fn generate(data: &[u8]) -> Generated {
        Generator::new(data.len() as u64, sha256d(data))
            .generate(&EsKey::new(), Cursor::new(data))
            .unwrap()
    }

    fn kinds(g: &Generated) -> (usize, usize, usize) {
        (
            g.count(Kind::First),
            g.count(Kind::Index),
            g.count(Kind::DataBlock),
        )
    }

    #[test]
    fn exactly_one_block() {
        let g = generate(&vec![5u8; L]);
        assert_eq!(g.entries.len(), 3);
        assert_eq!(kinds(&g), (1, 1, 1));

        // The first entry comes first, then the index then the block
        assert_eq!(g.entries[0].kind, Kind::First);
        assert_eq!(g.entries[1].kind, Kind::Index);
        assert_eq!(g.entries[2].kind, Kind::DataBlock);

        let index = Entry::unmarshal_binary(&g.entries[1].reveal).unwrap();
        assert!(index.ext_ids.is_empty());
        assert_eq!(index.content, g.entries[2].hash.as_bytes().to_vec());
    }

    #[test]
    fn first_entry() {
        let data = b"hello data store";
        let g = Generator::new(data.len() as u64, sha256d(data))
            .namespace(&[b"app".as_slice()])
            .app_metadata(RawValue::from_string(r#"{"name":"hello"}"#.to_string()).unwrap())
            .generate(&EsKey::new(), &data[..])
            .unwrap();

        let first = Entry::unmarshal_binary(&g.entries[0].reveal).unwrap();
        assert_eq!(first.chain_id, g.chain_id);
        assert_eq!(first.ext_ids, name_ids(&sha256d(data), &[b"app"]));

        let md = Metadata::from_entry(&first).unwrap();
        assert_eq!(md.size, data.len() as u64);
        assert_eq!(md.dbi_start, Some(g.entries[1].hash));
        assert_eq!(md.app_metadata.unwrap().get(), r#"{"name":"hello"}"#);
    }

    #[test]
    fn cost() {
        // 10 full blocks at 10 each, one index entry of 10 hashes at 1, and the
        // first entry at 1 + 10 for the new chain
        let g = generate(&vec![1u8; 10 * L]);
        assert_eq!(kinds(&g), (1, 1, 10));
        assert_eq!(g.total_cost, 100 + 1 + 11);
        assert_eq!(g.entries[0].cost, 11);
    }

    #[test]
    fn index_overflow() {
        // Fits a single unlinked index entry
        let g = generate(&vec![1u8; MAX_DBI_HASH_COUNT * L]);
        assert_eq!(kinds(&g), (1, 1, MAX_DBI_HASH_COUNT));

        // One block more forces a linked index entry
        let g = generate(&vec![1u8; MAX_DBI_HASH_COUNT * L + 1]);
        assert_eq!(kinds(&g), (1, 2, MAX_DBI_HASH_COUNT + 1));

        let head = Entry::unmarshal_binary(&g.entries[1].reveal).unwrap();
        let tail = Entry::unmarshal_binary(&g.entries[2].reveal).unwrap();
        assert_eq!(head.ext_ids, vec![g.entries[2].hash.as_bytes().to_vec()]);
        assert_eq!(head.content.len(), MAX_LINKED_DBI_HASH_COUNT * 32);
        assert!(tail.ext_ids.is_empty());
        assert_eq!(tail.content.len(), 3 * 32);
    }

    #[test]
    fn deterministic() {
        let data = vec![9u8; 3 * L + 11];
        let key = EsKey::from_seed([1; 32]);
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let run = || {
            Generator::new(data.len() as u64, sha256d(&data))
                .namespace(&[b"ns"])
                .timestamp(ts)
                .generate(&key, Cursor::new(&data))
                .unwrap()
        };
        let (a, b) = (run(), run());

        assert_eq!(a.chain_id, b.chain_id);
        assert_eq!(a.entries.len(), b.entries.len());
        for (x, y) in a.entries.iter().zip(b.entries.iter()) {
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.commit, y.commit);
        }

        // Only the data hash and namespace go into the chain id
        let other = Generator::new(1, sha256d(&data)).namespace(&[b"ns"]);
        assert_eq!(other.chain_id(), a.chain_id);
    }

    #[test]
    fn size_mismatch() {
        let data = vec![1u8; 100];
        let short = Generator::new(101, sha256d(&data)).generate(&EsKey::new(), &data[..]);
        assert!(matches!(
            short,
            Err(GenerateError::Chunk(ChunkError::Short { .. }))
        ));

        let long = Generator::new(99, sha256d(&data)).generate(&EsKey::new(), &data[..]);
        assert!(matches!(
            long,
            Err(GenerateError::Chunk(ChunkError::Long { .. }))
        ));
    }

    #[test]
    fn declared_size_larger_than_data() {
        let res = Generator::new(u64::MAX / 4, sha256d(b"abc"))
            .generate(&EsKey::new(), &b"abc"[..]);
        assert!(matches!(
            res,
            Err(GenerateError::Chunk(ChunkError::Short { read: 3, .. }))
        ));
    }

    #[test]
    fn timestamp_before_epoch() {
        let ts = OffsetDateTime::from_unix_timestamp(-1).unwrap();
        let res = Generator::new(3, sha256d(b"abc"))
            .timestamp(ts)
            .generate(&EsKey::new(), &b"abc"[..]);
        assert!(matches!(
            res,
            Err(GenerateError::Commit(CommitError::Timestamp(_)))
        ));
    }

    #[test]
    fn compressed_size_is_read() {
        // The stored size is the compressed one
        let stored = vec![1u8; 50];
        let g = Generator::new(1000, sha256d(b"whatever"))
            .compression(Compression::new(Format::Zlib, 50))
            .generate(&EsKey::new(), &stored[..])
            .unwrap();
        assert_eq!(kinds(&g), (1, 1, 1));

        let bad = Generator::new(1000, sha256d(b"whatever"))
            .compression(Compression::new(Format::Zlib, 49))
            .generate(&EsKey::new(), &stored[..]);
        assert!(bad.is_err());
    }

    #[test]
    fn invalid_settings() {
        let empty = Generator::new(0, sha256d(b"")).generate(&EsKey::new(), &b""[..]);
        assert!(matches!(
            empty,
            Err(GenerateError::Metadata(MetadataError::Size))
        ));

        let format = Generator::new(5, sha256d(b"12345"))
            .compression(Compression::new(Format::from("lz4".to_string()), 5))
            .generate(&EsKey::new(), &b"12345"[..]);
        assert!(matches!(
            format,
            Err(GenerateError::Metadata(MetadataError::Format(_)))
        ));
    }
}
