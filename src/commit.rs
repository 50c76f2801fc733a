use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;
use time::OffsetDateTime;

use crate::entry::{entry_cost, EntryError, ENTRY_HEADER_SIZE};
use crate::hash::{sha256, sha256d, Bytes32, HASH_SIZE};
use crate::key::EsKey;

pub const COMMIT_VERSION: u8 = 0x00;

const SIGNED_ENTRY_SIZE: usize = 1 + 6 + HASH_SIZE + 1;
const SIGNED_CHAIN_SIZE: usize = 1 + 6 + 3 * HASH_SIZE + 1;
const SIGNATURE_BLOCK: usize = 32 + 64;

pub const ENTRY_COMMIT_SIZE: usize = SIGNED_ENTRY_SIZE + SIGNATURE_BLOCK;
pub const CHAIN_COMMIT_SIZE: usize = SIGNED_CHAIN_SIZE + SIGNATURE_BLOCK;

#[derive(Error, Debug)]
pub enum CommitError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("invalid commit size {0}")]
    Size(usize),
    #[error("unsupported commit version {0}")]
    Version(u8),
    #[error("invalid commit signature")]
    Signature,
    #[error("timestamp {0} does not fit a commit")]
    Timestamp(OffsetDateTime),
    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// The chain specific part of a chain creating commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCommit {
    pub chain_id_hash: Bytes32,
    pub weld: Bytes32,
}

/// A decoded and signature checked commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub timestamp_ms: u64,
    pub chain: Option<ChainCommit>,
    pub entry_hash: Bytes32,
    pub cost: u8,
    pub public_key: [u8; 32],
    pub tx_id: Bytes32,
}

impl ChainCommit {
    pub fn new(chain_id: &Bytes32, entry_hash: &Bytes32) -> Self {
        let mut weld = Vec::with_capacity(2 * HASH_SIZE);
        weld.extend_from_slice(entry_hash.as_bytes());
        weld.extend_from_slice(chain_id.as_bytes());

        ChainCommit {
            chain_id_hash: sha256d(chain_id.as_bytes()),
            weld: sha256d(&weld),
        }
    }
}

/// Build the signed commit for a marshaled entry (`reveal`) with the given entry
/// hash. Returns the commit bytes and the commit transaction id.
pub fn generate_commit(
    key: &EsKey,
    reveal: &[u8],
    hash: &Bytes32,
    new_chain: bool,
    timestamp: OffsetDateTime,
) -> Result<(Vec<u8>, Bytes32), CommitError> {
    if reveal.len() < ENTRY_HEADER_SIZE {
        return Err(EntryError::TooShort.into());
    }
    let cost = entry_cost(reveal.len(), new_chain)?;

    // Milliseconds since the epoch, stored in 6 bytes
    let ms = u64::try_from(timestamp.unix_timestamp_nanos() / 1_000_000)
        .ok()
        .filter(|ms| *ms < 1 << 48)
        .ok_or(CommitError::Timestamp(timestamp))?;

    let mut commit = Vec::with_capacity(CHAIN_COMMIT_SIZE);
    commit.write_u8(COMMIT_VERSION)?;
    commit.write_u48::<BigEndian>(ms)?;

    if new_chain {
        let chain_id = Bytes32::from_slice(&reveal[1..1 + HASH_SIZE]).unwrap_or_default();
        let chain = ChainCommit::new(&chain_id, hash);
        commit.extend_from_slice(chain.chain_id_hash.as_bytes());
        commit.extend_from_slice(chain.weld.as_bytes());
    }
    commit.extend_from_slice(hash.as_bytes());
    commit.write_u8(cost)?;

    let tx_id = sha256(&commit);
    let signature = key.sign(&commit);
    commit.extend_from_slice(&key.public_key());
    commit.extend_from_slice(&signature);

    Ok((commit, tx_id))
}

pub fn parse_commit(data: &[u8]) -> Result<Commit, CommitError> {
    let signed_len = match data.len() {
        ENTRY_COMMIT_SIZE => SIGNED_ENTRY_SIZE,
        CHAIN_COMMIT_SIZE => SIGNED_CHAIN_SIZE,
        x => return Err(CommitError::Size(x)),
    };
    let (signed, sig_block) = data.split_at(signed_len);

    let public_key: [u8; 32] = sig_block[..32]
        .try_into()
        .map_err(|_| CommitError::Size(data.len()))?;
    let signature: [u8; 64] = sig_block[32..]
        .try_into()
        .map_err(|_| CommitError::Size(data.len()))?;

    let verifying = VerifyingKey::from_bytes(&public_key).map_err(|_| CommitError::Signature)?;
    verifying
        .verify(signed, &Signature::from_bytes(&signature))
        .map_err(|_| CommitError::Signature)?;

    let mut cur = Cursor::new(signed);
    let version = cur.read_u8()?;
    if version != COMMIT_VERSION {
        return Err(CommitError::Version(version));
    }
    let timestamp_ms = cur.read_u48::<BigEndian>()?;

    let mut read_hash = || -> Result<Bytes32, CommitError> {
        let mut hash = [0u8; HASH_SIZE];
        cur.read_exact(&mut hash)?;
        Ok(Bytes32(hash))
    };

    let chain = if signed_len == SIGNED_CHAIN_SIZE {
        Some(ChainCommit {
            chain_id_hash: read_hash()?,
            weld: read_hash()?,
        })
    } else {
        None
    };
    let entry_hash = read_hash()?;
    let cost = cur.read_u8()?;

    Ok(Commit {
        timestamp_ms,
        chain,
        entry_hash,
        cost,
        public_key,
        tx_id: sha256(signed),
    })
}
