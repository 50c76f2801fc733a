//! Ledger entries and the pure primitives the ledger defines over them.
//!
//! On the wire an entry is:
//!
//! | Type      | Name          | Description |
//! | --------: | ------------- | ----------- |
//! | u8        | version       | Always `0x00` |
//! | [u8; 32]  | chain id      | The chain this entry belongs to |
//! | u16 BE    | ext ids size  | Total size of the ext id section |
//! | ...       | ext ids       | Repeated `u16 BE` length followed by the ext id bytes |
//! | [u8; N]   | content       | Remainder of the entry |
//!
//! The ext id section plus the content may not exceed [`ENTRY_MAX_DATA_LEN`].
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::hash::{sha256, Bytes32, HASH_SIZE};

pub const ENTRY_VERSION: u8 = 0x00;
pub const ENTRY_HEADER_SIZE: usize = 1 + HASH_SIZE + 2;
pub const ENTRY_MAX_DATA_LEN: usize = 10 * 1024;

/// Bytes each ext id costs on top of its own length
pub const EXT_ID_OVERHEAD: usize = 2;

/// Extra entry credits charged for the first entry of a new chain
pub const NEW_CHAIN_COST: u8 = 10;

#[derive(Error, Debug)]
pub enum EntryError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("entry data length {0} exceeds 10240")]
    TooLarge(usize),
    #[error("entry shorter than the 35 byte header")]
    TooShort,
    #[error("unsupported entry version {0}")]
    Version(u8),
    #[error("ext id {0} is too long")]
    ExtIdLength(usize),
    #[error("ext ids overrun the entry")]
    ExtIdOverrun,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub chain_id: Bytes32,
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

/// A marshaled entry along with its entry hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub hash: Bytes32,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new(chain_id: Bytes32, ext_ids: Vec<Vec<u8>>, content: Vec<u8>) -> Self {
        Entry {
            chain_id,
            ext_ids,
            content,
        }
    }

    fn ext_ids_size(&self) -> usize {
        self.ext_ids
            .iter()
            .map(|ext_id| EXT_ID_OVERHEAD + ext_id.len())
            .sum()
    }

    pub fn data_len(&self) -> usize {
        self.ext_ids_size() + self.content.len()
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>, EntryError> {
        let ext_ids_size = self.ext_ids_size();
        let data_len = ext_ids_size + self.content.len();
        if data_len > ENTRY_MAX_DATA_LEN {
            return Err(EntryError::TooLarge(data_len));
        }

        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + data_len);
        buf.write_u8(ENTRY_VERSION)?;
        buf.extend_from_slice(self.chain_id.as_bytes());
        buf.write_u16::<BigEndian>(ext_ids_size as u16)?;

        for ext_id in self.ext_ids.iter() {
            buf.write_u16::<BigEndian>(ext_id.len() as u16)?;
            buf.extend_from_slice(ext_id);
        }
        buf.extend_from_slice(&self.content);

        Ok(buf)
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Entry, EntryError> {
        if data.len() < ENTRY_HEADER_SIZE {
            return Err(EntryError::TooShort);
        }
        if data.len() - ENTRY_HEADER_SIZE > ENTRY_MAX_DATA_LEN {
            return Err(EntryError::TooLarge(data.len() - ENTRY_HEADER_SIZE));
        }

        let mut cur = Cursor::new(data);

        let version = cur.read_u8()?;
        if version != ENTRY_VERSION {
            return Err(EntryError::Version(version));
        }

        let chain_id = {
            let mut chain_id = [0u8; HASH_SIZE];
            cur.read_exact(&mut chain_id)?;
            Bytes32(chain_id)
        };

        let ext_ids_size = cur.read_u16::<BigEndian>()? as usize;
        if ext_ids_size > data.len() - ENTRY_HEADER_SIZE {
            return Err(EntryError::ExtIdOverrun);
        }

        let mut ext_ids = Vec::new();
        let mut remaining = ext_ids_size;
        while remaining > 0 {
            if remaining < EXT_ID_OVERHEAD {
                return Err(EntryError::ExtIdOverrun);
            }
            let len = cur.read_u16::<BigEndian>()? as usize;
            remaining -= EXT_ID_OVERHEAD;

            if len > remaining {
                return Err(EntryError::ExtIdOverrun);
            }
            let mut ext_id = vec![0; len];
            cur.read_exact(&mut ext_id[..])?;
            remaining -= len;

            ext_ids.push(ext_id);
        }

        let offset = ENTRY_HEADER_SIZE + ext_ids_size;
        Ok(Entry {
            chain_id,
            ext_ids,
            content: data[offset..].to_vec(),
        })
    }

    pub fn seal(&self) -> Result<Sealed, EntryError> {
        let data = self.marshal_binary()?;
        Ok(Sealed {
            hash: compute_entry_hash(&data),
            data,
        })
    }
}

/// `sha256(sha512(data) || data)` over the marshaled entry
pub fn compute_entry_hash(data: &[u8]) -> Bytes32 {
    let prefix = Sha512::digest(data);

    let mut hash = Sha256::new();
    hash.update(prefix);
    hash.update(data);
    Bytes32(hash.finalize().into())
}

/// The chain id is the hash of the concatenated hashes of each name id.
pub fn compute_chain_id<T: AsRef<[u8]>>(name_ids: &[T]) -> Bytes32 {
    let mut hash = Sha256::new();
    for name_id in name_ids {
        hash.update(sha256(name_id.as_ref()).as_bytes());
    }
    Bytes32(hash.finalize().into())
}

/// Entry credit cost for a marshaled entry of `size` bytes, 1 credit per KiB
/// of data with a minimum of 1.
pub fn entry_cost(size: usize, new_chain: bool) -> Result<u8, EntryError> {
    if size < ENTRY_HEADER_SIZE {
        return Err(EntryError::TooShort);
    }
    let size = size - ENTRY_HEADER_SIZE;
    if size > ENTRY_MAX_DATA_LEN {
        return Err(EntryError::TooLarge(size));
    }

    let cost = size.div_ceil(1024).max(1) as u8;
    if new_chain {
        Ok(cost + NEW_CHAIN_COST)
    } else {
        Ok(cost)
    }
}
