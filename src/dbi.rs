//! Data Block Index (DBI)
//!
//! The entry hashes of every Data Block, in order, form the DBI. Since a large
//! DBI does not fit in one entry it is spread across a singly linked list of
//! DBI entries:
//!
//! | Part    | Content |
//! | ------- | ------- |
//! | ext ids | One 32 byte ext id, the entry hash of the next DBI entry. Empty for the last |
//! | content | Packed 32 byte Data Block entry hashes |
//!
//! Every linked DBI entry holds exactly [`MAX_LINKED_DBI_HASH_COUNT`] hashes and
//! the last one holds the rest, up to [`MAX_DBI_HASH_COUNT`].
//!
//! An entry hash covers the ext ids, so a DBI entry can only be built once the
//! entry it links to has been built. The list is therefore built from its tail
//! towards its head, and the hash of the head becomes `dbi-start`.
use log::debug;
use thiserror::Error;

use crate::entry::{Entry, EntryError, Sealed, ENTRY_MAX_DATA_LEN, EXT_ID_OVERHEAD};
use crate::hash::{Bytes32, HASH_SIZE};

/// Hashes in a DBI entry with no link
pub const MAX_DBI_HASH_COUNT: usize = ENTRY_MAX_DATA_LEN / HASH_SIZE;

/// Hashes in a DBI entry that also links to the next one
pub const MAX_LINKED_DBI_HASH_COUNT: usize =
    (ENTRY_MAX_DATA_LEN - HASH_SIZE - EXT_ID_OVERHEAD) / HASH_SIZE;

// Extra room the last DBI entry has over a linked one
const UNLINKED_SLACK: usize = MAX_DBI_HASH_COUNT - MAX_LINKED_DBI_HASH_COUNT;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DbiError {
    #[error("invalid DBI entry content: length {0} is not a multiple of 32")]
    ContentLength(usize),
    #[error("invalid DBI entry content: {got} hashes, expected {expected}")]
    HashCount { expected: usize, got: usize },
    #[error("missing or invalid DBI entry link")]
    Link,
    #[error("unexpected link in the last DBI entry")]
    UnexpectedLink,
}

/// Number of DBI entries needed for `block_count` Data Blocks.
pub fn index_count(block_count: usize) -> usize {
    if block_count == 0 {
        return 0;
    }

    let mut count = block_count / MAX_LINKED_DBI_HASH_COUNT;
    if block_count % MAX_LINKED_DBI_HASH_COUNT > UNLINKED_SLACK {
        count += 1;
    }
    count.max(1)
}

/// Number of hashes held by the last DBI entry.
///
/// A remainder too small to be worth its own entry is folded into the last
/// one, which has the room for it since it carries no link.
pub fn trailing_count(block_count: usize) -> usize {
    let trailing = block_count % MAX_LINKED_DBI_HASH_COUNT;
    if trailing <= UNLINKED_SLACK && block_count > trailing {
        trailing + MAX_LINKED_DBI_HASH_COUNT
    } else {
        trailing
    }
}

/// Build the DBI entries for the given Data Block hashes.
///
/// The entries are returned in traversal order, the first one being the head
/// whose hash is `dbi-start`.
pub fn build(chain_id: &Bytes32, block_hashes: &[Bytes32]) -> Result<Vec<Sealed>, EntryError> {
    let count = index_count(block_hashes.len());
    let mut sealed: Vec<Sealed> = Vec::with_capacity(count);

    let mut end = block_hashes.len();
    let mut start = end - trailing_count(block_hashes.len()).min(end);
    let mut link: Option<Bytes32> = None;

    for _ in 0..count {
        let content = Vec::with_capacity((end - start) * HASH_SIZE);
        let mut entry = Entry::new(*chain_id, vec![], content);
        for hash in block_hashes[start..end].iter() {
            entry.content.extend_from_slice(hash.as_bytes());
        }
        if let Some(next) = link {
            entry.ext_ids.push(next.as_bytes().to_vec());
        }

        let dbi = entry.seal()?;
        debug!(
            "DBI entry {} holds {} hashes, links to {:?}",
            dbi.hash,
            end - start,
            link
        );
        link = Some(dbi.hash);
        sealed.push(dbi);

        end = start;
        start = start.saturating_sub(MAX_LINKED_DBI_HASH_COUNT);
    }

    sealed.reverse();
    Ok(sealed)
}

/// Walks the DBI linked list from `dbi-start`, validating each DBI entry
/// against the number of Data Blocks still outstanding.
pub struct DbiWalker {
    next: Option<Bytes32>,
    remaining: usize,
}

impl DbiWalker {
    pub fn new(dbi_start: Bytes32, block_count: usize) -> Self {
        DbiWalker {
            next: if block_count > 0 { Some(dbi_start) } else { None },
            remaining: block_count,
        }
    }

    /// Hash of the next DBI entry to fetch, `None` once every Data Block hash
    /// has been read.
    pub fn next_entry(&self) -> Option<Bytes32> {
        self.next
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Validate a fetched DBI entry and return the Data Block hashes it holds.
    pub fn consume(&mut self, entry: &Entry) -> Result<Vec<Bytes32>, DbiError> {
        if entry.content.len() % HASH_SIZE != 0 {
            return Err(DbiError::ContentLength(entry.content.len()));
        }
        let count = entry.content.len() / HASH_SIZE;

        if count < self.remaining {
            // Not the last, must be full and linked
            if count != MAX_LINKED_DBI_HASH_COUNT {
                return Err(DbiError::HashCount {
                    expected: MAX_LINKED_DBI_HASH_COUNT,
                    got: count,
                });
            }
            match &entry.ext_ids[..] {
                [link] => {
                    self.next = Some(Bytes32::from_slice(link).ok_or(DbiError::Link)?);
                }
                _ => return Err(DbiError::Link),
            }
        } else {
            if count != self.remaining {
                return Err(DbiError::HashCount {
                    expected: self.remaining,
                    got: count,
                });
            }
            if !entry.ext_ids.is_empty() {
                return Err(DbiError::UnexpectedLink);
            }
            self.next = None;
        }
        self.remaining -= count;

        Ok(entry
            .content
            .chunks_exact(HASH_SIZE)
            .filter_map(Bytes32::from_slice)
            .collect())
    }
}

#[cfg(test)]
mod test_dbi {
    use super::*;
    use crate::entry::compute_chain_id;
    use crate::hash::sha256;
    use std::collections::HashMap;

    const LINKED: usize = MAX_LINKED_DBI_HASH_COUNT;

    fn hashes(count: usize) -> Vec<Bytes32> {
        (0..count as u64).map(|i| sha256(&i.to_le_bytes())).collect()
    }

    // Build then walk the list through a map standing in for the ledger
    fn walk(
        sealed: &[Sealed],
        start: Bytes32,
        block_count: usize,
    ) -> Result<Vec<Bytes32>, DbiError> {
        let entries: HashMap<Bytes32, Entry> = sealed
            .iter()
            .map(|s| (s.hash, Entry::unmarshal_binary(&s.data).unwrap()))
            .collect();

        let mut walker = DbiWalker::new(start, block_count);
        let mut out = Vec::new();
        while let Some(next) = walker.next_entry() {
            out.extend(walker.consume(&entries[&next])?);
        }
        Ok(out)
    }

    #[test]
    fn limits() {
        assert_eq!(MAX_DBI_HASH_COUNT, 320);
        assert_eq!(MAX_LINKED_DBI_HASH_COUNT, 318);
    }

    #[test]
    fn index_counts() {
        assert_eq!(index_count(0), 0);
        assert_eq!(index_count(1), 1);
        assert_eq!(index_count(2), 1);
        assert_eq!(index_count(3), 1);
        assert_eq!(index_count(LINKED), 1);
        assert_eq!(index_count(LINKED + 1), 1);
        assert_eq!(index_count(LINKED + 2), 1);
        assert_eq!(index_count(LINKED + 3), 2);
        assert_eq!(index_count(2 * LINKED), 2);
        assert_eq!(index_count(2 * LINKED + 1), 2);
        assert_eq!(index_count(2 * LINKED + 2), 2);
        assert_eq!(index_count(2 * LINKED + 3), 3);
        assert_eq!(index_count(10 * LINKED + 100), 11);
    }

    #[test]
    fn trailing_counts() {
        assert_eq!(trailing_count(1), 1);
        assert_eq!(trailing_count(2), 2);
        assert_eq!(trailing_count(3), 3);
        assert_eq!(trailing_count(LINKED), LINKED);
        assert_eq!(trailing_count(LINKED + 2), MAX_DBI_HASH_COUNT);
        assert_eq!(trailing_count(LINKED + 3), 3);
        assert_eq!(trailing_count(2 * LINKED + 1), LINKED + 1);
    }

    #[test]
    fn build_and_walk() {
        let chain_id = compute_chain_id(&[b"dbi".as_slice()]);
        for count in [
            1,
            2,
            3,
            LINKED - 1,
            LINKED,
            LINKED + 1,
            LINKED + 2,
            LINKED + 3,
            2 * LINKED,
            2 * LINKED + 3,
            3 * LINKED + 2,
        ] {
            let blocks = hashes(count);
            let sealed = build(&chain_id, &blocks).unwrap();
            assert_eq!(sealed.len(), index_count(count), "count {}", count);

            let walked = walk(&sealed, sealed[0].hash, count).unwrap();
            assert_eq!(walked, blocks, "count {}", count);
        }
    }

    #[test]
    fn head_links_and_tail_is_bare() {
        let chain_id = compute_chain_id(&[b"dbi".as_slice()]);
        let sealed = build(&chain_id, &hashes(2 * LINKED + 3)).unwrap();
        let entries: Vec<Entry> = sealed
            .iter()
            .map(|s| Entry::unmarshal_binary(&s.data).unwrap())
            .collect();

        assert_eq!(entries[0].ext_ids, vec![sealed[1].hash.as_bytes().to_vec()]);
        assert_eq!(entries[1].ext_ids, vec![sealed[2].hash.as_bytes().to_vec()]);
        assert!(entries[2].ext_ids.is_empty());

        assert_eq!(entries[0].content.len(), LINKED * HASH_SIZE);
        assert_eq!(entries[2].content.len(), 3 * HASH_SIZE);
        assert!(entries.iter().all(|e| e.chain_id == chain_id));
    }

    #[test]
    fn largest_entries_fit() {
        let chain_id = Bytes32::default();
        let sealed = build(&chain_id, &hashes(LINKED + 2)).unwrap();
        assert_eq!(sealed.len(), 1);

        let linked = Entry::new(
            chain_id,
            vec![vec![0; HASH_SIZE]],
            vec![0; LINKED * HASH_SIZE],
        );
        assert!(linked.marshal_binary().is_ok());
    }

    fn linked_entry(count: usize, ext_ids: Vec<Vec<u8>>) -> Entry {
        Entry::new(Bytes32::default(), ext_ids, vec![1; count * HASH_SIZE])
    }

    #[test]
    fn walker_partial_hash() {
        let mut walker = DbiWalker::new(Bytes32::default(), 2);
        let mut entry = linked_entry(2, vec![]);
        entry.content.pop();
        assert_eq!(walker.consume(&entry), Err(DbiError::ContentLength(63)));
    }

    #[test]
    fn walker_short_linked() {
        let mut walker = DbiWalker::new(Bytes32::default(), 1000);
        let entry = linked_entry(10, vec![vec![2; 32]]);
        assert_eq!(
            walker.consume(&entry),
            Err(DbiError::HashCount {
                expected: LINKED,
                got: 10
            })
        );
    }

    #[test]
    fn walker_missing_link() {
        let mut walker = DbiWalker::new(Bytes32::default(), 1000);
        assert_eq!(
            walker.consume(&linked_entry(LINKED, vec![])),
            Err(DbiError::Link)
        );

        let mut walker = DbiWalker::new(Bytes32::default(), 1000);
        assert_eq!(
            walker.consume(&linked_entry(LINKED, vec![vec![2; 31]])),
            Err(DbiError::Link)
        );

        let mut walker = DbiWalker::new(Bytes32::default(), 1000);
        assert_eq!(
            walker.consume(&linked_entry(LINKED, vec![vec![2; 32], vec![3; 32]])),
            Err(DbiError::Link)
        );
    }

    #[test]
    fn walker_terminal_count() {
        let mut walker = DbiWalker::new(Bytes32::default(), 5);
        assert_eq!(
            walker.consume(&linked_entry(6, vec![])),
            Err(DbiError::HashCount {
                expected: 5,
                got: 6
            })
        );
    }

    #[test]
    fn walker_unexpected_link() {
        let mut walker = DbiWalker::new(Bytes32::default(), 5);
        assert_eq!(
            walker.consume(&linked_entry(5, vec![vec![2; 32]])),
            Err(DbiError::UnexpectedLink)
        );
    }

    #[test]
    fn walker_follows_link() {
        let mut walker = DbiWalker::new(Bytes32::default(), LINKED + 4);
        let hashes = walker
            .consume(&linked_entry(LINKED, vec![vec![2; 32]]))
            .unwrap();

        assert_eq!(hashes.len(), LINKED);
        assert_eq!(walker.remaining(), 4);
        assert_eq!(walker.next_entry(), Some(Bytes32([2; 32])));
    }

    #[test]
    fn tampered_list_is_rejected() {
        let chain_id = Bytes32::default();
        let blocks = hashes(2 * LINKED + 3);
        let sealed = build(&chain_id, &blocks).unwrap();

        // Wrong declared block count
        assert!(walk(&sealed, sealed[0].hash, blocks.len() + 1).is_err());
        assert!(walk(&sealed, sealed[0].hash, blocks.len() - 1).is_err());
    }
}
