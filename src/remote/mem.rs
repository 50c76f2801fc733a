use log::{debug, warn};
use rusqlite as rs;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::commit::{parse_commit, ChainCommit};
use crate::entry::{compute_chain_id, compute_entry_hash, entry_cost, Entry};
use crate::hash::Bytes32;
use crate::remote::{Remote, RemoteError};

/// A local ledger kept in sqlite, either in memory or in a file.
///
/// Commits are signature checked and a reveal is only accepted for an entry
/// hash with a commit paying enough for it. A chain commit creates the chain,
/// its reveal becomes the first entry of the chain.
pub struct MemoryLedger {
    conn: Mutex<Connection>,
}

impl MemoryLedger {
    pub fn new(filename: Option<&Path>) -> Result<Self, RemoteError> {
        let conn = match filename {
            None => Connection::open_in_memory()?,
            Some(f) => Connection::open(f)?,
        };

        // Setup the db
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS commits (
                entry_hash BLOB PRIMARY KEY,
                chain_id_hash BLOB,
                cost INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS entries (
                hash BLOB PRIMARY KEY,
                chain_id BLOB NOT NULL,
                data BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS chains (
                chain_id BLOB PRIMARY KEY,
                first_hash BLOB NOT NULL
             );
             COMMIT;",
        )?;

        Ok(MemoryLedger {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid statement leaves nothing half written, carry on
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entry_count(&self) -> Result<usize, RemoteError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn chain_exists(conn: &Connection, chain_id: &Bytes32) -> Result<bool, RemoteError> {
        Ok(conn
            .prepare_cached("SELECT 1 FROM chains WHERE chain_id = ?")?
            .exists(rs::params![&chain_id.as_bytes()[..]])?)
    }
}

impl Remote for MemoryLedger {
    fn fetch_entry(&self, hash: &Bytes32) -> Result<Entry, RemoteError> {
        let conn = self.conn();
        let data: Option<Vec<u8>> = conn
            .prepare_cached("SELECT data FROM entries WHERE hash = ?")?
            .query_row(rs::params![&hash.as_bytes()[..]], |row| row.get(0))
            .optional()?;

        match data {
            Some(data) => Ok(Entry::unmarshal_binary(&data)?),
            None => Err(RemoteError::NotFound(*hash)),
        }
    }

    fn fetch_first_entry(&self, chain_id: &Bytes32) -> Result<Entry, RemoteError> {
        let first: Option<Vec<u8>> = self
            .conn()
            .prepare_cached("SELECT first_hash FROM chains WHERE chain_id = ?")?
            .query_row(rs::params![&chain_id.as_bytes()[..]], |row| row.get(0))
            .optional()?;

        let first = first
            .and_then(|hash| Bytes32::from_slice(&hash))
            .ok_or(RemoteError::ChainNotFound(*chain_id))?;
        self.fetch_entry(&first)
    }

    fn commit(&self, commit: &[u8]) -> Result<(), RemoteError> {
        let commit = parse_commit(commit)?;
        debug!(
            "commit {} for entry {} paying {}",
            commit.tx_id, commit.entry_hash, commit.cost
        );

        self.conn()
            .prepare_cached(
                "INSERT OR REPLACE INTO commits
                 (entry_hash, chain_id_hash, cost)
                 VALUES
                 (?, ?, ?)",
            )?
            .execute(rs::params![
                &commit.entry_hash.as_bytes()[..],
                commit.chain.map(|c| c.chain_id_hash.as_bytes().to_vec()),
                commit.cost,
            ])?;
        Ok(())
    }

    fn reveal(&self, reveal: &[u8]) -> Result<(), RemoteError> {
        let entry = Entry::unmarshal_binary(reveal)?;
        let hash = compute_entry_hash(reveal);

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists = tx
            .prepare_cached("SELECT 1 FROM entries WHERE hash = ?")?
            .exists(rs::params![&hash.as_bytes()[..]])?;
        if exists {
            debug!("entry {} already revealed", hash);
            return Ok(());
        }

        let commit: Option<(Option<Vec<u8>>, u8)> = tx
            .prepare_cached("SELECT chain_id_hash, cost FROM commits WHERE entry_hash = ?")?
            .query_row(rs::params![&hash.as_bytes()[..]], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let (chain_id_hash, paid) = commit.ok_or(RemoteError::NoCommit(hash))?;

        let new_chain = chain_id_hash.is_some();
        let cost = entry_cost(reveal.len(), new_chain)?;
        if paid < cost {
            warn!("entry {} paid {} of {}", hash, paid, cost);
            return Err(RemoteError::Rejected(format!(
                "entry {} paid {} but costs {}",
                hash, paid, cost
            )));
        }

        if let Some(chain_id_hash) = chain_id_hash {
            let expected = ChainCommit::new(&entry.chain_id, &hash).chain_id_hash;
            if chain_id_hash != expected.as_bytes() {
                return Err(RemoteError::Rejected(format!(
                    "chain commit does not match chain {}",
                    entry.chain_id
                )));
            }
            if compute_chain_id(&entry.ext_ids) != entry.chain_id {
                return Err(RemoteError::Rejected(format!(
                    "ext ids do not produce chain {}",
                    entry.chain_id
                )));
            }
            if MemoryLedger::chain_exists(&tx, &entry.chain_id)? {
                return Err(RemoteError::Rejected(format!(
                    "chain {} already exists",
                    entry.chain_id
                )));
            }

            tx.prepare_cached("INSERT INTO chains (chain_id, first_hash) VALUES (?, ?)")?
                .execute(rs::params![
                    &entry.chain_id.as_bytes()[..],
                    &hash.as_bytes()[..]
                ])?;
            debug!("chain {} created", entry.chain_id);
        } else if !MemoryLedger::chain_exists(&tx, &entry.chain_id)? {
            return Err(RemoteError::ChainNotFound(entry.chain_id));
        }

        tx.prepare_cached("INSERT INTO entries (hash, chain_id, data) VALUES (?, ?, ?)")?
            .execute(rs::params![
                &hash.as_bytes()[..],
                &entry.chain_id.as_bytes()[..],
                reveal
            ])?;
        tx.execute(
            "DELETE FROM commits WHERE entry_hash = ?",
            rs::params![&hash.as_bytes()[..]],
        )?;
        tx.commit()?;

        debug!("entry {} revealed", hash);
        Ok(())
    }
}
