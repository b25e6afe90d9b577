//! Content-meta database: keyed metadata blobs with explicit commit.

use std::path::Path;

use rusqlite::Connection;
use sidelink_pkg::{MetaKey, MetaType};
use tracing::debug;

use crate::Result;

/// The device's content-meta database.
///
/// `set` stages a record; nothing is durable until `commit`. The installer
/// commits once per metadata blob and once more at the end of an install.
pub trait MetaDb {
    /// Stages a metadata blob under its key, replacing any staged or
    /// committed record with the same key.
    fn set(&mut self, key: &MetaKey, blob: &[u8]) -> Result<()>;

    /// Persists every staged record atomically.
    fn commit(&mut self) -> Result<()>;
}

/// SQLite-backed [`MetaDb`].
#[derive(Debug)]
pub struct SqliteMetaDb {
    conn: Connection,
    pending: Vec<(MetaKey, Vec<u8>)>,
}

impl SqliteMetaDb {
    /// Opens (or creates) the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS content_meta (
                title_id  INTEGER NOT NULL,
                version   INTEGER NOT NULL,
                meta_type INTEGER NOT NULL,
                blob      BLOB NOT NULL,
                PRIMARY KEY (title_id, version, meta_type)
            )",
        )?;
        Ok(Self {
            conn,
            pending: Vec::new(),
        })
    }

    /// Fetches a committed blob, if present.
    pub fn get(&self, key: &MetaKey) -> Result<Option<Vec<u8>>> {
        let mut stmt = self.conn.prepare(
            "SELECT blob FROM content_meta WHERE title_id = ?1 AND version = ?2 AND meta_type = ?3",
        )?;
        let mut rows = stmt.query(rusqlite::params![
            encode_title_id(key.id),
            key.version,
            key.ty.raw(),
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Lists the keys of every committed record.
    pub fn keys(&self) -> Result<Vec<MetaKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT title_id, version, meta_type FROM content_meta")?;
        let rows = stmt.query_map([], |row| {
            Ok(MetaKey {
                id: decode_title_id(row.get(0)?),
                version: row.get(1)?,
                ty: MetaType::from_raw(row.get(2)?),
            })
        })?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

impl MetaDb for SqliteMetaDb {
    fn set(&mut self, key: &MetaKey, blob: &[u8]) -> Result<()> {
        self.pending.retain(|(staged, _)| staged != key);
        self.pending.push((*key, blob.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for (key, blob) in &self.pending {
            tx.execute(
                "INSERT OR REPLACE INTO content_meta (title_id, version, meta_type, blob)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![encode_title_id(key.id), key.version, key.ty.raw(), blob],
            )?;
        }
        tx.commit()?;
        debug!(records = self.pending.len(), "content-meta records committed");
        self.pending.clear();
        Ok(())
    }
}

/// SQLite integers are signed; title ids round-trip through bit-preserving
/// casts.
#[allow(clippy::cast_possible_wrap)]
fn encode_title_id(id: u64) -> i64 {
    id as i64
}

#[allow(clippy::cast_sign_loss)]
fn decode_title_id(id: i64) -> u64 {
    id as u64
}
