//! Title registry: the installed-titles index the home menu reads.

use std::fs;
use std::io;
use std::path::PathBuf;

use sidelink_pkg::MetaKey;
use tracing::debug;

/// Last-modified event value for a completed install.
const EVENT_INSTALLED: u8 = 3;

/// One installed-title record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct TitleRecord {
    /// Base title the record is filed under.
    pub base_title_id: u64,
    /// Title id of the installed meta.
    pub title_id: u64,
    /// Installed version.
    pub version: u32,
    /// Raw meta type byte.
    pub meta_type: u8,
    /// Storage the content landed on.
    pub storage_id: u8,
    /// Last-modified event (3 = installed).
    pub event: u8,
}

/// Pushes installed-title records for the system to pick up.
///
/// Pushing must never remove existing records: deleting a base title's
/// record while installing its add-on content detaches the base game.
pub trait TitleRegistry {
    /// Adds or updates the record for `(base_title_id, key.id)`.
    fn push(&mut self, base_title_id: u64, key: &MetaKey, storage_id: u8) -> io::Result<()>;
}

/// JSON-file-backed [`TitleRegistry`].
#[derive(Debug)]
pub struct JsonTitleRegistry {
    path: PathBuf,
}

impl JsonTitleRegistry {
    /// Uses (or creates on first push) the index file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the record index from disk.
    pub fn records(&self) -> io::Result<Vec<TitleRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)?;
        serde_json::from_str(&data).map_err(io::Error::other)
    }

    fn save(&self, records: &[TitleRecord]) -> io::Result<()> {
        let data = serde_json::to_string_pretty(records).map_err(io::Error::other)?;
        fs::write(&self.path, data)
    }
}

impl TitleRegistry for JsonTitleRegistry {
    fn push(&mut self, base_title_id: u64, key: &MetaKey, storage_id: u8) -> io::Result<()> {
        let mut records = self.records()?;
        records.retain(|r| !(r.base_title_id == base_title_id && r.title_id == key.id));
        records.push(TitleRecord {
            base_title_id,
            title_id: key.id,
            version: key.version,
            meta_type: key.ty.raw(),
            storage_id,
            event: EVENT_INSTALLED,
        });
        self.save(&records)?;
        debug!(base_title_id, title_id = key.id, "title record pushed");
        Ok(())
    }
}
