//! Destination bundle: the concrete services one install target needs.

use std::path::{Path, PathBuf};

use crate::database::SqliteMetaDb;
use crate::registry::JsonTitleRegistry;
use crate::storage::FsContentStorage;
use crate::ticket::DirTicketStore;
use crate::Result;

const DEFAULT_DIR: &str = "sidelink";
const DB_FILE: &str = "content_meta.db";
const REGISTRY_FILE: &str = "titles.json";
const TICKET_DIR: &str = "tickets";

/// A fully opened install destination.
///
/// Opening acquires every service handle an install needs; any failure here
/// aborts before a single remote byte is streamed.
#[derive(Debug)]
pub struct Destination {
    /// Content storage for placeholders and registered items.
    pub storage: FsContentStorage,
    /// Content-meta database.
    pub db: SqliteMetaDb,
    /// Installed-titles registry.
    pub registry: JsonTitleRegistry,
    /// Rights-ticket drop store.
    pub tickets: DirTicketStore,
}

impl Destination {
    /// Opens a destination rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        Ok(Self {
            storage: FsContentStorage::open(root)?,
            db: SqliteMetaDb::open(root.join(DB_FILE))?,
            registry: JsonTitleRegistry::open(root.join(REGISTRY_FILE)),
            tickets: DirTicketStore::open(root.join(TICKET_DIR))?,
        })
    }

    /// Opens the default destination: `$SIDELINK_HOME`, or `sidelink/`
    /// under the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(default_root()?)
    }
}

/// Resolves the default destination root.
fn default_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("SIDELINK_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join(DEFAULT_DIR))
        .ok_or_else(|| {
            crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "cannot determine platform data directory",
            ))
        })
}
