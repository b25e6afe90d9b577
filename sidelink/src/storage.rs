//! Content storage: placeholder lifecycle and registered content.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sidelink_pkg::ContentId;
use tracing::debug;

/// The destination store content items are installed into.
///
/// A placeholder is a provisional entry being written; registering turns it
/// into permanent content. `register` reports an existing item via
/// [`io::ErrorKind::AlreadyExists`] so callers can discard the placeholder
/// instead of failing.
pub trait ContentStorage {
    /// Creates a placeholder preallocated to `size` bytes.
    fn create_placeholder(&mut self, id: &ContentId, size: u64) -> io::Result<()>;

    /// Writes a chunk into a placeholder at `offset`.
    fn write_placeholder(&mut self, id: &ContentId, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Removes a placeholder. Absent placeholders are not an error.
    fn delete_placeholder(&mut self, id: &ContentId) -> io::Result<()>;

    /// Promotes a fully written placeholder to permanent content.
    fn register(&mut self, id: &ContentId) -> io::Result<()>;

    /// Resolves registered content to a local path.
    fn resolve(&self, id: &ContentId) -> io::Result<PathBuf>;

    /// Returns `true` if the content item is already registered.
    fn has(&self, id: &ContentId) -> bool;
}

const PLACEHOLDER_DIR: &str = "placeholders";
const CONTENTS_DIR: &str = "contents";

/// Directory-backed [`ContentStorage`].
///
/// Layout under the root: `placeholders/<id>` for in-flight writes,
/// `contents/<id>.nca` for registered items.
#[derive(Debug)]
pub struct FsContentStorage {
    root: PathBuf,
}

impl FsContentStorage {
    /// Opens (or creates) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(PLACEHOLDER_DIR))?;
        fs::create_dir_all(root.join(CONTENTS_DIR))?;
        Ok(Self { root })
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn placeholder_path(&self, id: &ContentId) -> PathBuf {
        self.root.join(PLACEHOLDER_DIR).join(id.to_string())
    }

    fn content_path(&self, id: &ContentId) -> PathBuf {
        self.root.join(CONTENTS_DIR).join(format!("{id}.nca"))
    }
}

impl ContentStorage for FsContentStorage {
    fn create_placeholder(&mut self, id: &ContentId, size: u64) -> io::Result<()> {
        let file = File::create(self.placeholder_path(id))?;
        file.set_len(size)?;
        debug!(%id, size, "placeholder created");
        Ok(())
    }

    fn write_placeholder(&mut self, id: &ContentId, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.placeholder_path(id))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    fn delete_placeholder(&mut self, id: &ContentId) -> io::Result<()> {
        match fs::remove_file(self.placeholder_path(id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn register(&mut self, id: &ContentId) -> io::Result<()> {
        let target = self.content_path(id);
        if target.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("content {id} already registered"),
            ));
        }
        fs::rename(self.placeholder_path(id), target)?;
        debug!(%id, "content registered");
        Ok(())
    }

    fn resolve(&self, id: &ContentId) -> io::Result<PathBuf> {
        let path = self.content_path(id);
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("content {id} not registered"),
            ));
        }
        Ok(path)
    }

    fn has(&self, id: &ContentId) -> bool {
        self.content_path(id).exists()
    }
}
