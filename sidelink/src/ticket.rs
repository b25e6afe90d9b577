//! Rights-ticket import. Best-effort by design: systems that bypass
//! signature checks run fine without any of this.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

/// Imports ticket/certificate pairs into the rights subsystem.
///
/// The installer treats the importer as optional; when none is wired up,
/// ticket installation is skipped with a warning and the install proceeds.
pub trait TicketImporter {
    /// Imports one ticket and its certificate chain.
    fn import(&mut self, name: &str, ticket: &[u8], cert: &[u8]) -> io::Result<()>;
}

/// Directory-backed [`TicketImporter`]: drops pairs as `<name>.tik` /
/// `<name>.cert` for the platform to pick up.
#[derive(Debug)]
pub struct DirTicketStore {
    root: PathBuf,
}

impl DirTicketStore {
    /// Opens (or creates) the ticket drop directory.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl TicketImporter for DirTicketStore {
    fn import(&mut self, name: &str, ticket: &[u8], cert: &[u8]) -> io::Result<()> {
        let stem = name.strip_suffix(".tik").unwrap_or(name);
        fs::write(self.root.join(format!("{stem}.tik")), ticket)?;
        fs::write(self.root.join(format!("{stem}.cert")), cert)?;
        debug!(name = stem, "ticket imported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_writes_both_halves() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirTicketStore::open(dir.path().join("tickets")).unwrap();
        store.import("abc.tik", b"ticket", b"cert").unwrap();

        let root = dir.path().join("tickets");
        assert_eq!(fs::read(root.join("abc.tik")).unwrap(), b"ticket");
        assert_eq!(fs::read(root.join("abc.cert")).unwrap(), b"cert");
    }
}
