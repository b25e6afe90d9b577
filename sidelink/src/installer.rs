//! Streaming installer: discovery, tickets, chunked content streaming,
//! metadata registration.
//!
//! One `install` call is one session. The machine runs strictly forward —
//! parse container, read content metadata, import tickets, stream contents,
//! commit — and never backtracks. Ticket import, title-registry pushes,
//! metadata submission, and the final commit are best-effort; everything
//! else aborts the session, and placeholders are cleaned up on every abort
//! path.

use std::fs;
use std::io;

use sidelink_pkg::{
    base_title_id, ContentId, ContentRecord, ContentType, Entry, InstallMeta, MetaKey, Partition,
    RangeRead,
};
use sidelink_proto::{Transport, SEGMENT_SIZE};
use tracing::{debug, info, warn};

use crate::database::MetaDb;
use crate::registry::TitleRegistry;
use crate::remote::RemoteFile;
use crate::storage::ContentStorage;
use crate::ticket::TicketImporter;
use crate::{Error, Result};

/// Streaming chunk size (one wire segment).
pub const CHUNK_SIZE: usize = SEGMENT_SIZE;

/// Suffix of entries carrying an install-metadata blob.
const META_SUFFIX: &str = ".cnmt.nca";

/// Suffix of content entries.
const CONTENT_SUFFIX: &str = ".nca";

const TICKET_SUFFIX: &str = ".tik";
const CERT_SUFFIX: &str = ".cert";

/// Verdict returned by the progress callback after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep streaming.
    Continue,
    /// Abort the install. Takes effect at the current chunk boundary.
    Cancel,
}

/// Where a metadata blob's content list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaSource {
    /// The blob parsed structurally; records carry their declared types.
    Parsed,
    /// Degraded: the blob was unreadable, so every other content entry in
    /// the container was queued as untyped data. Lossy by design.
    Scanned,
}

/// Outcome for one metadata entry found in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct MetaOutcome {
    /// Content id of the metadata entry itself.
    pub id: ContentId,
    /// Database key, when the blob parsed.
    pub key: Option<MetaKey>,
    /// Which discovery path produced the content list.
    pub source: MetaSource,
    /// Whether the rebuilt blob reached the content-meta database.
    pub submitted: bool,
    /// Whether the title record reached the registry.
    pub registered: bool,
}

/// Result of a completed install.
#[derive(Debug)]
#[non_exhaustive]
pub struct InstallReport {
    /// Bytes streamed into storage, metadata entries included.
    pub installed_bytes: u64,
    /// Sum of declared non-meta content sizes. Metadata-entry bytes advance
    /// `installed_bytes` but are not part of this total, so the two
    /// counters are offset by the metadata sizes once an install completes.
    pub total_bytes: u64,
    /// Content items streamed and registered by this session.
    pub contents_installed: usize,
    /// Ticket/certificate pairs imported.
    pub tickets_imported: usize,
    /// Per-metadata-entry outcomes, in container order.
    pub metas: Vec<MetaOutcome>,
}

/// Per-session bookkeeping.
#[derive(Default)]
struct Session {
    contents: Vec<ContentRecord>,
    installed: u64,
    total: u64,
}

impl Session {
    /// Queues a record unless one with the same content id is present.
    fn add(&mut self, record: ContentRecord) -> bool {
        if self.contents.iter().any(|c| c.id == record.id) {
            return false;
        }
        self.total += record.size;
        self.contents.push(record);
        true
    }
}

/// The streaming installer.
///
/// Borrows its service seams for the session's duration; one installer
/// drives one install at a time by construction.
pub struct Installer<'a> {
    storage: &'a mut dyn ContentStorage,
    db: &'a mut dyn MetaDb,
    registry: &'a mut dyn TitleRegistry,
    tickets: Option<&'a mut dyn TicketImporter>,
    storage_id: u8,
    ignore_required_version: bool,
}

impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("storage_id", &self.storage_id)
            .field("ignore_required_version", &self.ignore_required_version)
            .finish_non_exhaustive()
    }
}

impl<'a> Installer<'a> {
    /// Creates an installer over the destination services.
    pub fn new(
        storage: &'a mut dyn ContentStorage,
        db: &'a mut dyn MetaDb,
        registry: &'a mut dyn TitleRegistry,
    ) -> Self {
        Self {
            storage,
            db,
            registry,
            tickets: None,
            storage_id: 0,
            ignore_required_version: true,
        }
    }

    /// Wires up a rights-ticket importer. Without one, ticket installation
    /// is skipped with a warning.
    pub fn with_tickets(mut self, tickets: &'a mut dyn TicketImporter) -> Self {
        self.tickets = Some(tickets);
        self
    }

    /// Storage id recorded in pushed title records.
    pub fn with_storage_id(mut self, storage_id: u8) -> Self {
        self.storage_id = storage_id;
        self
    }

    /// Whether to zero the required-firmware field when rebuilding
    /// application and patch metadata. Defaults to `true`.
    pub fn ignore_required_version(mut self, ignore: bool) -> Self {
        self.ignore_required_version = ignore;
        self
    }

    /// Installs the named remote package, streaming it over `transport`.
    ///
    /// `size` is the package size from the directory listing (0 when the
    /// host did not report one). `progress` runs after every chunk with
    /// `(installed_bytes, total_bytes)`; metadata-entry bytes advance the
    /// installed counter even though they are excluded from the total.
    /// Returning [`Control::Cancel`] aborts at that chunk boundary.
    pub fn install<T: Transport>(
        &mut self,
        transport: T,
        name: &str,
        size: u64,
        progress: impl FnMut(u64, u64) -> Control,
    ) -> Result<InstallReport> {
        self.install_from(RemoteFile::new(transport, name), name, size, progress)
    }

    /// Installs from any random-access source — the transport-free core of
    /// [`Installer::install`].
    pub fn install_from<R: RangeRead>(
        &mut self,
        reader: R,
        name: &str,
        size: u64,
        mut progress: impl FnMut(u64, u64) -> Control,
    ) -> Result<InstallReport> {
        info!(name, size, "starting install");
        let mut part = Partition::open(reader, size)?;
        let mut session = Session::default();
        let on_chunk: &mut dyn FnMut(u64, u64) -> Control = &mut progress;

        let metas = self.read_content_meta(&mut part, &mut session, on_chunk)?;
        let tickets_imported = self.install_tickets(&mut part);
        let contents_installed = self.install_contents(&mut part, &mut session, on_chunk)?;

        // Staged records were committed per metadata blob already; this
        // final commit persists anything still pending.
        if let Err(e) = self.db.commit() {
            warn!(error = %e, "final database commit failed");
        }

        info!(
            name,
            installed = session.installed,
            contents = contents_installed,
            "install complete"
        );
        Ok(InstallReport {
            installed_bytes: session.installed,
            total_bytes: session.total,
            contents_installed,
            tickets_imported,
            metas,
        })
    }

    /// Locates every metadata entry, installs it, and builds the content
    /// list — from the parsed blob when possible, from a container scan
    /// otherwise.
    fn read_content_meta<R: RangeRead>(
        &mut self,
        part: &mut Partition<R>,
        session: &mut Session,
        progress: &mut dyn FnMut(u64, u64) -> Control,
    ) -> Result<Vec<MetaOutcome>> {
        let meta_entries = part.entries_with_suffix(META_SUFFIX);
        if meta_entries.is_empty() {
            return Err(Error::NoInstallMeta);
        }

        let mut outcomes = Vec::new();
        for entry in &meta_entries {
            let Some(id) = ContentId::from_entry_name(&entry.name) else {
                warn!(name = %entry.name, "metadata entry name carries no content id");
                continue;
            };

            // The blob must be in storage before it can be read back.
            self.stream_item(part, entry, &id, entry.size, session, progress)?;

            match self.load_meta(&id) {
                Ok(meta) => {
                    for record in meta.records() {
                        session.add(*record);
                    }
                    let meta_record = ContentRecord {
                        id,
                        size: entry.size,
                        ty: ContentType::Meta,
                        attr: 0,
                        id_offset: 0,
                    };
                    let key = meta.key();
                    let blob = meta.build_install_blob(&meta_record, self.ignore_required_version);

                    let submitted = self
                        .db
                        .set(&key, &blob)
                        .and_then(|()| self.db.commit())
                        .map_err(|e| warn!(error = %e, "content-meta submission failed"))
                        .is_ok();

                    let base = base_title_id(key.id, key.ty);
                    let registered = self
                        .registry
                        .push(base, &key, self.storage_id)
                        .map_err(
                            |e| warn!(error = %e, "title record push failed; a reboot may be needed"),
                        )
                        .is_ok();

                    debug!(title_id = key.id, version = key.version, "metadata processed");
                    outcomes.push(MetaOutcome {
                        id,
                        key: Some(key),
                        source: MetaSource::Parsed,
                        submitted,
                        registered,
                    });
                }
                Err(e) => {
                    warn!(
                        name = %entry.name,
                        error = %e,
                        "metadata unreadable; falling back to container scan"
                    );
                    outcomes.push(MetaOutcome {
                        id,
                        key: None,
                        source: MetaSource::Scanned,
                        submitted: false,
                        registered: false,
                    });
                }
            }
        }

        // Content entries no metadata blob declared install as untyped data.
        for entry in part.entries_with_suffix(CONTENT_SUFFIX) {
            if entry.name.to_ascii_lowercase().ends_with(META_SUFFIX) {
                continue;
            }
            let Some(id) = ContentId::from_entry_name(&entry.name) else {
                warn!(name = %entry.name, "content entry name carries no content id");
                continue;
            };
            let record = ContentRecord {
                id,
                size: entry.size,
                ty: ContentType::Data,
                attr: 0,
                id_offset: 0,
            };
            if session.add(record) {
                debug!(%id, "undeclared content entry queued as data");
            }
        }

        Ok(outcomes)
    }

    /// Reads back and parses a freshly installed metadata blob.
    fn load_meta(&self, id: &ContentId) -> Result<InstallMeta> {
        let path = self.storage.resolve(id).map_err(Error::Storage)?;
        let data = fs::read(path)?;
        Ok(InstallMeta::parse(&data)?)
    }

    /// Best-effort ticket/certificate import. Never aborts the install.
    fn install_tickets<R: RangeRead>(&mut self, part: &mut Partition<R>) -> usize {
        let tickets = part.entries_with_suffix(TICKET_SUFFIX);
        if tickets.is_empty() {
            // Unprotected content.
            debug!("no tickets in container");
            return 0;
        }
        let certs = part.entries_with_suffix(CERT_SUFFIX);
        if tickets.len() != certs.len() {
            warn!(
                tickets = tickets.len(),
                certs = certs.len(),
                "ticket/certificate count mismatch; skipping import"
            );
            return 0;
        }
        let Some(importer) = self.tickets.as_mut() else {
            warn!("rights subsystem unavailable; skipping ticket import");
            return 0;
        };

        let mut imported = 0;
        for (tik, cert) in tickets.iter().zip(&certs) {
            match (part.read_entry(tik), part.read_entry(cert)) {
                (Ok(tik_data), Ok(cert_data)) => {
                    match importer.import(&tik.name, &tik_data, &cert_data) {
                        Ok(()) => imported += 1,
                        Err(e) => warn!(name = %tik.name, error = %e, "ticket import failed"),
                    }
                }
                _ => warn!(name = %tik.name, "could not read ticket pair"),
            }
        }
        imported
    }

    /// Streams every queued content record that is not already installed.
    fn install_contents<R: RangeRead>(
        &mut self,
        part: &mut Partition<R>,
        session: &mut Session,
        progress: &mut dyn FnMut(u64, u64) -> Control,
    ) -> Result<usize> {
        let pending = session.contents.clone();
        let mut installed = 0;
        for record in &pending {
            if self.storage.has(&record.id) {
                debug!(id = %record.id, "content already installed; skipping");
                continue;
            }
            let hex = record.id.to_string();
            let Some(entry) = part.entry_containing(&hex) else {
                return Err(Error::ContentMissing(record.id));
            };
            self.stream_item(part, &entry, &record.id, record.size, session, progress)?;
            installed += 1;
        }
        Ok(installed)
    }

    /// Streams one container entry into a storage placeholder and registers
    /// it. The placeholder is removed on every failure path, including
    /// cancellation and an already-registered outcome.
    #[allow(clippy::cast_possible_truncation)]
    fn stream_item<R: RangeRead>(
        &mut self,
        part: &mut Partition<R>,
        entry: &Entry,
        id: &ContentId,
        size: u64,
        session: &mut Session,
        progress: &mut dyn FnMut(u64, u64) -> Control,
    ) -> Result<()> {
        debug!(%id, name = %entry.name, size, "streaming item");

        // A stale placeholder from an interrupted session would collide.
        self.storage.delete_placeholder(id).ok();
        self.storage
            .create_placeholder(id, size)
            .map_err(Error::Storage)?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut offset = 0u64;
        while offset < size {
            let chunk = (size - offset).min(CHUNK_SIZE as u64) as usize;
            if let Err(e) = part.read_at(entry, offset, &mut buf[..chunk]) {
                self.storage.delete_placeholder(id).ok();
                return Err(e.into());
            }
            if let Err(e) = self.storage.write_placeholder(id, offset, &buf[..chunk]) {
                self.storage.delete_placeholder(id).ok();
                return Err(Error::Storage(e));
            }
            offset += chunk as u64;
            session.installed += chunk as u64;

            if progress(session.installed, session.total) == Control::Cancel {
                self.storage.delete_placeholder(id).ok();
                info!(%id, "install cancelled by caller");
                return Err(Error::Cancelled);
            }
        }

        match self.storage.register(id) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(%id, "content already registered; dropping placeholder");
                self.storage.delete_placeholder(id).ok();
                Ok(())
            }
            Err(e) => {
                self.storage.delete_placeholder(id).ok();
                Err(Error::Storage(e))
            }
        }
    }
}
