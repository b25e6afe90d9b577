//! Package container and install-metadata formats.
//!
//! Two binary formats, both little-endian:
//!
//! - the partition container ([`Partition`]): a flat file table over a data
//!   region, parsed lazily through a [`RangeRead`] so nothing but the tables
//!   is ever materialized;
//! - the install-metadata blob ([`InstallMeta`]): the record of which
//!   content items make up a title at a version, parsed from a byte buffer
//!   and rebuilt into the form the content-meta database expects.

mod content;
mod meta;
mod partition;

pub use content::{ContentId, ContentType, MetaKey, MetaType, base_title_id};
pub use meta::{CONTENT_RECORD_LEN, ContentRecord, InstallMeta, MetaHeader};
pub use partition::{Entry, Partition, RangeRead};

/// Result type for format operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from container or metadata parsing.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The container header carried an unrecognized magic value.
    #[error("bad container magic {0:#010x}")]
    ContainerMagic(u32),

    /// The container's tables ended before their declared sizes.
    #[error("container truncated while reading {0}")]
    ContainerTruncated(&'static str),

    /// An entry name offset fell outside the string table, or the name was
    /// not NUL-terminated.
    #[error("container entry {0} has an unresolvable name")]
    BadEntryName(u32),

    /// An entry's data range extends past the container's data region.
    #[error("entry {name:?} exceeds the data region")]
    EntryOutOfBounds {
        /// Offending entry name.
        name: String,
    },

    /// A read was issued past the end of an entry.
    #[error("read past the end of entry {name:?}")]
    ReadOutOfBounds {
        /// Offending entry name.
        name: String,
    },

    /// The metadata blob ended before a declared structure.
    #[error("install metadata truncated at {0}")]
    MetaTruncated(&'static str),

    /// An I/O error from the underlying reader.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
