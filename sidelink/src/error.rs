//! Error types for install operations.

use sidelink_pkg::ContentId;

/// Alias for `Result<T, sidelink::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort an install.
///
/// Ticket import, title-registry pushes, metadata-blob database submission,
/// and the final database commit are best-effort: their failures are logged
/// and surfaced through [`crate::InstallReport`], never through this enum.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A wire protocol exchange failed.
    #[error(transparent)]
    Proto(#[from] sidelink_proto::Error),

    /// The container or a metadata blob was malformed.
    #[error(transparent)]
    Format(#[from] sidelink_pkg::Error),

    /// The container holds no install-metadata entry.
    #[error("no install metadata entry in container")]
    NoInstallMeta,

    /// A declared content item has no carrying entry in the container.
    #[error("content {0} not present in container")]
    ContentMissing(ContentId),

    /// A content-storage operation failed.
    #[error("content storage: {0}")]
    Storage(#[source] std::io::Error),

    /// The content-meta database failed on open.
    #[error("content-meta database: {0}")]
    Db(#[from] rusqlite::Error),

    /// The caller's progress callback asked to stop.
    #[error("installation cancelled")]
    Cancelled,

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
