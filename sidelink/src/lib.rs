//! Streaming package installer over a point-to-point host link.
//!
//! `sidelink` installs a packaged title onto a device content store without
//! ever materializing the package locally: the container's file table is
//! parsed through ranged reads against the host, and each content item is
//! streamed chunk by chunk straight into a storage placeholder.
//!
//! # Quick start
//!
//! ```no_run
//! use sidelink::{Control, Destination, Installer};
//! use sidelink_proto::TcpTransport;
//!
//! let mut dest = Destination::open_default().expect("destination");
//! let mut transport = TcpTransport::connect("192.168.1.10:2000").expect("host");
//!
//! let mut installer = Installer::new(&mut dest.storage, &mut dest.db, &mut dest.registry)
//!     .with_tickets(&mut dest.tickets);
//! let report = installer
//!     .install(&mut transport, "game.nsp", 8 << 30, |done, total| {
//!         eprintln!("{done}/{total}");
//!         Control::Continue
//!     })
//!     .expect("install failed");
//! eprintln!("installed {} content items", report.contents_installed);
//! ```

mod database;
mod dest;
mod error;
mod installer;
mod registry;
mod remote;
mod storage;
mod ticket;

pub use database::{MetaDb, SqliteMetaDb};
pub use dest::Destination;
pub use error::{Error, Result};
pub use installer::{Control, InstallReport, Installer, MetaOutcome, MetaSource, CHUNK_SIZE};
pub use registry::{JsonTitleRegistry, TitleRecord, TitleRegistry};
pub use remote::RemoteFile;
pub use storage::{ContentStorage, FsContentStorage};
pub use ticket::{DirTicketStore, TicketImporter};
