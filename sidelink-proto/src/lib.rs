//! Framed wire protocol for sidelink host-device transfers.
//!
//! The host exports a flat directory of packages; the device enumerates it
//! with [`Client::list`] and pulls arbitrary byte ranges with
//! [`Client::read_range`]. Every exchange is a fixed 16-byte header
//! (little-endian) followed by an acknowledged payload — see [`frame`] for
//! the layout.
//!
//! All I/O is synchronous and blocking. The [`Transport`] seam is a plain
//! byte link; `TcpTransport` implements it over a `TcpStream`, and tests
//! drive the client against scripted in-memory links.

mod client;
mod frame;
mod transport;

pub use client::{Client, RemoteEntry, SEGMENT_SIZE};
pub use frame::{Command, FrameHeader, FrameType, HEADER_LEN, LEGACY_MAGIC, MAGIC};
pub use transport::{TcpTransport, Transport};

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from wire protocol exchanges.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A frame header could not be fully transmitted within the retry budget.
    #[error("frame send failed after {attempts} attempts")]
    SendExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The peer disconnected mid-read (a zero-byte transport read).
    #[error("connection lost")]
    ConnectionLost,

    /// A received header carried an unrecognized magic value.
    #[error("bad frame magic {0:#010x}")]
    Magic(u32),

    /// A reply carried an unexpected frame type.
    #[error("expected {expected:?} frame, got type {found}")]
    UnexpectedType {
        /// The frame type this exchange step requires.
        expected: FrameType,
        /// Raw type value received.
        found: u32,
    },

    /// A reply carried an unexpected command.
    #[error("expected {expected:?} reply, got command {found}")]
    UnexpectedCommand {
        /// The command this exchange belongs to.
        expected: Command,
        /// Raw command value received.
        found: u32,
    },

    /// A response declared more payload than the request asked for.
    #[error("response length {got} exceeds requested {requested}")]
    LengthMismatch {
        /// Bytes requested.
        requested: u32,
        /// Bytes the response declared.
        got: u32,
    },

    /// A directory listing record could not be parsed.
    #[error("malformed list record: {0:?}")]
    BadListRecord(String),

    /// An I/O error from the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
