//! Remote random-access reader: bridges the wire protocol client into the
//! container parser's [`RangeRead`] seam.

use std::io;

use sidelink_pkg::RangeRead;
use sidelink_proto::{Client, Transport};

/// A named remote file readable at arbitrary offsets.
///
/// Each read issues one or more GET_FILE exchanges; responses may come back
/// shorter than a segment, so reads accumulate until the buffer is full.
/// End-of-data before the buffer fills is an error here — the container
/// parser only ever asks for bytes the file tables declare to exist.
#[derive(Debug)]
pub struct RemoteFile<T> {
    client: Client<T>,
    name: String,
}

impl<T: Transport> RemoteFile<T> {
    /// Adapts a transport into a reader of one named remote file.
    pub fn new(transport: T, name: impl Into<String>) -> Self {
        Self {
            client: Client::new(transport),
            name: name.into(),
        }
    }

    /// The remote file name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Transport> RangeRead for RemoteFile<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .client
                .read_range(&self.name, offset + filled as u64, &mut buf[filled..])
                .map_err(io::Error::other)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("remote file {:?} ended early", self.name),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}
