//! Protocol client: LIST, ranged GET_FILE, and EXIT exchanges.

use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::frame::{Command, FrameHeader, FrameType, HEADER_LEN};
use crate::transport::Transport;
use crate::{Error, Result};

/// Transfer segment granularity (1 MiB). Range reads never ask for more
/// than one segment per exchange.
pub const SEGMENT_SIZE: usize = 0x10_0000;

/// Attempts made to transmit one frame header.
const SEND_ATTEMPTS: u32 = 3;

/// Pause between header send attempts.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One record from a remote directory listing.
///
/// `size` is 0 when the host sent a legacy record without a size field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Remote file name.
    pub name: String,
    /// Remote file size in bytes, if the host reported one.
    pub size: u64,
}

/// A protocol client over a [`Transport`].
///
/// The client borrows the link when constructed with `&mut transport`
/// (see the blanket `Transport` impl for `&mut T`); it never manages the
/// link's lifetime.
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
}

impl<T: Transport> Client<T> {
    /// Wraps a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Enumerates the host's exported files.
    pub fn list(&mut self) -> Result<Vec<RemoteEntry>> {
        self.send_header(FrameType::Request, Command::List, 0)?;

        let reply = self.recv_header()?;
        let len = reply.expect(FrameType::Response, Command::List)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        self.send_header(FrameType::Ack, Command::List, len)?;
        let mut payload = vec![0u8; len as usize];
        self.recv_exact(&mut payload)?;

        let entries = parse_listing(&String::from_utf8_lossy(&payload))?;
        debug!(count = entries.len(), "remote listing received");
        Ok(entries)
    }

    /// Reads a byte range of the named remote file into `buf`.
    ///
    /// Returns how many bytes the host actually had at `offset` — possibly
    /// fewer than requested, and 0 once past end-of-data. Neither case is
    /// an error.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_range(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = u32::try_from(buf.len().min(SEGMENT_SIZE)).unwrap_or(u32::MAX);

        let mut body = Vec::with_capacity(16 + name.len());
        body.extend_from_slice(&want.to_le_bytes());
        body.extend_from_slice(&offset.to_le_bytes());
        body.extend_from_slice(&(name.len() as u32).to_le_bytes());
        body.extend_from_slice(name.as_bytes());

        self.send_header(FrameType::Request, Command::GetFile, body.len() as u32)?;
        self.recv_header()?.expect(FrameType::Ack, Command::GetFile)?;
        self.send_all(&body)?;

        let reply = self.recv_header()?;
        let avail = reply.expect(FrameType::Response, Command::GetFile)?;
        if avail > want {
            return Err(Error::LengthMismatch {
                requested: want,
                got: avail,
            });
        }

        // The response ACK goes out even for an empty (end-of-data) reply.
        self.send_header(FrameType::Ack, Command::GetFile, 0)?;
        if avail == 0 {
            trace!(name, offset, "end of remote data");
            return Ok(0);
        }

        self.recv_exact(&mut buf[..avail as usize])?;
        Ok(avail as usize)
    }

    /// Tells the host process to shut down. Fire-and-forget.
    pub fn exit(&mut self) -> Result<()> {
        self.send_header(FrameType::Request, Command::Exit, 0)
    }

    /// Transmits one header, retrying whole-header on short sends.
    fn send_header(&mut self, ty: FrameType, command: Command, length: u32) -> Result<()> {
        let frame = FrameHeader::new(ty, command, length).encode();
        for attempt in 1..=SEND_ATTEMPTS {
            if self.transport.send(&frame)? == HEADER_LEN {
                return Ok(());
            }
            trace!(?command, attempt, "short header send");
            if attempt < SEND_ATTEMPTS {
                thread::sleep(SEND_RETRY_DELAY);
            }
        }
        Err(Error::SendExhausted {
            attempts: SEND_ATTEMPTS,
        })
    }

    /// Writes an entire payload, accumulating over partial sends.
    fn send_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.transport.send(buf)?;
            if n == 0 {
                return Err(Error::ConnectionLost);
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Fills `buf` completely; a zero-byte read before that is fatal.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.transport.recv(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::ConnectionLost);
            }
            filled += n;
        }
        Ok(())
    }

    /// Receives and decodes one frame header.
    fn recv_header(&mut self) -> Result<FrameHeader> {
        let mut buf = [0u8; HEADER_LEN];
        self.recv_exact(&mut buf)?;
        FrameHeader::decode(&buf)
    }
}

/// Parses a listing payload: `name|size` records separated by `\n`.
///
/// The final record need not be newline-terminated; a record without a
/// `|size` field is a legacy entry of unknown size.
fn parse_listing(text: &str) -> Result<Vec<RemoteEntry>> {
    let mut entries = Vec::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        let entry = match line.split_once('|') {
            Some((name, size)) => RemoteEntry {
                name: name.to_owned(),
                size: size
                    .trim()
                    .parse()
                    .map_err(|_| Error::BadListRecord(line.to_owned()))?,
            },
            None => RemoteEntry {
                name: line.to_owned(),
                size: 0,
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{LEGACY_MAGIC, MAGIC};
    use std::io::{Cursor, Read};

    /// In-memory link: replies are pre-scripted, sends are recorded.
    struct ScriptedLink {
        inbound: Cursor<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl ScriptedLink {
        fn new(inbound: Vec<u8>) -> Self {
            Self {
                inbound: Cursor::new(inbound),
                outbound: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedLink {
        fn send(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbound.read(buf)
        }
    }

    fn header_bytes(ty: FrameType, command: Command, length: u32) -> Vec<u8> {
        FrameHeader::new(ty, command, length).encode().to_vec()
    }

    #[test]
    fn list_parses_piped_records_without_trailing_newline() {
        let body = b"a.nsp|100\nb.nsp|200";
        let mut inbound = header_bytes(FrameType::Response, Command::List, body.len() as u32);
        inbound.extend_from_slice(body);

        let mut client = Client::new(ScriptedLink::new(inbound));
        let entries = client.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], RemoteEntry { name: "a.nsp".into(), size: 100 });
        assert_eq!(entries[1], RemoteEntry { name: "b.nsp".into(), size: 200 });
    }

    #[test]
    fn list_record_without_size_defaults_to_zero() {
        let body = b"a.nsp\n";
        let mut inbound = header_bytes(FrameType::Response, Command::List, body.len() as u32);
        inbound.extend_from_slice(body);

        let mut client = Client::new(ScriptedLink::new(inbound));
        let entries = client.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], RemoteEntry { name: "a.nsp".into(), size: 0 });
    }

    #[test]
    fn list_rejects_garbage_size() {
        let body = b"a.nsp|xyz";
        let mut inbound = header_bytes(FrameType::Response, Command::List, body.len() as u32);
        inbound.extend_from_slice(body);

        let mut client = Client::new(ScriptedLink::new(inbound));
        assert!(matches!(client.list(), Err(Error::BadListRecord(_))));
    }

    #[test]
    fn read_range_runs_the_full_exchange() {
        let data = b"payload!";
        let mut inbound = header_bytes(FrameType::Ack, Command::GetFile, 0);
        inbound.extend_from_slice(&header_bytes(
            FrameType::Response,
            Command::GetFile,
            data.len() as u32,
        ));
        inbound.extend_from_slice(data);

        let mut link = ScriptedLink::new(inbound);
        let mut buf = [0u8; 64];
        let n = Client::new(&mut link).read_range("game.nsp", 32, &mut buf).unwrap();
        assert_eq!(&buf[..n], data);

        // Request header + body + response ACK, in order.
        let sent = &link.outbound;
        assert_eq!(&sent[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&sent[8..12], &(Command::GetFile as u32).to_le_bytes());
        let body = &sent[HEADER_LEN..sent.len() - HEADER_LEN];
        assert_eq!(&body[0..4], &(buf.len() as u32).to_le_bytes());
        assert_eq!(&body[4..12], &32u64.to_le_bytes());
        assert_eq!(&body[16..], b"game.nsp");
    }

    #[test]
    fn read_range_past_end_returns_zero() {
        let mut inbound = header_bytes(FrameType::Ack, Command::GetFile, 0);
        inbound.extend_from_slice(&header_bytes(FrameType::Response, Command::GetFile, 0));

        let mut buf = [0u8; 16];
        let n = Client::new(ScriptedLink::new(inbound))
            .read_range("game.nsp", 1 << 40, &mut buf)
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn legacy_magic_is_accepted_in_replies() {
        let body = b"x.nsp|1";
        let mut reply = FrameHeader::new(FrameType::Response, Command::List, body.len() as u32);
        reply.magic = LEGACY_MAGIC;
        let mut inbound = reply.encode().to_vec();
        inbound.extend_from_slice(body);

        let entries = Client::new(ScriptedLink::new(inbound)).list().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn disconnect_mid_header_is_connection_lost() {
        let mut client = Client::new(ScriptedLink::new(Vec::new()));
        assert!(matches!(client.list(), Err(Error::ConnectionLost)));
    }

    /// Link whose sends always transfer half the buffer.
    struct ShortLink {
        attempts: u32,
    }

    impl Transport for ShortLink {
        fn send(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.attempts += 1;
            Ok(buf.len() / 2)
        }

        fn recv(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn short_header_sends_exhaust_the_retry_budget() {
        let mut link = ShortLink { attempts: 0 };
        let err = Client::new(&mut link).exit().unwrap_err();
        assert!(matches!(err, Error::SendExhausted { attempts: 3 }));
        assert_eq!(link.attempts, 3);
    }
}
