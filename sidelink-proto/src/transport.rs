//! Blocking byte-link seam and its TCP implementation.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// A byte-oriented, blocking, bidirectional link.
///
/// Both methods return the number of bytes actually transferred in one
/// operation; callers own any accumulate/retry logic. A `recv` that returns
/// 0 means the peer disconnected.
pub trait Transport {
    /// Writes up to `buf.len()` bytes, returning how many were taken.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reads up to `buf.len()` bytes, returning how many arrived.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }
}

/// A [`Transport`] over a blocking TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connects to a host endpoint.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Wraps an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
