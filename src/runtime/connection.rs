//! Per-client connection state: non-blocking socket buffering and framing.
//!
//! The inbox is touched only by the reactor thread (no lock contention
//! there in practice, but it lives behind the same mutex as the socket
//! itself so registering/deregistering with the poll set and reading are
//! always consistent). The outbox is mutex-protected because both the
//! reactor (draining it on a writable event) and workers (appending a
//! response) touch it.

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Request lines longer than this (including everything already buffered)
/// overflow the inbox and are rejected.
pub const MAX_INBOX_SIZE: usize = 2 * 1024 * 1024;

const READ_SCRATCH: usize = 4096;

/// A single request line exceeded [`MAX_INBOX_SIZE`]; the inbox was reset.
#[derive(Debug)]
pub struct BufferOverflowError;

impl fmt::Display for BufferOverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value too large")
    }
}

impl std::error::Error for BufferOverflowError {}

/// A non-recoverable per-connection I/O failure.
#[derive(Debug)]
pub struct ConnectionError(pub io::Error);

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection I/O error: {}", self.0)
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError(e)
    }
}

/// Either of the two ways a read or write against a connection can fail.
#[derive(Debug)]
pub enum ConnError {
    Overflow(BufferOverflowError),
    Io(ConnectionError),
}

impl fmt::Display for ConnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnError::Overflow(e) => write!(f, "{e}"),
            ConnError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnError {}

/// The fields touched only by the reactor thread: the socket and the inbox.
struct ConnIo {
    stream: TcpStream,
    inbox: Vec<u8>,
}

/// A single client connection.
///
/// Held by the reactor via `Arc<Connection>` in its connection slab; tasks
/// dispatched to workers hold only a `Weak<Connection>`, so a connection
/// reaped while a task is in flight makes that task's completion a no-op.
pub struct Connection {
    io: Mutex<ConnIo>,
    outbox: Mutex<Vec<u8>>,
    /// Set while a task for this connection is in flight, so the reactor
    /// withholds further parsing until the worker completes, preserving
    /// per-connection response ordering across a multi-worker pool.
    pub busy: AtomicBool,
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Connection {
            io: Mutex::new(ConnIo {
                stream,
                inbox: Vec::new(),
            }),
            outbox: Mutex::new(Vec::new()),
            busy: AtomicBool::new(false),
            peer,
        }
    }

    pub fn register(&self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        let mut io = self.io.lock().unwrap();
        registry.register(&mut io.stream, token, interest)
    }

    pub fn reregister(&self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        let mut io = self.io.lock().unwrap();
        registry.reregister(&mut io.stream, token, interest)
    }

    pub fn deregister(&self, registry: &Registry) -> io::Result<()> {
        let mut io = self.io.lock().unwrap();
        registry.deregister(&mut io.stream)
    }

    /// Perform one non-blocking read into the inbox.
    ///
    /// Returns `Ok(false)` iff the peer closed (read returned 0). On
    /// `WouldBlock` returns `Ok(true)` with nothing appended. Overflowing
    /// `MAX_INBOX_SIZE` clears the inbox and returns `Overflow`.
    pub fn read_to_inbox(&self) -> Result<bool, ConnError> {
        let mut io = self.io.lock().unwrap();
        let mut scratch = [0u8; READ_SCRATCH];

        match io.stream.read(&mut scratch) {
            Ok(0) => Ok(false),
            Ok(n) => {
                if io.inbox.len() + n > MAX_INBOX_SIZE {
                    io.inbox.clear();
                    return Err(ConnError::Overflow(BufferOverflowError));
                }
                io.inbox.extend_from_slice(&scratch[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(ConnError::Io(ConnectionError(e))),
        }
    }

    /// Pull the next complete line (without its `\n`) out of the inbox, if
    /// one is present. A trailing `\r` is left in place for the protocol
    /// layer to strip.
    pub fn try_get_line(&self) -> Option<Vec<u8>> {
        let mut io = self.io.lock().unwrap();
        let pos = io.inbox.iter().position(|&b| b == b'\n')?;
        let line = io.inbox[..pos].to_vec();
        io.inbox.drain(..=pos);
        Some(line)
    }

    pub fn inbox_has_data(&self) -> bool {
        !self.io.lock().unwrap().inbox.is_empty()
    }

    pub fn append_response(&self, bytes: &[u8]) {
        self.outbox.lock().unwrap().extend_from_slice(bytes);
    }

    pub fn outbox_has_data(&self) -> bool {
        !self.outbox.lock().unwrap().is_empty()
    }

    /// Attempt one non-blocking write of the whole outbox.
    ///
    /// Returns `Ok(true)` iff bytes remain after the call. `WouldBlock`
    /// counts as "bytes remain" (`Ok(true)`) without being an error.
    pub fn write_from_outbox(&self) -> Result<bool, ConnError> {
        let mut outbox = self.outbox.lock().unwrap();
        if outbox.is_empty() {
            return Ok(false);
        }

        let mut io = self.io.lock().unwrap();
        match io.stream.write(&outbox) {
            Ok(0) => Err(ConnError::Io(ConnectionError(io::Error::new(
                io::ErrorKind::WriteZero,
                "write returned 0",
            )))),
            Ok(n) => {
                outbox.drain(..n);
                Ok(!outbox.is_empty())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(ConnError::Io(ConnectionError(e))),
        }
    }
}
