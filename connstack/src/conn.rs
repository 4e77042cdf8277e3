//! Capability contracts for decorated connections.
//!
//! Two contracts cover the whole system: [`DuplexStream`] is the base duplex
//! byte channel every decorator both consumes and produces, and [`Flushable`]
//! is the optional capability a stream exposes only if it stages data that
//! would otherwise not reach the peer. Capability detection is an explicit
//! runtime query ([`DuplexStream::as_flushable`]) rather than a downcast, so
//! chains compose through plain trait objects.

use std::io;
use std::net::{Shutdown, TcpStream};

use crate::error::{Result, StreamError};

/// A duplex byte-stream connection.
///
/// Methods take `&self`: the expected discipline is one reader-side caller
/// and one writer-side caller operating concurrently (reads are never
/// serialized against writes), with `flush` free to race against `write`.
/// Stateful implementations use interior mutability to uphold this.
///
/// Contract notes:
/// - `read` returning `Ok(0)` with a non-empty buffer is clean end-of-stream
///   and is never retried or transformed by any decorator.
/// - An `Err` return means zero bytes were transferred. An implementation
///   that makes partial progress before hitting a transient fault must
///   report the progress as `Ok(n)` and re-signal the fault on the next
///   call.
/// - After `close`, reads and writes fail with [`StreamError::Closed`].
///   `close` itself is idempotent.
pub trait DuplexStream: Send + Sync {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Writes up to `buf.len()` bytes, returning how many were accepted.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Closes the connection, releasing the underlying transport exactly
    /// once. Subsequent calls are a no-op.
    fn close(&self) -> Result<()>;

    /// Runtime capability query: returns the stream's [`Flushable`] facet if
    /// it buffers or stages data. The default is `None`, meaning writes are
    /// immediately effective and flush is a no-op for this stream.
    fn as_flushable(&self) -> Option<&dyn Flushable> {
        None
    }
}

/// Optional capability to force staged data out to the peer.
pub trait Flushable: Sync {
    /// Delivers everything staged so far. A decorator fully flushes its own
    /// data before cascading into the next flushable layer beneath it.
    fn flush(&self) -> Result<()>;
}

/// Flushes `stream` if it exposes the capability; no-op otherwise.
pub fn try_flush<S: DuplexStream + ?Sized>(stream: &S) -> Result<()> {
    match stream.as_flushable() {
        Some(flushable) => flushable.flush(),
        None => Ok(()),
    }
}

/// Reads until `buf` is full. A clean end-of-stream before that maps to
/// [`StreamError::Closed`].
pub fn read_full<S: DuplexStream + ?Sized>(stream: &S, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        match stream.read(buf)? {
            0 => return Err(StreamError::Closed),
            n => {
                let rest = buf;
                buf = &mut rest[n..];
            }
        }
    }
    Ok(())
}

/// Writes the whole of `buf`, looping over short writes.
pub fn write_full<S: DuplexStream + ?Sized>(stream: &S, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match stream.write(buf)? {
            0 => return Err(StreamError::Closed),
            n => buf = &buf[n..],
        }
    }
    Ok(())
}

impl<S: DuplexStream + ?Sized> DuplexStream for Box<S> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn as_flushable(&self) -> Option<&dyn Flushable> {
        (**self).as_flushable()
    }
}

/// A TCP socket is the canonical raw connection under a decorator chain.
/// Writes hit the kernel directly, so no `Flushable` facet is exposed.
impl DuplexStream for TcpStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        io::Read::read(&mut &*self, buf).map_err(StreamError::from)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        io::Write::write(&mut &*self, buf).map_err(StreamError::from)
    }

    fn close(&self) -> Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Already shut down: close stays idempotent.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result.map_err(StreamError::from),
        }
    }
}
