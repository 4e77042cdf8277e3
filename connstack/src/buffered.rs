//! Read/write buffering.
//!
//! [`BufferedStream`] batches traffic through two fixed-capacity buffers to
//! cut per-call overhead on the inner stream: reads are served from a
//! refillable read buffer, writes accumulate until the buffer would
//! overflow, and an explicit [`Flushable::flush`] drains everything pending
//! and cascades into the inner stream's flush if it has one.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::conn::{try_flush, DuplexStream, Flushable};
use crate::error::{Result, StreamError};

/// Wraps a stream with independent read and write buffers.
///
/// Concurrency: one reader-side caller and one writer-side caller may
/// operate concurrently, and `flush` may race against `write` and against
/// other `flush` calls. A dedicated flush lock serializes the whole
/// drain-and-cascade sequence, so racing flushes can neither interleave
/// partial drains nor cascade twice into the inner flushable.
pub struct BufferedStream<S: DuplexStream> {
    inner: S,
    reader: Mutex<ReadBuffer>,
    pending: Mutex<BytesMut>,
    write_capacity: usize,
    flush_lock: Mutex<()>,
    closed: AtomicBool,
}

struct ReadBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl<S: DuplexStream> BufferedStream<S> {
    /// Creates a buffered stream over `inner` with the given buffer
    /// capacities in bytes. Capacities must be positive; zero is rejected
    /// here rather than failing lazily at first use.
    pub fn new(inner: S, read_capacity: usize, write_capacity: usize) -> Result<Self> {
        if read_capacity == 0 {
            return Err(StreamError::InvalidCapacity { side: "read", value: read_capacity });
        }
        if write_capacity == 0 {
            return Err(StreamError::InvalidCapacity { side: "write", value: write_capacity });
        }
        Ok(Self {
            inner,
            reader: Mutex::new(ReadBuffer { buf: BytesMut::new(), capacity: read_capacity }),
            pending: Mutex::new(BytesMut::with_capacity(write_capacity)),
            write_capacity,
            flush_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Writes everything in `pending` to the inner stream. On failure the
    /// undelivered remainder stays buffered, so bytes are never dropped.
    fn drain(&self, pending: &mut BytesMut) -> Result<()> {
        while !pending.is_empty() {
            match self.inner.write(&pending[..]) {
                Ok(0) => return Err(StreamError::Closed),
                Ok(n) => pending.advance(n),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<S: DuplexStream> DuplexStream for BufferedStream<S> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut reader = self.reader.lock();
        if reader.buf.is_empty() {
            // Requests at least as large as the buffer skip it entirely.
            if buf.len() >= reader.capacity {
                return self.inner.read(buf);
            }
            let capacity = reader.capacity;
            reader.buf.resize(capacity, 0);
            let n = match self.inner.read(&mut reader.buf[..]) {
                Ok(n) => n,
                Err(err) => {
                    reader.buf.clear();
                    return Err(err);
                }
            };
            reader.buf.truncate(n);
            if n == 0 {
                return Ok(0);
            }
        }

        let n = buf.len().min(reader.buf.len());
        buf[..n].copy_from_slice(&reader.buf.split_to(n));
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }

        let mut pending = self.pending.lock();
        if pending.len() + buf.len() > self.write_capacity {
            self.drain(&mut pending)?;
        }
        // Oversized writes go straight through once the buffer is empty.
        if buf.len() >= self.write_capacity {
            return self.inner.write(buf);
        }
        pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = drain_and_cascade(self) {
            tracing::warn!(error = %err, "flush on close failed; closing inner stream anyway");
        }
        self.inner.close()
    }

    fn as_flushable(&self) -> Option<&dyn Flushable> {
        Some(self)
    }
}

impl<S: DuplexStream> Flushable for BufferedStream<S> {
    fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        drain_and_cascade(self)
    }
}

/// The full flush sequence, serialized by the flush lock: drain the write
/// buffer, then cascade into the inner flushable. The cascade is skipped
/// when the local drain fails, and the lock is held across both steps so
/// two racing flushes cannot double-cascade.
fn drain_and_cascade<S: DuplexStream>(stream: &BufferedStream<S>) -> Result<()> {
    let _serialized = stream.flush_lock.lock();
    {
        let mut pending = stream.pending.lock();
        stream.drain(&mut pending)?;
    }
    try_flush(&stream.inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{read_full, write_full};
    use crate::pipe::{self, PipeStream};
    use std::sync::atomic::AtomicUsize;

    /// Counts the calls that actually reach the wrapped stream.
    struct CountingStream {
        inner: PipeStream,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl CountingStream {
        fn new(inner: PipeStream) -> Self {
            Self { inner, reads: AtomicUsize::new(0), writes: AtomicUsize::new(0) }
        }
    }

    impl DuplexStream for CountingStream {
        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(buf)
        }

        fn write(&self, buf: &[u8]) -> Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write(buf)
        }

        fn close(&self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn zero_capacities_are_rejected_up_front() {
        let (a, _b) = pipe::duplex();
        assert!(matches!(
            BufferedStream::new(a, 0, 8192),
            Err(StreamError::InvalidCapacity { side: "read", .. })
        ));

        let (a, _b) = pipe::duplex();
        assert!(matches!(
            BufferedStream::new(a, 8192, 0),
            Err(StreamError::InvalidCapacity { side: "write", .. })
        ));
    }

    #[test]
    fn small_writes_coalesce_into_one_inner_write() {
        let (a, _b) = pipe::duplex();
        let counted = CountingStream::new(a);
        let buffered = BufferedStream::new(counted, 64, 64).unwrap();

        for _ in 0..10 {
            buffered.write(b"abc").unwrap();
        }
        assert_eq!(buffered.inner.writes.load(Ordering::SeqCst), 0);

        buffered.flush().unwrap();
        assert_eq!(buffered.inner.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overflow_drains_before_buffering_the_remainder() {
        let (a, b) = pipe::duplex();
        let counted = CountingStream::new(a);
        let buffered = BufferedStream::new(counted, 16, 16).unwrap();

        buffered.write(&[b'x'; 10]).unwrap();
        buffered.write(&[b'y'; 10]).unwrap();
        // The first ten bytes were pushed out to make room; the second ten
        // are still pending.
        assert_eq!(buffered.inner.writes.load(Ordering::SeqCst), 1);

        let mut drained = [0u8; 10];
        read_full(&b, &mut drained).unwrap();
        assert_eq!(drained, [b'x'; 10]);

        buffered.flush().unwrap();
        read_full(&b, &mut drained).unwrap();
        assert_eq!(drained, [b'y'; 10]);
    }

    #[test]
    fn oversized_writes_bypass_the_buffer() {
        let (a, b) = pipe::duplex();
        let counted = CountingStream::new(a);
        let buffered = BufferedStream::new(counted, 16, 16).unwrap();

        let big = [b'z'; 40];
        assert_eq!(buffered.write(&big).unwrap(), 40);
        assert_eq!(buffered.inner.writes.load(Ordering::SeqCst), 1);

        let mut out = [0u8; 40];
        read_full(&b, &mut out).unwrap();
        assert_eq!(out, big);
    }

    #[test]
    fn small_reads_are_served_from_one_refill() {
        let (a, b) = pipe::duplex();
        write_full(&a, &[7u8; 64]).unwrap();

        let counted = CountingStream::new(b);
        let buffered = BufferedStream::new(counted, 64, 64).unwrap();

        let mut chunk = [0u8; 8];
        for _ in 0..8 {
            read_full(&buffered, &mut chunk).unwrap();
            assert_eq!(chunk, [7u8; 8]);
        }
        assert_eq!(buffered.inner.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn large_reads_bypass_the_buffer() {
        let (a, b) = pipe::duplex();
        write_full(&a, &[9u8; 128]).unwrap();

        let counted = CountingStream::new(b);
        let buffered = BufferedStream::new(counted, 16, 16).unwrap();

        let mut big = [0u8; 128];
        read_full(&buffered, &mut big).unwrap();
        assert_eq!(big, [9u8; 128]);
        // No refill copies: the inner reads went straight into the caller's
        // buffer.
        assert_eq!(buffered.inner.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_cascades_into_an_inner_flushable() {
        let (a, b) = pipe::duplex();
        let inner = BufferedStream::new(a, 32, 32).unwrap();
        let outer = BufferedStream::new(inner, 32, 32).unwrap();

        outer.write(b"nested").unwrap();
        outer.flush().unwrap();

        // One flush at the top fans all the way down to the wire.
        let mut out = [0u8; 6];
        read_full(&b, &mut out).unwrap();
        assert_eq!(&out, b"nested");
    }

    #[test]
    fn flush_twice_is_harmless() {
        let (a, b) = pipe::duplex();
        let buffered = BufferedStream::new(a, 32, 32).unwrap();

        buffered.write(b"once").unwrap();
        buffered.flush().unwrap();
        buffered.flush().unwrap();
        buffered.write(b"twice").unwrap();
        buffered.flush().unwrap();

        let mut out = [0u8; 9];
        read_full(&b, &mut out).unwrap();
        assert_eq!(&out, b"oncetwice");
    }

    #[test]
    fn close_flushes_then_closes_inner_exactly_once() {
        let (a, b) = pipe::duplex();
        let buffered = BufferedStream::new(a, 32, 32).unwrap();

        buffered.write(b"tail").unwrap();
        buffered.close().unwrap();
        buffered.close().unwrap();

        let mut out = [0u8; 4];
        read_full(&b, &mut out).unwrap();
        assert_eq!(&out, b"tail");
        // Peer now sees clean end-of-stream.
        assert_eq!(b.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn use_after_close_fails() {
        let (a, _b) = pipe::duplex();
        let buffered = BufferedStream::new(a, 32, 32).unwrap();
        buffered.close().unwrap();

        let mut buf = [0u8; 1];
        assert!(matches!(buffered.read(&mut buf), Err(StreamError::Closed)));
        assert!(matches!(buffered.write(b"x"), Err(StreamError::Closed)));
        assert!(matches!(buffered.flush(), Err(StreamError::Closed)));
    }
}
