//! Transparent stream compression.
//!
//! [`CompressedStream`] layers a streaming zlib codec over an inner
//! connection: outgoing bytes are compressed, incoming bytes are
//! decompressed, and an explicit [`Flushable::flush`] pushes every pending
//! compressed block far enough that the peer can decode all bytes written so
//! far. The codec and its block format are implementation details; the
//! contract is that a write-flush-read round trip is exactly lossless.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::conn::{try_flush, DuplexStream, Flushable};
use crate::error::{restore_stream_error, Result, StreamError};

/// Wraps a stream with streaming compression of the write path and
/// streaming decompression of the read path.
///
/// `write` reports logical (uncompressed) bytes accepted; the compressed
/// form may still sit in the codec's block buffer until [`Flushable::flush`]
/// forces it out. Decoding errors on the read path are terminal and surface
/// as [`StreamError::Corrupt`]. Closing flushes pending blocks best-effort,
/// then closes the inner stream exactly once.
pub struct CompressedStream<S: DuplexStream> {
    inner: Arc<S>,
    decoder: Mutex<ZlibDecoder<InnerReader<S>>>,
    encoder: Mutex<ZlibEncoder<InnerWriter<S>>>,
    closed: AtomicBool,
}

impl<S: DuplexStream> CompressedStream<S> {
    pub fn new(inner: S) -> Self {
        let inner = Arc::new(inner);
        Self {
            decoder: Mutex::new(ZlibDecoder::new(InnerReader(inner.clone()))),
            encoder: Mutex::new(ZlibEncoder::new(
                InnerWriter(inner.clone()),
                Compression::default(),
            )),
            inner,
            closed: AtomicBool::new(false),
        }
    }
}

impl<S: DuplexStream> DuplexStream for CompressedStream<S> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        self.decoder.lock().read(buf).map_err(decode_error)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        self.encoder.lock().write(buf).map_err(restore_stream_error)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = flush_codec(self) {
            tracing::warn!(error = %err, "flush on close failed; closing inner stream anyway");
        }
        self.inner.close()
    }

    fn as_flushable(&self) -> Option<&dyn Flushable> {
        Some(self)
    }
}

impl<S: DuplexStream> Flushable for CompressedStream<S> {
    fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        flush_codec(self)
    }
}

/// Sync-flushes the encoder so the peer can decode everything written, then
/// cascades into the inner stream's flush if it has one. The cascade is
/// skipped when the local flush fails.
fn flush_codec<S: DuplexStream>(stream: &CompressedStream<S>) -> Result<()> {
    stream.encoder.lock().flush().map_err(restore_stream_error)?;
    try_flush(stream.inner.as_ref())
}

fn decode_error(err: io::Error) -> StreamError {
    match restore_stream_error(err) {
        StreamError::Io(io_err)
            if matches!(
                io_err.kind(),
                io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
            ) =>
        {
            StreamError::Corrupt(io_err.to_string())
        }
        other => other,
    }
}

/// Read half of the inner stream, as the `io::Read` source the decoder
/// pulls from. Stream errors are carried through the io seam intact.
struct InnerReader<S>(Arc<S>);

impl<S: DuplexStream> Read for InnerReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(io::Error::from)
    }
}

/// Write half of the inner stream, as the `io::Write` sink the encoder
/// emits compressed blocks into.
struct InnerWriter<S>(Arc<S>);

impl<S: DuplexStream> Write for InnerWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Cascading into the inner flushable is the decorator's decision;
        // the codec's flush stops at emitting its own blocks.
        Ok(())
    }
}
