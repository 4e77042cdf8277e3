//! Temporary-error normalization.
//!
//! [`RetryStream`] sits closest to the wire in the canonical stacking order
//! and hides the transient, zero-progress error class from everything above
//! it. Callers of a wrapped stream never see an error for which
//! [`StreamError::is_temporary`](crate::error::StreamError::is_temporary)
//! is true.

use std::thread;

use crate::conn::DuplexStream;
use crate::error::Result;

/// Wraps a stream and retries reads and writes that fail with a temporary
/// error, yielding the scheduler between attempts.
///
/// The retry loop is unbounded and performs no sleep or backoff: retry
/// frequency is limited only by how fast the inner stream re-signals the
/// fault, and total wait is bounded by the underlying transport's own
/// deadline support (or by the caller giving up). Non-temporary outcomes,
/// including clean end-of-stream, pass through unchanged.
///
/// The wrapper produces a plain [`DuplexStream`]; it exposes no
/// [`Flushable`](crate::conn::Flushable) facet of its own. Stack it
/// innermost, beneath any buffering or compression layer.
pub struct RetryStream<S> {
    inner: S,
}

impl<S: DuplexStream> RetryStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Consumes the wrapper, returning the inner stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: DuplexStream> DuplexStream for RetryStream<S> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(err) if err.is_temporary() => thread::yield_now(),
                result => return result,
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.inner.write(buf) {
                Err(err) if err.is_temporary() => thread::yield_now(),
                result => return result,
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
