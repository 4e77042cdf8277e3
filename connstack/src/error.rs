//! Error taxonomy for decorated streams.
//!
//! The interesting classification is *temporary vs. terminal*: a temporary
//! error with zero progress is the only class a decorator is ever allowed to
//! suppress (see [`crate::retry::RetryStream`]). Everything else — clean
//! end-of-stream, closed handles, corrupt compressed data, configuration
//! mistakes — passes through the chain unchanged.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// How many links of a wrapped error's cause chain are inspected when
/// classifying it as temporary.
pub const MAX_CAUSE_DEPTH: usize = 8;

/// All errors produced by the connstack decorator chain.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A transient, retryable failure with zero bytes transferred. Producers
    /// tag their own errors with this variant; nothing above the retry layer
    /// should ever observe it.
    #[error("temporary failure: {0}")]
    Temporary(String),

    /// The stream (or its peer) is closed.
    #[error("stream is closed")]
    Closed,

    /// A buffer capacity outside the accepted range was given at
    /// construction time.
    #[error("invalid {side} buffer capacity: {value}")]
    InvalidCapacity { side: &'static str, value: usize },

    /// The compressed byte stream could not be decoded. Terminal: the read
    /// side of the connection is unusable once this is returned.
    #[error("corrupt compressed stream: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

impl StreamError {
    /// Returns true if this error is self-classified as transient and safe
    /// to retry.
    ///
    /// Wrapped errors are unwrapped (to at most [`MAX_CAUSE_DEPTH`] links)
    /// before classification, so a temporary error annotated by an
    /// intermediate layer still reads as temporary.
    pub fn is_temporary(&self) -> bool {
        error_is_temporary(self, MAX_CAUSE_DEPTH)
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> io::Error {
        match err {
            StreamError::Io(io_err) => io_err,
            other => io::Error::other(other),
        }
    }
}

fn kind_is_temporary(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/// Walks the cause chain looking for a node that classifies as temporary.
fn error_is_temporary(err: &(dyn StdError + 'static), depth: usize) -> bool {
    if depth == 0 {
        return false;
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if kind_is_temporary(io_err.kind()) {
            return true;
        }
    }
    if let Some(stream_err) = err.downcast_ref::<StreamError>() {
        if matches!(stream_err, StreamError::Temporary(_)) {
            return true;
        }
    }
    match cause_of(err) {
        Some(cause) => error_is_temporary(cause, depth - 1),
        None => false,
    }
}

/// Next link in the cause chain. `io::Error::source` skips over the carried
/// payload, so io errors descend through `get_ref` instead.
fn cause_of<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a (dyn StdError + 'static)> {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if let Some(payload) = io_err.get_ref() {
            let payload: &(dyn StdError + 'static) = payload;
            return Some(payload);
        }
        return None;
    }
    err.source()
}

/// Recovers a [`StreamError`] that crossed an `io::Error` seam (the codec
/// layer speaks `std::io`), falling back to plain `Io` wrapping.
pub(crate) fn restore_stream_error(err: io::Error) -> StreamError {
    if !err.get_ref().is_some_and(|payload| payload.is::<StreamError>()) {
        return StreamError::Io(err);
    }
    match err.into_inner().map(|payload| payload.downcast::<StreamError>()) {
        Some(Ok(stream_err)) => *stream_err,
        _ => StreamError::Io(io::Error::other("stream error payload lost in transit")),
    }
}
