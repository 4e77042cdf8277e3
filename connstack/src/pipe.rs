//! In-memory duplex transport.
//!
//! [`duplex`] produces a connected pair of endpoints backed by two shared
//! byte queues, giving tests and benches a loopback connection with the same
//! contract as a real socket: blocking reads, clean `Ok(0)` end-of-stream
//! after the peer closes, and `Closed` errors on use after local close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};

use crate::conn::DuplexStream;
use crate::error::{Result, StreamError};

/// One direction of the pipe: a byte queue plus the condvar readers block on.
struct Channel {
    state: Mutex<ChannelState>,
    readable: Condvar,
}

struct ChannelState {
    buf: BytesMut,
    /// Set once either endpoint closes; readers drain what is left, then see
    /// end-of-stream.
    closed: bool,
}

impl Channel {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState { buf: BytesMut::new(), closed: false }),
            readable: Condvar::new(),
        }
    }
}

/// One endpoint of an in-memory duplex connection.
pub struct PipeStream {
    incoming: Arc<Channel>,
    outgoing: Arc<Channel>,
    closed: AtomicBool,
}

/// Creates a connected pair of in-memory endpoints. Bytes written to one
/// endpoint are read from the other, in order. Writes never block (the
/// queues are unbounded); reads block until data arrives or the connection
/// closes.
pub fn duplex() -> (PipeStream, PipeStream) {
    let a_to_b = Arc::new(Channel::new());
    let b_to_a = Arc::new(Channel::new());
    (
        PipeStream {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
            closed: AtomicBool::new(false),
        },
        PipeStream {
            incoming: a_to_b,
            outgoing: b_to_a,
            closed: AtomicBool::new(false),
        },
    )
}

impl DuplexStream for PipeStream {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.incoming.state.lock();
        while state.buf.is_empty() {
            if state.closed {
                return Ok(0);
            }
            self.incoming.readable.wait(&mut state);
            if self.closed.load(Ordering::SeqCst) {
                return Err(StreamError::Closed);
            }
        }

        let n = buf.len().min(state.buf.len());
        buf[..n].copy_from_slice(&state.buf.split_to(n));
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }

        let mut state = self.outgoing.state.lock();
        if state.closed {
            return Err(StreamError::Closed);
        }
        state.buf.extend_from_slice(buf);
        drop(state);

        self.outgoing.readable.notify_all();
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("pipe endpoint closed");
        for channel in [&self.incoming, &self.outgoing] {
            let mut state = channel.state.lock();
            state.closed = true;
            drop(state);
            channel.readable.notify_all();
        }
        Ok(())
    }
}
