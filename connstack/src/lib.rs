//! connstack -- composable decorators over duplex byte-stream connections.
//!
//! Wraps any [`DuplexStream`] with a small fixed set of orthogonal
//! behaviors, each preserving the duplex-stream-plus-optional-flush
//! contract:
//! - **Temporary-error retry** ([`RetryStream`]): absorbs transient,
//!   zero-progress errors so they never reach the rest of the stack
//! - **Transparent compression** ([`CompressedStream`]): streaming
//!   compression of writes, decompression of reads, explicit flush
//! - **Buffering** ([`BufferedStream`]): batched reads and writes through
//!   fixed-capacity buffers, with a concurrency-safe flush
//!
//! A chain is built bottom-up at accept/dial time; the canonical order puts
//! retry closest to the wire, then compression, then buffering:
//!
//! ```
//! use connstack::{BufferedStream, CompressedStream, RetryStream, pipe};
//!
//! # fn main() -> connstack::Result<()> {
//! let (raw, _peer) = pipe::duplex();
//! let conn = BufferedStream::new(CompressedStream::new(RetryStream::new(raw)), 8192, 8192)?;
//! # drop(conn);
//! # Ok(())
//! # }
//! ```
//!
//! The outermost decorator owns the whole chain: closing it flushes pending
//! data and releases the innermost transport exactly once.

pub mod buffered;
pub mod compress;
pub mod conn;
pub mod error;
pub mod pipe;
pub mod retry;

// Re-export key public types at crate root.
pub use buffered::BufferedStream;
pub use compress::CompressedStream;
pub use conn::{read_full, try_flush, write_full, DuplexStream, Flushable};
pub use error::{Result, StreamError};
pub use pipe::PipeStream;
pub use retry::RetryStream;
