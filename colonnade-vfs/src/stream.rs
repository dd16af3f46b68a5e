//! Read/write stream abstraction: a synchronous trait pair with no
//! externally-visible async runtime.

use colonnade_core::ColonnadeResult;
use std::io::{Read, Write};

/// A readable byte stream: sequential read, best-effort position tracking,
/// and absolute seek where the underlying transport supports it.
pub trait InputStream: Read + Send {
    fn tell_bytes_read(&self) -> u64;

    /// Absolute seek. Compressed streams return `UnsupportedOperation`.
    fn seek_to(&mut self, pos: u64) -> ColonnadeResult<()>;

    fn file_size(&self) -> ColonnadeResult<u64>;
}

/// A writable byte stream: sequential write with best-effort position
/// tracking.
pub trait OutputStream: Write + Send {
    fn tell_bytes_written(&self) -> u64;
}
