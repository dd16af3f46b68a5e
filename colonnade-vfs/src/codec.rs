//! Raw and gzip-transparent stream implementations.
//!
//! Gzip is applied when the URL ends in `.gz` or compression is explicitly
//! requested. Compressed streams forbid seek; `flate2` (the pack's idiomatic
//! gzip crate) never reimplements DEFLATE itself.

use colonnade_core::{ColonnadeError, ColonnadeResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::stream::{InputStream, OutputStream};

pub struct RawFileReader {
    file: File,
    bytes_read: u64,
}

impl RawFileReader {
    pub fn open(path: &std::path::Path) -> ColonnadeResult<Self> {
        let file = File::open(path).map_err(|e| ColonnadeError::io(format!("open {}", path.display()), e))?;
        Ok(Self { file, bytes_read: 0 })
    }
}

impl Read for RawFileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl InputStream for RawFileReader {
    fn tell_bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn seek_to(&mut self, pos: u64) -> ColonnadeResult<()> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| ColonnadeError::io("seek", e))?;
        self.bytes_read = pos;
        Ok(())
    }

    fn file_size(&self) -> ColonnadeResult<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| ColonnadeError::io("stat", e))?
            .len())
    }
}

pub struct RawFileWriter {
    file: File,
    bytes_written: u64,
}

impl RawFileWriter {
    pub fn create(path: &std::path::Path) -> ColonnadeResult<Self> {
        let file = File::create(path).map_err(|e| ColonnadeError::io(format!("create {}", path.display()), e))?;
        Ok(Self { file, bytes_written: 0 })
    }
}

impl Write for RawFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl OutputStream for RawFileWriter {
    fn tell_bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

pub struct GzipReader {
    inner: GzDecoder<File>,
    bytes_read: u64,
    size_hint: Option<u64>,
}

impl GzipReader {
    pub fn open(path: &std::path::Path) -> ColonnadeResult<Self> {
        let file = File::open(path).map_err(|e| ColonnadeError::io(format!("open {}", path.display()), e))?;
        let size_hint = file.metadata().map(|m| m.len()).ok();
        Ok(Self { inner: GzDecoder::new(file), bytes_read: 0, size_hint })
    }
}

impl Read for GzipReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl InputStream for GzipReader {
    fn tell_bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn seek_to(&mut self, _pos: u64) -> ColonnadeResult<()> {
        Err(ColonnadeError::UnsupportedOperation("seek on a compressed stream".into()))
    }

    /// Best-effort: the compressed on-disk size, not the decompressed size.
    fn file_size(&self) -> ColonnadeResult<u64> {
        self.size_hint
            .ok_or_else(|| ColonnadeError::UnsupportedOperation("file size unavailable for compressed stream".into()))
    }
}

pub struct GzipWriter {
    inner: GzEncoder<File>,
    bytes_written: u64,
}

impl GzipWriter {
    pub fn create(path: &std::path::Path) -> ColonnadeResult<Self> {
        let file = File::create(path).map_err(|e| ColonnadeError::io(format!("create {}", path.display()), e))?;
        Ok(Self { inner: GzEncoder::new(file, Compression::default()), bytes_written: 0 })
    }
}

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl OutputStream for GzipWriter {
    fn tell_bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

pub fn wants_gzip(url: &str, force: bool) -> bool {
    force || url.ends_with(".gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn gzip_round_trip_counts_decompressed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.gz");

        let mut w = GzipWriter::create(&path).unwrap();
        w.write_all(b"hello gzip world").unwrap();
        w.flush().unwrap();
        drop(w);

        let mut r = GzipReader::open(&path).unwrap();
        let mut out = String::new();
        r.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello gzip world");
        assert_eq!(r.tell_bytes_read(), "hello gzip world".len() as u64);
    }

    #[test]
    fn gzip_seek_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.gz");
        let mut w = GzipWriter::create(&path).unwrap();
        w.write_all(b"x").unwrap();
        drop(w);

        let mut r = GzipReader::open(&path).unwrap();
        assert!(matches!(r.seek_to(0), Err(ColonnadeError::UnsupportedOperation(_))));
    }

    #[test]
    fn wants_gzip_detects_suffix() {
        assert!(wants_gzip("foo.csv.gz", false));
        assert!(!wants_gzip("foo.csv", false));
        assert!(wants_gzip("foo.csv", true));
    }
}
