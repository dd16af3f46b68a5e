//! Scheme dispatch: routes a URL to the concrete stream implementation.
//! Scheme-keyed open calls on a single synchronous entry point, rather than
//! a registered trait-object table, since only one backend matches per
//! scheme here, with no mounted multi-provider namespace.

use colonnade_cache::{CacheManager, CacheRead};
use colonnade_core::{ColonnadeError, ColonnadeResult};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::codec::{wants_gzip, GzipReader, GzipWriter, RawFileReader, RawFileWriter};
use crate::download_cache::DownloadCache;
use crate::stream::{InputStream, OutputStream};
use crate::url::Scheme;

/// Entry point combining the local/remote/cache backends behind one URL
/// dispatch.
pub struct Vfs {
    cache: Arc<CacheManager>,
    download: DownloadCache,
}

impl Vfs {
    pub fn new(cache: Arc<CacheManager>, download: DownloadCache) -> Self {
        Self { cache, download }
    }

    pub fn open_for_read(&self, url: &str, force_compression: bool) -> ColonnadeResult<Box<dyn InputStream>> {
        let scheme = Scheme::parse(url)?;
        match scheme {
            Scheme::Local(path) => open_local_read(&path, url, force_compression),
            Scheme::Hdfs { .. } => Err(hdfs_stub(url)),
            Scheme::S3 { bucket, key } => {
                let http_url = DownloadCache::s3_url_for(&bucket, &key);
                let local = self.download.fetch(&http_url)?;
                open_local_read(&local.to_string_lossy(), url, force_compression)
            }
            Scheme::Http(http_url) | Scheme::Https(http_url) => {
                let local = self.download.fetch(&http_url)?;
                open_local_read(&local.to_string_lossy(), url, force_compression)
            }
            Scheme::Ftp(_) => Err(ColonnadeError::open(url, "ftp support requires a linked ftp client")),
            Scheme::Cache(rest) => self.open_cache_read(&rest, url),
        }
    }

    pub fn open_for_write(&self, url: &str, force_compression: bool) -> ColonnadeResult<Box<dyn OutputStream>> {
        let scheme = Scheme::parse(url)?;
        match scheme {
            Scheme::Local(path) => open_local_write(&path, url, force_compression),
            Scheme::Hdfs { .. } => Err(hdfs_stub(url)),
            Scheme::S3 { .. } | Scheme::Http(_) | Scheme::Https(_) | Scheme::Ftp(_) => {
                Err(ColonnadeError::UnsupportedOperation(format!("{url} is read-only")))
            }
            Scheme::Cache(rest) => self.open_cache_write(&rest),
        }
    }

    pub fn file_size(&self, url: &str) -> ColonnadeResult<u64> {
        let scheme = Scheme::parse(url)?;
        match scheme {
            Scheme::Local(path) => std::fs::metadata(&path)
                .map(|m| m.len())
                .map_err(|e| ColonnadeError::io(format!("stat {path}"), e)),
            _ => {
                let mut stream = self.open_for_read(url, false)?;
                stream.file_size()
            }
        }
    }

    fn open_cache_read(&self, rest: &str, url: &str) -> ColonnadeResult<Box<dyn InputStream>> {
        if let Some(tmp_rel) = rest.strip_prefix("tmp/") {
            return open_local_read(&format!("/{tmp_rel}"), url, false);
        }
        let id: u64 = rest
            .parse()
            .map_err(|_| ColonnadeError::open(url, "cache:// id must be numeric"))?;
        match self.cache.read(id)? {
            CacheRead::Memory(slice) => Ok(Box::new(CacheMemoryStream::new(slice.to_vec()))),
            CacheRead::Spilled(file) => Ok(Box::new(CacheFileStream::new(file))),
        }
    }

    fn open_cache_write(&self, rest: &str) -> ColonnadeResult<Box<dyn OutputStream>> {
        let id: u64 = match rest.parse() {
            Ok(id) => {
                self.cache.ensure(id);
                id
            }
            Err(_) => self.cache.new_cache(),
        };
        Ok(Box::new(CacheWriteStream { manager: self.cache.clone(), id, bytes_written: 0 }))
    }
}

fn open_local_read(path: &str, url: &str, force_compression: bool) -> ColonnadeResult<Box<dyn InputStream>> {
    let p = std::path::Path::new(path);
    if wants_gzip(url, force_compression) {
        Ok(Box::new(GzipReader::open(p).map_err(|e| rewrap_open(e, url))?))
    } else {
        Ok(Box::new(RawFileReader::open(p).map_err(|e| rewrap_open(e, url))?))
    }
}

fn open_local_write(path: &str, url: &str, force_compression: bool) -> ColonnadeResult<Box<dyn OutputStream>> {
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ColonnadeError::io(format!("create {}", parent.display()), e))?;
        }
    }
    if wants_gzip(url, force_compression) {
        Ok(Box::new(GzipWriter::create(p).map_err(|e| rewrap_open(e, url))?))
    } else {
        Ok(Box::new(RawFileWriter::create(p).map_err(|e| rewrap_open(e, url))?))
    }
}

fn rewrap_open(e: ColonnadeError, url: &str) -> ColonnadeError {
    match e {
        ColonnadeError::IoError { source, .. } => ColonnadeError::open(url, source),
        other => other,
    }
}

fn hdfs_stub(url: &str) -> ColonnadeError {
    ColonnadeError::open(url, "hdfs support requires a linked libhdfs client")
}

struct CacheMemoryStream {
    cursor: Cursor<Vec<u8>>,
}

impl CacheMemoryStream {
    fn new(data: Vec<u8>) -> Self {
        Self { cursor: Cursor::new(data) }
    }
}

impl Read for CacheMemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl InputStream for CacheMemoryStream {
    fn tell_bytes_read(&self) -> u64 {
        self.cursor.position()
    }

    fn seek_to(&mut self, pos: u64) -> ColonnadeResult<()> {
        self.cursor.seek(SeekFrom::Start(pos)).map_err(|e| ColonnadeError::io("seek", e))?;
        Ok(())
    }

    fn file_size(&self) -> ColonnadeResult<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

struct CacheFileStream {
    file: std::fs::File,
    bytes_read: u64,
}

impl CacheFileStream {
    fn new(file: std::fs::File) -> Self {
        Self { file, bytes_read: 0 }
    }
}

impl Read for CacheFileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl InputStream for CacheFileStream {
    fn tell_bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn seek_to(&mut self, pos: u64) -> ColonnadeResult<()> {
        self.file.seek(SeekFrom::Start(pos)).map_err(|e| ColonnadeError::io("seek", e))?;
        self.bytes_read = pos;
        Ok(())
    }

    fn file_size(&self) -> ColonnadeResult<u64> {
        Ok(self.file.metadata().map_err(|e| ColonnadeError::io("stat", e))?.len())
    }
}

struct CacheWriteStream {
    manager: Arc<CacheManager>,
    id: u64,
    bytes_written: u64,
}

impl std::io::Write for CacheWriteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.manager
            .write(self.id, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputStream for CacheWriteStream {
    fn tell_bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colonnade_cache::TempRegistry;
    use std::io::Write as _;

    fn vfs() -> (Vfs, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let temp = Arc::new(TempRegistry::with_base(dir.path()).unwrap());
        let cache = Arc::new(CacheManager::new(temp.clone(), 1 << 20, 1 << 20));
        (Vfs::new(cache, DownloadCache::new(temp)), dir)
    }

    #[test]
    fn local_round_trip() {
        let (vfs, dir) = vfs();
        let path = dir.path().join("a.bin");
        let url = path.to_string_lossy().to_string();

        let mut w = vfs.open_for_write(&url, false).unwrap();
        w.write_all(b"payload").unwrap();
        drop(w);

        let mut r = vfs.open_for_read(&url, false).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn gzip_suffix_round_trip() {
        let (vfs, dir) = vfs();
        let path = dir.path().join("a.csv.gz");
        let url = path.to_string_lossy().to_string();

        let mut w = vfs.open_for_write(&url, false).unwrap();
        w.write_all(b"a,b,c\n1,2,3\n").unwrap();
        drop(w);

        let mut r = vfs.open_for_read(&url, false).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"a,b,c\n1,2,3\n");
        assert!(r.seek_to(0).is_err());
    }

    #[test]
    fn cache_scheme_round_trip() {
        let (vfs, _dir) = vfs();
        let mut w = vfs.open_for_write("cache://7", false).unwrap();
        w.write_all(b"blocked").unwrap();
        drop(w);

        let mut r = vfs.open_for_read("cache://7", false).unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"blocked");
    }

    #[test]
    fn hdfs_is_a_documented_stub() {
        let (vfs, _dir) = vfs();
        let err = vfs.open_for_read("hdfs://nn:8020/x", false).unwrap_err();
        assert!(matches!(err, ColonnadeError::OpenError { .. }));
    }
}
