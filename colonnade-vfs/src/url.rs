//! URL scheme parsing.

use colonnade_core::{ColonnadeError, ColonnadeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// Local path, with or without an explicit `file://` prefix.
    Local(String),
    Hdfs { host: String, port: u16, path: String },
    S3 { bucket: String, key: String },
    Http(String),
    Https(String),
    Ftp(String),
    /// `cache://<id>`; `cache://tmp/...` is reserved for process-local
    /// temporaries and is not registered with the cache manager.
    Cache(String),
}

impl Scheme {
    pub fn parse(url: &str) -> ColonnadeResult<Self> {
        if let Some(rest) = url.strip_prefix("file://") {
            return Ok(Scheme::Local(rest.to_string()));
        }
        if let Some(rest) = url.strip_prefix("cache://") {
            return Ok(Scheme::Cache(rest.to_string()));
        }
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(|| {
                ColonnadeError::open(url, "s3 url must be s3://bucket/key")
            })?;
            return Ok(Scheme::S3 { bucket: bucket.to_string(), key: key.to_string() });
        }
        if let Some(rest) = url.strip_prefix("hdfs://") {
            let (authority, path) = rest.split_once('/').ok_or_else(|| {
                ColonnadeError::open(url, "hdfs url must be hdfs://host:port/path")
            })?;
            let (host, port) = authority.split_once(':').ok_or_else(|| {
                ColonnadeError::open(url, "hdfs url must specify a port")
            })?;
            let port: u16 = port
                .parse()
                .map_err(|_| ColonnadeError::open(url, "hdfs port is not a valid u16"))?;
            return Ok(Scheme::Hdfs { host: host.to_string(), port, path: format!("/{path}") });
        }
        if url.starts_with("http://") {
            return Ok(Scheme::Http(url.to_string()));
        }
        if url.starts_with("https://") {
            return Ok(Scheme::Https(url.to_string()));
        }
        if let Some(rest) = url.strip_prefix("ftp://") {
            return Ok(Scheme::Ftp(rest.to_string()));
        }
        Ok(Scheme::Local(url.to_string()))
    }

    /// Whether this scheme names a remote resource that must pass through
    /// the download cache before a local stream can be opened on it.
    pub fn is_remote(&self) -> bool {
        matches!(self, Scheme::S3 { .. } | Scheme::Http(_) | Scheme::Https(_) | Scheme::Ftp(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_path_without_scheme() {
        assert_eq!(Scheme::parse("/tmp/x.sidx").unwrap(), Scheme::Local("/tmp/x.sidx".into()));
    }

    #[test]
    fn parses_s3_bucket_and_key() {
        match Scheme::parse("s3://my-bucket/path/to/key").unwrap() {
            Scheme::S3 { bucket, key } => {
                assert_eq!(bucket, "my-bucket");
                assert_eq!(key, "path/to/key");
            }
            other => panic!("unexpected scheme: {other:?}"),
        }
    }

    #[test]
    fn parses_hdfs_host_port_path() {
        match Scheme::parse("hdfs://namenode:8020/user/data.sidx").unwrap() {
            Scheme::Hdfs { host, port, path } => {
                assert_eq!(host, "namenode");
                assert_eq!(port, 8020);
                assert_eq!(path, "/user/data.sidx");
            }
            other => panic!("unexpected scheme: {other:?}"),
        }
    }

    #[test]
    fn rejects_hdfs_without_port() {
        assert!(Scheme::parse("hdfs://namenode/path").is_err());
    }

    #[test]
    fn cache_tmp_prefix_is_reserved() {
        match Scheme::parse("cache://tmp/segment-7").unwrap() {
            Scheme::Cache(rest) => assert_eq!(rest, "tmp/segment-7"),
            other => panic!("unexpected scheme: {other:?}"),
        }
    }
}
