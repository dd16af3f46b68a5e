//! Download cache for S3/HTTP(S)/FTP-backed reads: the cache returns the
//! local file path, and re-requests for the same URL reuse the cached copy
//! unless the remote last-modified timestamp differs.
//!
//! Uses plain `reqwest` GET requests rather than signed AWS SigV4 access
//! (see DESIGN.md); public/presigned URLs work directly.

use colonnade_cache::TempRegistry;
use colonnade_core::{ColonnadeError, ColonnadeResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

struct Entry {
    local_path: PathBuf,
    last_modified: Option<String>,
}

/// URL-keyed cache of downloaded remote files, released best-effort.
pub struct DownloadCache {
    temp: Arc<TempRegistry>,
    client: reqwest::blocking::Client,
    table: Mutex<HashMap<String, Entry>>,
}

impl DownloadCache {
    pub fn new(temp: Arc<TempRegistry>) -> Self {
        Self { temp, client: reqwest::blocking::Client::new(), table: Mutex::new(HashMap::new()) }
    }

    /// Returns a local path holding the current contents of `http_url`,
    /// downloading (or re-downloading, if the remote's last-modified header
    /// changed) as needed.
    pub fn fetch(&self, http_url: &str) -> ColonnadeResult<PathBuf> {
        let remote_last_modified = self.head_last_modified(http_url);

        {
            let table = self.table.lock();
            if let Some(entry) = table.get(http_url) {
                let unchanged = match (&entry.last_modified, &remote_last_modified) {
                    (Some(cached), Some(current)) => cached == current,
                    // No last-modified available on either side: trust the
                    // existing cached copy rather than re-fetching on every
                    // call.
                    (None, None) => true,
                    _ => false,
                };
                if unchanged && entry.local_path.exists() {
                    return Ok(entry.local_path.clone());
                }
            }
        }

        let response = self
            .client
            .get(http_url)
            .send()
            .map_err(|e| ColonnadeError::open(http_url, e))?;
        if !response.status().is_success() {
            return Err(ColonnadeError::open(http_url, format!("http status {}", response.status())));
        }
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = response.bytes().map_err(|e| ColonnadeError::open(http_url, e))?;

        let local_path = self.temp.unique_path("download");
        let mut file = std::fs::File::create(&local_path)
            .map_err(|e| ColonnadeError::io(format!("create {}", local_path.display()), e))?;
        file.write_all(&bytes)
            .map_err(|e| ColonnadeError::io(format!("write {}", local_path.display()), e))?;

        self.table.lock().insert(
            http_url.to_string(),
            Entry { local_path: local_path.clone(), last_modified },
        );
        Ok(local_path)
    }

    /// Best-effort release; a concurrent reader may still hold the file.
    pub fn release(&self, http_url: &str) {
        if let Some(entry) = self.table.lock().remove(http_url) {
            let _ = std::fs::remove_file(entry.local_path);
        }
    }

    fn head_last_modified(&self, http_url: &str) -> Option<String> {
        let response = self.client.head(http_url).send().ok()?;
        response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    pub fn s3_url_for(bucket: &str, key: &str) -> String {
        format!("https://{bucket}.s3.amazonaws.com/{key}")
    }
}
