//! File-handle pool: deduplicated, lifetime-tracked handles to on-disk
//! artifacts.
//!
//! Several logical columns may reference the same physical file after a
//! rename/replace-in-place; physical deletion must wait until no reader
//! holds the file. An explicit handle table owns the path strings and
//! reference counts rather than relying on shared-pointer destructor order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct HandleInner {
    path: PathBuf,
    delete_on_drop: AtomicBool,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::SeqCst) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "delete-on-drop failed");
                }
            }
        }
    }
}

/// A reference-counted token naming an on-disk artifact. Deletion happens
/// exactly once, only after the last handle drops and only if
/// `mark_for_delete` was called on some handle sharing this path.
#[derive(Clone)]
pub struct FileHandle(Arc<HandleInner>);

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    pub fn mark_for_delete(&self) {
        self.0.delete_on_drop.store(true, Ordering::SeqCst);
    }

    pub fn delete_on_drop(&self) -> bool {
        self.0.delete_on_drop.load(Ordering::SeqCst)
    }

    /// Number of live handles sharing this artifact, for diagnostics/tests.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

struct Inner {
    table: HashMap<String, Weak<HandleInner>>,
    registrations_since_sweep: usize,
}

/// Process-wide mapping from canonical file URL to a weak reference on an
/// ownership handle.
pub struct HandlePool {
    inner: Mutex<Inner>,
    sweep_interval: usize,
}

impl HandlePool {
    pub fn new(sweep_interval: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { table: HashMap::new(), registrations_since_sweep: 0 }),
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// Returns a shared handle for `url`, creating one if not already live.
    pub fn register(&self, url: &str) -> FileHandle {
        let mut inner = self.inner.lock();
        if let Some(weak) = inner.table.get(url) {
            if let Some(strong) = weak.upgrade() {
                return FileHandle(strong);
            }
        }
        let handle = Arc::new(HandleInner { path: PathBuf::from(url), delete_on_drop: AtomicBool::new(false) });
        inner.table.insert(url.to_string(), Arc::downgrade(&handle));
        inner.registrations_since_sweep += 1;
        if inner.registrations_since_sweep >= self.sweep_interval {
            self.sweep_locked(&mut inner);
        }
        FileHandle(handle)
    }

    /// Flip an existing handle to delete-on-drop. No-op if the URL isn't live.
    pub fn mark_for_delete(&self, url: &str) {
        let inner = self.inner.lock();
        if let Some(strong) = inner.table.get(url).and_then(Weak::upgrade) {
            strong.delete_on_drop.store(true, Ordering::SeqCst);
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().table.values().filter(|w| w.strong_count() > 0).count()
    }

    fn sweep_locked(&self, inner: &mut Inner) {
        inner.table.retain(|_, weak| weak.strong_count() > 0);
        inner.registrations_since_sweep = 0;
    }
}

impl Default for HandlePool {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_same_url_shares_handle() {
        let pool = HandlePool::new(128);
        let a = pool.register("/tmp/x.sidx");
        let b = pool.register("/tmp/x.sidx");
        assert_eq!(a.ref_count(), 2);
        assert_eq!(b.ref_count(), 2);
    }

    #[test]
    fn delete_on_drop_fires_once_last_handle_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"data").unwrap();

        let pool = HandlePool::new(128);
        let url = path.to_string_lossy().to_string();
        let a = pool.register(&url);
        let b = pool.register(&url);
        pool.mark_for_delete(&url);

        assert!(path.exists());
        drop(a);
        assert!(path.exists(), "still referenced by b");
        drop(b);
        assert!(!path.exists(), "deleted once last handle dropped");
    }

    #[test]
    fn sweep_clears_expired_entries() {
        let pool = HandlePool::new(2);
        {
            let _h = pool.register("/tmp/a");
        }
        pool.register("/tmp/b");
        // second registration triggers the sweep interval (2)
        assert_eq!(pool.live_count(), 1);
    }
}
