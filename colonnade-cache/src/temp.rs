//! Temp directory selection and process-scoped reaping.

use colonnade_core::{ColonnadeError, ColonnadeResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-identified temp directory: `<base>/colonnade-<pid>`. Unused
/// directories of dead processes can be reaped by a later process without
/// racing a still-running one.
pub struct TempRegistry {
    root: PathBuf,
    next_id: AtomicU64,
}

impl TempRegistry {
    pub fn new() -> ColonnadeResult<Self> {
        Self::with_base(&default_base())
    }

    pub fn with_base(base: &Path) -> ColonnadeResult<Self> {
        let pid = std::process::id();
        let root = base.join(format!("colonnade-{pid}"));
        std::fs::create_dir_all(&root)
            .map_err(|e| ColonnadeError::io(format!("create temp root {}", root.display()), e))?;
        Ok(Self { root, next_id: AtomicU64::new(0) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh, collision-free path under the registry's root.
    pub fn unique_path(&self, prefix: &str) -> PathBuf {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!("{prefix}-{id}"))
    }

    /// Remove `<base>/colonnade-<pid>` directories whose owning process is no
    /// longer alive. Best-effort: on platforms without `/proc`, this is a
    /// no-op rather than a guess.
    pub fn reap_dead(base: &Path) -> ColonnadeResult<usize> {
        let mut reaped = 0;
        let entries = match std::fs::read_dir(base) {
            Ok(e) => e,
            Err(_) => return Ok(0),
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(pid_str) = name.strip_prefix("colonnade-") else { continue };
            let Ok(pid) = pid_str.parse::<u32>() else { continue };
            if !process_is_alive(pid) {
                if std::fs::remove_dir_all(entry.path()).is_ok() {
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn default_base() -> PathBuf {
    if let Ok(dir) = std::env::var("TMPDIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let var_tmp = PathBuf::from("/var/tmp");
    if var_tmp.is_dir() {
        return var_tmp;
    }
    PathBuf::from("/tmp")
}

#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    // Conservative: without a reliable liveness check, assume alive so we
    // never delete a live process's scratch files.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_process_scoped_root() {
        let base = tempfile::tempdir().unwrap();
        let registry = TempRegistry::with_base(base.path()).unwrap();
        assert!(registry.root().exists());
        assert!(registry.root().to_string_lossy().contains(&std::process::id().to_string()));
    }

    #[test]
    fn unique_path_never_repeats() {
        let base = tempfile::tempdir().unwrap();
        let registry = TempRegistry::with_base(base.path()).unwrap();
        let a = registry.unique_path("seg");
        let b = registry.unique_path("seg");
        assert_ne!(a, b);
    }
}
