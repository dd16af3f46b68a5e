//! Bounded in-memory cache of byte buffers keyed by cache-id, spilling to
//! disk when a block's own limit or the global budget would be exceeded.

use colonnade_core::{ColonnadeError, ColonnadeResult};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::temp::TempRegistry;

pub type CacheId = u64;

enum BlockState {
    Memory(Vec<u8>),
    Spilled(PathBuf),
}

struct Inner {
    blocks: BTreeMap<CacheId, BlockState>,
    memory_bytes: u64,
}

/// A read handle into a cache block: either a borrowed in-memory slice or an
/// open stream onto the spilled file.
pub enum CacheRead<'a> {
    Memory(MappedRwLockReadGuard<'a, [u8]>),
    Spilled(File),
}

/// Process-wide cache manager, held behind an `Arc` by the context that
/// constructs it: one explicit service object passed around rather than a
/// process-wide singleton.
pub struct CacheManager {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    temp: Arc<TempRegistry>,
    budget_bytes: u64,
    per_block_limit_bytes: u64,
}

impl CacheManager {
    pub fn new(temp: Arc<TempRegistry>, budget_bytes: u64, per_block_limit_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner { blocks: BTreeMap::new(), memory_bytes: 0 }),
            next_id: AtomicU64::new(0),
            temp,
            budget_bytes,
            per_block_limit_bytes,
        }
    }

    pub fn new_cache(&self) -> CacheId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.write().blocks.insert(id, BlockState::Memory(Vec::new()));
        id
    }

    /// Registers `id` as a fresh, empty block if it doesn't already exist.
    /// Used by callers (e.g. `cache://<id>` URLs) that name an id explicitly
    /// rather than minting one through `new_cache`.
    pub fn ensure(&self, id: CacheId) {
        let mut inner = self.inner.write();
        inner.blocks.entry(id).or_insert_with(|| BlockState::Memory(Vec::new()));
        drop(inner);
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
    }

    /// Appends `bytes` to block `id`. Spills to disk if the block's own
    /// limit or the global budget would be exceeded. Spill is irreversible
    /// for the lifetime of the id: once on disk, a block never moves back
    /// into memory.
    pub fn write(&self, id: CacheId, bytes: &[u8]) -> ColonnadeResult<()> {
        // Spilled blocks: append directly, no lock held across I/O.
        {
            let guard = self.inner.read();
            if let Some(BlockState::Spilled(path)) = guard.blocks.get(&id) {
                let path = path.clone();
                drop(guard);
                return self.append_file(&path, bytes);
            }
            if !guard.blocks.contains_key(&id) {
                return Err(ColonnadeError::Internal(format!("unknown cache id {id}")));
            }
        }

        let mut inner = self.inner.write();
        let cur_len = match inner.blocks.get(&id) {
            Some(BlockState::Memory(buf)) => buf.len() as u64,
            _ => return Err(ColonnadeError::Internal(format!("unknown cache id {id}"))),
        };
        let incoming = bytes.len() as u64;

        if cur_len + incoming > self.per_block_limit_bytes {
            return self.spill_locked(&mut inner, id, Some(bytes));
        }

        // Evict other in-memory blocks (ascending id order) until the
        // incoming write fits within the global budget.
        loop {
            if inner.memory_bytes + incoming <= self.budget_bytes {
                break;
            }
            let victim = inner
                .blocks
                .iter()
                .find(|(k, v)| **k != id && matches!(v, BlockState::Memory(_)))
                .map(|(k, _)| *k);
            match victim {
                Some(vid) => self.spill_locked(&mut inner, vid, None)?,
                None => return self.spill_locked(&mut inner, id, Some(bytes)),
            }
        }

        if let Some(BlockState::Memory(buf)) = inner.blocks.get_mut(&id) {
            buf.extend_from_slice(bytes);
            inner.memory_bytes += incoming;
        }
        Ok(())
    }

    pub fn read(&self, id: CacheId) -> ColonnadeResult<CacheRead<'_>> {
        let guard = self.inner.read();
        match guard.blocks.get(&id) {
            None => Err(ColonnadeError::Internal(format!("unknown cache id {id}"))),
            Some(BlockState::Spilled(path)) => {
                let path = path.clone();
                drop(guard);
                let f = File::open(&path).map_err(|e| ColonnadeError::io("open spilled cache block", e))?;
                Ok(CacheRead::Spilled(f))
            }
            Some(BlockState::Memory(_)) => {
                let mapped = RwLockReadGuard::map(guard, |inner| match inner.blocks.get(&id) {
                    Some(BlockState::Memory(buf)) => buf.as_slice(),
                    _ => unreachable!("checked above under the same lock epoch"),
                });
                Ok(CacheRead::Memory(mapped))
            }
        }
    }

    /// Spills the block if needed and returns a path to it.
    pub fn get_filename(&self, id: CacheId) -> ColonnadeResult<PathBuf> {
        let mut inner = self.inner.write();
        match inner.blocks.get(&id) {
            Some(BlockState::Spilled(path)) => Ok(path.clone()),
            Some(BlockState::Memory(_)) => {
                self.spill_locked(&mut inner, id, None)?;
                match inner.blocks.get(&id) {
                    Some(BlockState::Spilled(path)) => Ok(path.clone()),
                    _ => unreachable!(),
                }
            }
            None => Err(ColonnadeError::Internal(format!("unknown cache id {id}"))),
        }
    }

    /// Destroys the block and frees storage. Optional; callers may simply
    /// drop their last reference to the id.
    pub fn release(&self, id: CacheId) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.blocks.remove(&id) {
            match state {
                BlockState::Memory(buf) => {
                    inner.memory_bytes = inner.memory_bytes.saturating_sub(buf.len() as u64);
                }
                BlockState::Spilled(path) => {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }

    /// Bytes currently resident in memory across all blocks.
    pub fn memory_bytes(&self) -> u64 {
        self.inner.read().memory_bytes
    }

    fn spill_locked(&self, inner: &mut Inner, id: CacheId, incoming: Option<&[u8]>) -> ColonnadeResult<()> {
        let buf = match inner.blocks.remove(&id) {
            Some(BlockState::Memory(buf)) => buf,
            Some(other) => {
                inner.blocks.insert(id, other);
                return Ok(()); // already spilled, nothing to do
            }
            None => return Err(ColonnadeError::Internal(format!("unknown cache id {id}"))),
        };
        inner.memory_bytes = inner.memory_bytes.saturating_sub(buf.len() as u64);

        let path = self.temp.unique_path(&format!("cache-{id}"));
        let mut file = File::create(&path).map_err(|e| ColonnadeError::io("spill cache block", e))?;
        file.write_all(&buf).map_err(|e| ColonnadeError::io("spill cache block", e))?;
        if let Some(extra) = incoming {
            file.write_all(extra).map_err(|e| ColonnadeError::io("spill cache block", e))?;
        }
        inner.blocks.insert(id, BlockState::Spilled(path));
        tracing::debug!(cache_id = id, "spilled cache block to disk");
        Ok(())
    }

    fn append_file(&self, path: &std::path::Path, bytes: &[u8]) -> ColonnadeResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| ColonnadeError::io("append spilled cache block", e))?;
        file.write_all(bytes).map_err(|e| ColonnadeError::io("append spilled cache block", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn manager(budget: u64, per_block: u64) -> CacheManager {
        let dir = tempfile::tempdir().unwrap();
        let temp = Arc::new(TempRegistry::with_base(dir.path()).unwrap());
        std::mem::forget(dir); // keep the directory alive for the test
        CacheManager::new(temp, budget, per_block)
    }

    #[test]
    fn small_write_stays_in_memory() {
        let mgr = manager(1024, 1024);
        let id = mgr.new_cache();
        mgr.write(id, b"hello").unwrap();
        match mgr.read(id).unwrap() {
            CacheRead::Memory(slice) => assert_eq!(&*slice, b"hello"),
            CacheRead::Spilled(_) => panic!("expected memory"),
        }
    }

    #[test]
    fn spills_when_over_budget() {
        // 16-byte per-block limit, 32-byte write: must spill to disk.
        let mgr = manager(16, 1024);
        let id = mgr.new_cache();
        mgr.write(id, &vec![7u8; 32]).unwrap();

        let mut data = Vec::new();
        match mgr.read(id).unwrap() {
            CacheRead::Spilled(mut f) => f.read_to_end(&mut data).unwrap(),
            CacheRead::Memory(_) => panic!("expected spill"),
        };
        assert_eq!(data.len(), 32);
        assert_eq!(mgr.memory_bytes(), 0);

        let path = mgr.get_filename(id).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn spill_is_irreversible_and_subsequent_writes_go_to_disk() {
        let mgr = manager(8, 1024);
        let id = mgr.new_cache();
        mgr.write(id, &vec![1u8; 16]).unwrap();
        mgr.write(id, &vec![2u8; 4]).unwrap();

        let mut data = Vec::new();
        match mgr.read(id).unwrap() {
            CacheRead::Spilled(mut f) => f.read_to_end(&mut data).unwrap(),
            CacheRead::Memory(_) => panic!("expected spill to persist"),
        };
        assert_eq!(data.len(), 20);
    }

    #[test]
    fn eviction_scans_in_id_order() {
        let mgr = manager(20, 1024);
        let a = mgr.new_cache();
        let b = mgr.new_cache();
        mgr.write(a, &vec![1u8; 10]).unwrap();
        mgr.write(b, &vec![2u8; 10]).unwrap();
        // this write would push memory_bytes to 30 > budget 20, so `a`
        // (lower id) should be evicted first.
        let c = mgr.new_cache();
        mgr.write(c, &vec![3u8; 10]).unwrap();

        match mgr.read(a).unwrap() {
            CacheRead::Spilled(_) => {}
            CacheRead::Memory(_) => panic!("expected a to be evicted first"),
        }
        match mgr.read(b).unwrap() {
            CacheRead::Memory(_) => {}
            CacheRead::Spilled(_) => panic!("b should still be resident"),
        }
    }
}
