//! In-process dataset cache, keyed by path and validated by file signature.
//!
//! An entry is only served when the file's current size and modification time
//! both equal the stored signature. A mismatch is simply a miss; nothing is ever
//! evicted, so the cache grows for the lifetime of the process.
//!
//! The cache itself is not synchronised: the job manager keeps it behind the
//! same lock as its job table.

use crate::collector::Dataset;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Cheap freshness proxy for a file: size plus modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// Length in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileSignature {
    /// Reads the signature from file metadata.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }
}

#[derive(Debug, Clone)]
struct Entry {
    signature: FileSignature,
    dataset: Arc<Dataset>,
}

/// `path -> (signature, dataset)`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<PathBuf, Entry>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the dataset only on an exact signature match.
    pub fn get(&self, path: &Path, signature: &FileSignature) -> Option<Arc<Dataset>> {
        self.entries
            .get(path)
            .filter(|entry| entry.signature == *signature)
            .map(|entry| Arc::clone(&entry.dataset))
    }

    /// Stores (or overwrites) the dataset for `path`.
    pub fn insert(&mut self, path: PathBuf, signature: FileSignature, dataset: Arc<Dataset>) {
        self.entries.insert(path, Entry { signature, dataset });
    }

    /// Number of cached paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first insert.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn signature(size: u64, secs: u64) -> FileSignature {
        FileSignature {
            size,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn exact_signature_hits() {
        let mut cache = MemoryCache::new();
        let path = PathBuf::from("lot.stdf");
        cache.insert(path.clone(), signature(10, 100), Arc::new(Dataset::default()));
        assert!(cache.get(&path, &signature(10, 100)).is_some());
    }

    #[test]
    fn changed_mtime_or_size_misses() {
        let mut cache = MemoryCache::new();
        let path = PathBuf::from("lot.stdf");
        cache.insert(path.clone(), signature(10, 100), Arc::new(Dataset::default()));
        assert!(cache.get(&path, &signature(10, 101)).is_none());
        assert!(cache.get(&path, &signature(11, 100)).is_none());
        // A miss does not evict.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn signature_reads_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.stdf");
        std::fs::write(&path, b"12345").unwrap();
        let sig = FileSignature::of(&path).unwrap();
        assert_eq!(sig.size, 5);
        assert!(FileSignature::of(&dir.path().join("missing")).is_err());
    }
}
