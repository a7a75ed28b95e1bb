//! Disk-backed store for converted symcache files.
//!
//! Entries are keyed by `"{debug_filename}/{DEBUG_ID}.symc"` and live as
//! individual files under the cache root. Each file starts with the module
//! filename (the parser may pick a PE name that differs from the debug
//! filename), followed by the zstd-compressed symcache bytes:
//!
//! ```text
//! [u32 le filename length][filename][zstd(symcache)]
//! ```
//!
//! Writes go through a temporary file in the same directory and are persisted
//! atomically, so concurrent writers for the same key are last-writer-wins
//! with byte-identical payloads. An in-memory LRU index tracks per-entry
//! sizes and evicts the least recently used files once the configured size
//! limit is exceeded. Hits touch the file mtime, which is what seeds the
//! recency order when the index is rebuilt after a restart.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use lru::LruCache;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

/// A cached symcache together with its module filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub symcache: Vec<u8>,
    pub filename: String,
}

struct CacheIndex {
    entries: LruCache<String, u64>,
    total_size: u64,
}

pub struct DiskCache {
    root: PathBuf,
    max_size: u64,
    index: Mutex<CacheIndex>,
}

impl DiskCache {
    /// Opens the cache at `root`, creating the directory if necessary and
    /// indexing any entries left behind by a previous run.
    pub fn new<P: AsRef<Path>>(root: P, max_size: u64) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut existing = Vec::new();
        for entry in walkdir::WalkDir::new(&root) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(io::Error::from)?;
            let key = match entry.path().strip_prefix(&root) {
                Ok(relative) => relative.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            existing.push((FileTime::from_last_modification_time(&metadata), key, metadata.len()));
        }

        // oldest first, so the LRU order matches the on-disk mtimes
        existing.sort();

        let mut index = CacheIndex {
            entries: LruCache::unbounded(),
            total_size: 0,
        };
        for (_, key, size) in existing {
            index.total_size += size;
            index.entries.put(key, size);
        }

        let cache = Self {
            root,
            max_size,
            index: Mutex::new(index),
        };
        cache.enforce_size_limit();
        Ok(cache)
    }

    /// Fetches an entry. Returns `Ok(None)` for a plain miss; IO failures
    /// other than a missing file are reported to the caller.
    pub fn get(&self, key: &str) -> io::Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let entry = decode_entry(&data)?;

        // refresh recency in the index and on disk
        filetime::set_file_mtime(&path, FileTime::now()).ok();
        let mut index = self.index.lock();
        if index.entries.get(&key.to_owned()).is_none() {
            // written by another process since our last scan
            index.total_size += data.len() as u64;
            index.entries.put(key.to_owned(), data.len() as u64);
        }

        Ok(Some(entry))
    }

    /// Stores an entry, evicting least recently used files if the cache
    /// grows beyond its size limit.
    pub fn set(&self, key: &str, entry: CacheEntry) -> io::Result<()> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = encode_entry(&entry)?;
        let size = data.len() as u64;

        let mut file = NamedTempFile::new_in(&self.root)?;
        file.write_all(&data)?;
        file.persist(&path).map_err(|err| err.error)?;

        let mut index = self.index.lock();
        if let Some(old_size) = index.entries.put(key.to_owned(), size) {
            index.total_size -= old_size;
        }
        index.total_size += size;
        drop(index);

        self.enforce_size_limit();
        Ok(())
    }

    /// Removes least recently used entries until the cache fits its limit.
    /// Also exposed through the `cleanup` CLI command.
    pub fn enforce_size_limit(&self) {
        let mut index = self.index.lock();
        while index.total_size > self.max_size {
            let (key, size) = match index.entries.pop_lru() {
                Some(evicted) => evicted,
                None => break,
            };
            index.total_size -= size;
            let path = self.entry_path(&key);
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("failed to evict cache entry {}: {}", key, err);
                }
            }
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn encode_entry(entry: &CacheEntry) -> io::Result<Vec<u8>> {
    let compressed = zstd::encode_all(entry.symcache.as_slice(), 0)?;
    let mut data = Vec::with_capacity(4 + entry.filename.len() + compressed.len());
    data.extend_from_slice(&(entry.filename.len() as u32).to_le_bytes());
    data.extend_from_slice(entry.filename.as_bytes());
    data.extend_from_slice(&compressed);
    Ok(data)
}

fn decode_entry(data: &[u8]) -> io::Result<CacheEntry> {
    let malformed = || io::Error::new(io::ErrorKind::InvalidData, "malformed cache entry");

    let header = data.get(..4).ok_or_else(malformed)?;
    let name_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let name_end = 4usize.checked_add(name_len).ok_or_else(malformed)?;
    let name = data.get(4..name_end).ok_or_else(malformed)?;
    let filename = std::str::from_utf8(name).map_err(|_| malformed())?.to_owned();
    let symcache = zstd::decode_all(data.get(name_end..).ok_or_else(malformed)?)?;

    Ok(CacheEntry { symcache, filename })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(payload: &[u8], filename: &str) -> CacheEntry {
        CacheEntry {
            symcache: payload.to_vec(),
            filename: filename.to_owned(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 1024 * 1024).unwrap();

        let stored = entry(b"symcache bytes", "xul.dll");
        cache.set("xul.pdb/ABCDEF.symc", stored.clone()).unwrap();

        let loaded = cache.get("xul.pdb/ABCDEF.symc").unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn test_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(cache.get("libxul.so/AAAA.symc").unwrap(), None);
    }

    #[test]
    fn test_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path(), 1024 * 1024).unwrap();

        cache.set("a/1.symc", entry(b"first", "a")).unwrap();
        cache.set("a/1.symc", entry(b"second", "a")).unwrap();

        let loaded = cache.get("a/1.symc").unwrap().unwrap();
        assert_eq!(loaded.symcache, b"second");
    }

    /// Bytes that zstd cannot meaningfully compress.
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545f4914f6cdd1du64;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_eviction_under_size_pressure() {
        let dir = tempfile::tempdir().unwrap();
        // fits one ~400 byte entry but not two
        let cache = DiskCache::new(dir.path(), 600).unwrap();

        cache.set("a/1.symc", entry(&noise(400), "a")).unwrap();
        cache.set("b/2.symc", entry(&noise(400), "b")).unwrap();

        // the older entry must have been evicted, the newer one kept
        assert_eq!(cache.get("a/1.symc").unwrap(), None);
        assert!(cache.get("b/2.symc").unwrap().is_some());
    }

    #[test]
    fn test_reopen_indexes_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskCache::new(dir.path(), 1024 * 1024).unwrap();
            cache.set("a/1.symc", entry(b"persisted", "a")).unwrap();
        }

        let cache = DiskCache::new(dir.path(), 1024 * 1024).unwrap();
        let loaded = cache.get("a/1.symc").unwrap().unwrap();
        assert_eq!(loaded.symcache, b"persisted");
    }
}
