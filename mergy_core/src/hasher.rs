use mergy_common::{ContentDigest, MergyError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Read buffer for chunked hashing, independent of file size.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    mtime: SystemTime,
}

/// Cache observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Chunked BLAKE3 file fingerprinting with an in-memory cache keyed by
/// `(resolved path, mtime)`.
///
/// A hit returns the prior digest without touching the file. An mtime
/// change is treated as a new file and forces recomputation; content is
/// never re-verified against an unchanged mtime. The cache belongs to a
/// single hasher instance and is not synchronized; callers wanting
/// parallel hashing shard work across instances.
pub struct ContentHasher {
    cache: HashMap<PathBuf, (CacheKey, ContentDigest)>,
    hits: u64,
    misses: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Compute (or recall) the content fingerprint for a regular file.
    ///
    /// Non-existent paths, directories and special files, unreadable
    /// files, and mid-read failures each map to a distinct error kind;
    /// none of them leaves a stale cache entry behind.
    pub fn fingerprint(&mut self, path: &Path) -> Result<ContentDigest> {
        let resolved = fs::canonicalize(path).map_err(|e| MergyError::from_io(e, path))?;

        let metadata = fs::metadata(&resolved).map_err(|e| MergyError::from_io(e, path))?;
        if !metadata.is_file() {
            return Err(MergyError::NotAFile(path.display().to_string()));
        }
        let mtime = metadata
            .modified()
            .map_err(|e| MergyError::from_io(e, path))?;
        let key = CacheKey { mtime };

        if let Some((cached_key, digest)) = self.cache.get(&resolved) {
            if *cached_key == key {
                self.hits += 1;
                debug!(path = %resolved.display(), "hash cache hit");
                return Ok(*digest);
            }
        }

        self.misses += 1;
        let digest = match hash_file(&resolved) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(path = %resolved.display(), error = %e, "hashing failed");
                // A stale entry for the old mtime must not survive a
                // failed recomputation.
                self.cache.remove(&resolved);
                return Err(e);
            }
        };

        self.cache.insert(resolved, (key, digest));
        Ok(digest)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_file(path: &Path) -> Result<ContentDigest> {
    let mut file = fs::File::open(path).map_err(|e| MergyError::from_io(e, path))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| MergyError::from_io(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    #[test]
    fn fingerprints_distinguish_content() {
        let temp = TempDir::new().unwrap();
        let file1 = temp.path().join("a.txt");
        let file2 = temp.path().join("b.txt");
        let file3 = temp.path().join("c.txt");
        fs::write(&file1, b"identical content").unwrap();
        fs::write(&file2, b"identical content").unwrap();
        fs::write(&file3, b"different content").unwrap();

        let mut hasher = ContentHasher::new();
        let digest1 = hasher.fingerprint(&file1).unwrap();
        let digest2 = hasher.fingerprint(&file2).unwrap();
        let digest3 = hasher.fingerprint(&file3).unwrap();

        assert_eq!(digest1, digest2);
        assert_ne!(digest1, digest3);
    }

    #[test]
    fn unchanged_file_hits_cache() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("stable.txt");
        fs::write(&file, b"stable").unwrap();

        let mut hasher = ContentHasher::new();
        let first = hasher.fingerprint(&file).unwrap();
        let second = hasher.fingerprint(&file).unwrap();

        assert_eq!(first, second);
        let stats = hasher.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn mtime_change_forces_recomputation() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("touched.txt");
        fs::write(&file, b"before").unwrap();

        let mut hasher = ContentHasher::new();
        let before = hasher.fingerprint(&file).unwrap();

        fs::write(&file, b"after!").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();

        let after = hasher.fingerprint(&file).unwrap();
        assert_ne!(before, after);
        assert_eq!(hasher.stats().misses, 2);
        assert_eq!(hasher.stats().entries, 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let mut hasher = ContentHasher::new();
        let err = hasher.fingerprint(&temp.path().join("ghost.txt")).unwrap_err();
        assert!(matches!(err, MergyError::NotFound(_)));
        assert_eq!(hasher.stats().entries, 0);
    }

    #[test]
    fn directory_is_not_a_file() {
        let temp = TempDir::new().unwrap();
        let mut hasher = ContentHasher::new();
        let err = hasher.fingerprint(temp.path()).unwrap_err();
        assert!(matches!(err, MergyError::NotAFile(_)));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = temp.path().join("locked.txt");
        fs::write(&file, b"secret").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o000)).unwrap();

        let mut hasher = ContentHasher::new();
        let result = hasher.fingerprint(&file);

        // Restore before asserting so TempDir cleanup always succeeds
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        // Root bypasses permission bits entirely
        if let Err(err) = result {
            assert!(matches!(err, MergyError::PermissionDenied(_)));
            assert_eq!(hasher.stats().entries, 0);
        }
    }

    #[test]
    fn clear_resets_cache_and_counters() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("data.txt");
        fs::write(&file, b"data").unwrap();

        let mut hasher = ContentHasher::new();
        hasher.fingerprint(&file).unwrap();
        hasher.fingerprint(&file).unwrap();
        hasher.clear();

        assert_eq!(hasher.stats(), CacheStats::default());
        hasher.fingerprint(&file).unwrap();
        assert_eq!(hasher.stats().misses, 1);
    }

    #[test]
    fn large_file_hashes_in_chunks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("big.bin");
        let payload = vec![0x5au8; CHUNK_SIZE * 3 + 17];
        fs::write(&file, &payload).unwrap();

        let mut hasher = ContentHasher::new();
        let digest = hasher.fingerprint(&file).unwrap();
        assert_eq!(
            digest,
            ContentDigest(*blake3::hash(&payload).as_bytes())
        );
    }
}
