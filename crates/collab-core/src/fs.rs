//! FileSystem trait abstraction for the revision store.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in collab-daemon) - Uses tokio::fs
//!
//! Paths are `/`-separated and relative to the store root.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Modification time in nanoseconds since epoch (or a logical clock for `InMemoryFs`)
    pub mtime_nanos: u128,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;
}

/// In-memory filesystem for testing.
///
/// Modification times come from a logical clock, so every write is strictly
/// newer than the one before it.
pub struct InMemoryFs {
    files: RwLock<HashMap<String, (Vec<u8>, u128)>>,
    dirs: RwLock<HashSet<String>>,
    clock: AtomicU64,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            clock: AtomicU64::new(1),
        }
    }

    fn tick(&self) -> u128 {
        u128::from(self.clock.fetch_add(1, Ordering::SeqCst))
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            match normalized.rfind('/') {
                Some(pos) => Some(normalized[..pos].to_string()),
                None => Some(String::new()),
            }
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .map(|(content, _)| content.clone())
            .ok_or(FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);

        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir(&parent).await?;
        }

        let mtime = self.tick();
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path, (content.to_vec(), mtime));
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if !dirs.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let mut entries = Vec::new();

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        for file_path in files.keys() {
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    });
                }
            }
        }

        for dir_path in dirs.iter() {
            if let Some(rest) = dir_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: true,
                    });
                }
            }
        }

        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        if let Some((_, mtime)) = files.get(&path) {
            return Ok(FileStat {
                mtime_nanos: *mtime,
                is_dir: false,
            });
        }

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if dirs.contains(&path) {
            return Ok(FileStat {
                mtime_nanos: 0,
                is_dir: true,
            });
        }

        Err(FsError::NotFound(path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let mut path = Self::normalize_path(path);
        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
        // Insert the directory and every missing ancestor.
        while !path.is_empty() && dirs.insert(path.clone()) {
            path = Self::parent_path(&path).unwrap_or_default();
        }
        Ok(())
    }
}

/// Filesystem whose writes always fail.
#[cfg(test)]
pub(crate) struct ReadOnlyFs(pub(crate) InMemoryFs);

#[cfg(test)]
#[async_trait]
impl FileSystem for ReadOnlyFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.0.read(path).await
    }
    async fn write(&self, _path: &str, _content: &[u8]) -> Result<()> {
        Err(FsError::Io("read-only filesystem".into()))
    }
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.0.list(path).await
    }
    async fn exists(&self, path: &str) -> Result<bool> {
        self.0.exists(path).await
    }
    async fn stat(&self, path: &str) -> Result<FileStat> {
        self.0.stat(path).await
    }
    async fn mkdir(&self, path: &str) -> Result<()> {
        self.0.mkdir(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("test.txt", b"hello world").await.unwrap();

        let content = fs.read("test.txt").await.unwrap();
        assert_eq!(content, b"hello world");

        assert!(fs.exists("test.txt").await.unwrap());
        assert!(!fs.exists("nonexistent.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_fs_write_creates_parents() {
        let fs = InMemoryFs::new();

        fs.write("a/b/c.txt", b"content").await.unwrap();

        assert!(fs.exists("a").await.unwrap());
        assert!(fs.exists("a/b").await.unwrap());
        assert!(fs.stat("a/b").await.unwrap().is_dir);

        let entries = fs.list("a/b").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "c.txt");
        assert!(!entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_inmemory_fs_list_missing_dir() {
        let fs = InMemoryFs::new();
        assert!(matches!(fs.list("nope").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inmemory_fs_mtime_strictly_increases() {
        let fs = InMemoryFs::new();

        fs.write("x", b"1").await.unwrap();
        let first = fs.stat("x").await.unwrap().mtime_nanos;
        fs.write("y", b"2").await.unwrap();
        fs.write("x", b"1").await.unwrap();
        let rewritten = fs.stat("x").await.unwrap().mtime_nanos;
        let other = fs.stat("y").await.unwrap().mtime_nanos;

        assert!(first < other);
        assert!(other < rewritten);
    }
}
