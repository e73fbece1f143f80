//! Binary object store for file content.
//!
//! Incoming content is written to a temporary sink first and only moved
//! to its final relative path once complete, so a reader never observes
//! a partially transferred file.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// A temporary destination for file content.
pub trait BinarySink: Send {
    /// Appends bytes to the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be written.
    fn append(&mut self, bytes: &[u8]) -> StoreResult<()>;

    /// Number of bytes appended so far.
    fn written(&self) -> u64;

    /// Moves the content to its final relative path, replacing any
    /// previous content there.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the move fails.
    fn finalize(self: Box<Self>, path: &str) -> StoreResult<()>;
}

/// Stores file content addressed by relative path.
pub trait BinaryStore: Send + Sync {
    /// Opens a new temporary sink.
    ///
    /// # Errors
    ///
    /// Returns an error if no temporary storage is available.
    fn open_temp(&self) -> StoreResult<Box<dyn BinarySink>>;

    /// Opens stored content for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or nothing is stored there.
    fn open_read(&self, path: &str) -> StoreResult<Box<dyn Read + Send>>;
}

/// Checks that `path` is relative and stays below the store root.
fn validate_relative(path: &str) -> StoreResult<PathBuf> {
    let candidate = Path::new(path);
    if path.is_empty() {
        return Err(StoreError::InvalidPath("empty path".into()));
    }
    if !candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(candidate.to_path_buf())
}

/// File content stored below a root directory.
#[derive(Debug, Clone)]
pub struct FsBinaryStore {
    root: PathBuf,
}

impl FsBinaryStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a relative path below the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the path would escape the root.
    pub fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join(validate_relative(path)?))
    }
}

impl BinaryStore for FsBinaryStore {
    fn open_temp(&self) -> StoreResult<Box<dyn BinarySink>> {
        let file = NamedTempFile::new_in(&self.root)?;
        Ok(Box::new(FsSink {
            file,
            written: 0,
            root: self.root.clone(),
        }))
    }

    fn open_read(&self, path: &str) -> StoreResult<Box<dyn Read + Send>> {
        let full = self.resolve(path)?;
        match File::open(&full) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("file {path}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct FsSink {
    file: NamedTempFile,
    written: u64,
    root: PathBuf,
}

impl BinarySink for FsSink {
    fn append(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }

    fn finalize(self: Box<Self>, path: &str) -> StoreResult<()> {
        let target = self.root.join(validate_relative(path)?);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.file.as_file().sync_all()?;
        self.file
            .persist(&target)
            .map_err(|e| StoreError::Io(e.error))?;
        debug!(path = %target.display(), bytes = self.written, "finalized file content");
        Ok(())
    }
}

/// File content held in memory, for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryBinaryStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBinaryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores content at `path` directly.
    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.files.write().insert(path.to_string(), bytes);
    }

    /// Returns the content stored at `path`.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    /// Returns the number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl BinaryStore for MemoryBinaryStore {
    fn open_temp(&self) -> StoreResult<Box<dyn BinarySink>> {
        Ok(Box::new(MemorySink {
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn open_read(&self, path: &str) -> StoreResult<Box<dyn Read + Send>> {
        validate_relative(path)?;
        let bytes = self
            .get(path)
            .ok_or_else(|| StoreError::NotFound(format!("file {path}")))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

struct MemorySink {
    buffer: Vec<u8>,
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl BinarySink for MemorySink {
    fn append(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn written(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn finalize(self: Box<Self>, path: &str) -> StoreResult<()> {
        validate_relative(path)?;
        let this = *self;
        this.files.write().insert(path.to_string(), this.buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_escaping_paths() {
        assert!(validate_relative("a/b.txt").is_ok());
        assert!(validate_relative("./a.txt").is_ok());
        assert!(validate_relative("").is_err());
        assert!(validate_relative("../a.txt").is_err());
        assert!(validate_relative("a/../../b").is_err());
        assert!(validate_relative("/etc/passwd").is_err());
    }

    #[test]
    fn fs_sink_finalizes_at_path() {
        let dir = tempdir().unwrap();
        let store = FsBinaryStore::open(dir.path()).unwrap();

        let mut sink = store.open_temp().unwrap();
        sink.append(b"hello ").unwrap();
        sink.append(b"world").unwrap();
        assert_eq!(sink.written(), 11);
        sink.finalize("docs/greeting.txt").unwrap();

        let content = std::fs::read(dir.path().join("docs/greeting.txt")).unwrap();
        assert_eq!(content, b"hello world");

        let mut read_back = Vec::new();
        store
            .open_read("docs/greeting.txt")
            .unwrap()
            .read_to_end(&mut read_back)
            .unwrap();
        assert_eq!(read_back, b"hello world");
    }

    #[test]
    fn fs_sink_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FsBinaryStore::open(&dir.path().join("files")).unwrap();

        let mut sink = store.open_temp().unwrap();
        sink.append(b"x").unwrap();
        let result = sink.finalize("../outside.txt");
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn fs_read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsBinaryStore::open(dir.path()).unwrap();
        let result = store.open_read("missing.bin");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn abandoned_sink_leaves_nothing() {
        let dir = tempdir().unwrap();
        let store = FsBinaryStore::open(dir.path()).unwrap();
        {
            let mut sink = store.open_temp().unwrap();
            sink.append(b"partial").unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryBinaryStore::new();
        let mut sink = store.open_temp().unwrap();
        sink.append(&[1, 2, 3]).unwrap();
        sink.finalize("a.bin").unwrap();

        assert_eq!(store.get("a.bin"), Some(vec![1, 2, 3]));
        assert_eq!(store.len(), 1);

        let mut buf = Vec::new();
        store.open_read("a.bin").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3]);
    }
}
