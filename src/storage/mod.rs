//! Audio file storage
//!
//! One storage abstraction with the capability set the rest of the system
//! needs (exists / open-for-write / write-chunk / close / remove / list),
//! selected by composition rather than conditional compilation. The
//! directory-backed implementation stands in for a mounted flash partition
//! and enforces a byte quota so free-space accounting behaves like one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::error::StorageError;

/// Open destination for a chunked write
pub trait StorageWriter: Send {
    /// Append one chunk at the current write offset
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError>;

    /// Flush buffered writes to stable storage and close the destination
    fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// Storage backend capability set
pub trait Storage: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    /// Open `name` for writing, discarding any existing file of that name
    fn open_write(&self, name: &str) -> Result<Box<dyn StorageWriter>, StorageError>;

    fn open_read(&self, name: &str) -> Result<File, StorageError>;

    fn remove(&self, name: &str);

    /// Comma-joined list of stored audio files (`.mp3` / `.wav`)
    fn list_audio_files(&self) -> String;

    /// Size of a stored file, 0 when absent
    fn file_size(&self, name: &str) -> u64;

    /// Remaining quota in bytes
    fn free_bytes(&self) -> u64;
}

/// Directory-backed storage with a byte quota
pub struct DirStorage {
    root: PathBuf,
    quota: u64,
    flush_interval: usize,
}

impl DirStorage {
    /// Create the store, making the root directory if needed.
    /// Failure here is fatal to subsystem startup (the mount analog).
    pub fn new(root: impl Into<PathBuf>, quota: u64, flush_interval: usize) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StorageError::RootUnavailable(format!("{}: {}", root.display(), e)))?;

        tracing::info!(
            "Storage ready at {} (quota {} bytes)",
            root.display(),
            quota
        );

        Ok(Self {
            root,
            quota,
            flush_interval,
        })
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let name = sanitize_name(name)?;
        Ok(self.root.join(name))
    }

    fn used_bytes(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

impl Storage for DirStorage {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn open_write(&self, name: &str) -> Result<Box<dyn StorageWriter>, StorageError> {
        let path = self.resolve(name)?;

        // Start fresh: a re-upload replaces the old file entirely
        if path.exists() {
            let _ = fs::remove_file(&path);
            tracing::debug!("Removed stale file {}", path.display());
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                tracing::warn!("Open for write failed: {}: {}", path.display(), e);
                StorageError::OpenFailed(name.to_string())
            })?;

        Ok(Box::new(DirWriter {
            file,
            path,
            budget: self.free_bytes(),
            bytes_since_flush: 0,
            flush_interval: self.flush_interval,
        }))
    }

    fn open_read(&self, name: &str) -> Result<File, StorageError> {
        let path = self.resolve(name)?;
        File::open(&path).map_err(|_| StorageError::ReadFailed(name.to_string()))
    }

    fn remove(&self, name: &str) {
        if let Ok(path) = self.resolve(name) {
            let _ = fs::remove_file(path);
        }
    }

    fn list_audio_files(&self) -> String {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return String::new();
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| is_audio_file(n))
            .collect();
        names.sort();
        names.join(",")
    }

    fn file_size(&self, name: &str) -> u64 {
        self.resolve(name)
            .ok()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn free_bytes(&self) -> u64 {
        self.quota.saturating_sub(self.used_bytes())
    }
}

struct DirWriter {
    file: File,
    path: PathBuf,
    budget: u64,
    bytes_since_flush: usize,
    flush_interval: usize,
}

impl StorageWriter for DirWriter {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if (data.len() as u64) > self.budget {
            return Err(StorageError::Full {
                needed: data.len() as u64,
                free: self.budget,
            });
        }

        self.file
            .write_all(data)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", self.path.display(), e)))?;

        self.budget -= data.len() as u64;
        self.bytes_since_flush += data.len();

        // Write-through every flush_interval bytes, not every chunk
        if self.bytes_since_flush >= self.flush_interval {
            self.file
                .sync_data()
                .map_err(|e| StorageError::WriteFailed(format!("flush: {}", e)))?;
            self.bytes_since_flush = 0;
            tracing::debug!("Auto-flush of {}", self.path.display());
        }

        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::WriteFailed(format!("close: {}", e)))?;
        tracing::info!("Closed {}", self.path.display());
        Ok(())
    }
}

/// Reduce a client-supplied name to a bare file name
fn sanitize_name(name: &str) -> Result<&str, StorageError> {
    let name = name.trim_start_matches('/');
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(base)
}

fn is_audio_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".mp3") || lower.ends_with(".wav")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(quota: u64) -> DirStorage {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);

        let dir = std::env::temp_dir().join(format!(
            "smartalarm-storage-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&dir);
        DirStorage::new(dir, quota, 1024).unwrap()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let store = temp_store(10_000);

        let mut writer = store.open_write("sound.mp3").unwrap();
        writer.write_chunk(b"hello ").unwrap();
        writer.write_chunk(b"world").unwrap();
        writer.close().unwrap();

        assert!(store.exists("sound.mp3"));
        assert_eq!(store.file_size("sound.mp3"), 11);

        let mut contents = String::new();
        use std::io::Read;
        store
            .open_read("sound.mp3")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn test_open_write_discards_old_file() {
        let store = temp_store(20_000);

        let mut w = store.open_write("a.wav").unwrap();
        w.write_chunk(&[0u8; 100]).unwrap();
        w.close().unwrap();

        let w = store.open_write("a.wav").unwrap();
        w.close().unwrap();

        assert_eq!(store.file_size("a.wav"), 0);
    }

    #[test]
    fn test_quota_enforced() {
        let store = temp_store(64);

        let mut w = store.open_write("big.mp3").unwrap();
        w.write_chunk(&[0u8; 60]).unwrap();
        let err = w.write_chunk(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, StorageError::Full { .. }));
    }

    #[test]
    fn test_free_bytes_accounting() {
        let store = temp_store(1000);
        assert_eq!(store.free_bytes(), 1000);

        let mut w = store.open_write("x.mp3").unwrap();
        w.write_chunk(&[0u8; 300]).unwrap();
        w.close().unwrap();

        assert_eq!(store.free_bytes(), 700);
    }

    #[test]
    fn test_list_audio_files_filters_extensions() {
        let store = temp_store(10_000);

        for name in ["b.mp3", "a.wav", "notes.txt"] {
            let w = store.open_write(name).unwrap();
            w.close().unwrap();
        }

        assert_eq!(store.list_audio_files(), "a.wav,b.mp3");
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_name("../../etc/passwd").is_ok());
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "passwd");
        assert!(sanitize_name("..").is_err());
        assert!(sanitize_name("/").is_err());
        assert_eq!(sanitize_name("/sound.mp3").unwrap(), "sound.mp3");
    }
}
