//! Cross-process advisory file locks.
//!
//! The lock is taken on the data file itself, so a holder reads and rewrites
//! the file through the same handle it locked. Files are truncated and
//! rewritten in place, never renamed over, because renaming would detach the
//! lock from the path other processes open.

use crate::error::{CatalogError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// An advisory lock held on an open file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Open (creating if needed) and exclusively lock `path`.
    ///
    /// `timeout` of `None` blocks until the lock is granted.
    pub fn acquire_exclusive(path: &Path, timeout: Option<Duration>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CatalogError::io("create directory", parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CatalogError::io("open", path, e))?;

        lock_file(&file, path, LockMode::Exclusive, timeout)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode: LockMode::Exclusive,
        })
    }

    /// Open and share-lock `path`. Returns `None` when the file does not exist.
    pub fn acquire_shared(path: &Path, timeout: Option<Duration>) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CatalogError::io("open", path, e)),
        };

        lock_file(&file, path, LockMode::Shared, timeout)?;
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
            mode: LockMode::Shared,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Read the whole file from the start through the locked handle.
    pub fn read_to_string(&mut self) -> Result<String> {
        let mut content = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut content))
            .map_err(|e| CatalogError::io("read", &self.path, e))?;
        Ok(content)
    }

    /// Truncate the file and write `bytes` through the locked handle.
    pub fn rewrite(&mut self, bytes: &[u8]) -> Result<()> {
        if self.mode != LockMode::Exclusive {
            return Err(CatalogError::NotLocked {
                operation: "write through a shared lock",
            });
        }
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(bytes))
            .and_then(|_| self.file.sync_data())
            .map_err(|e| CatalogError::io("write", &self.path, e))
    }

    /// Release the lock now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), mode = ?self.mode, "released file lock");
    }
}

fn lock_file(file: &File, path: &Path, mode: LockMode, timeout: Option<Duration>) -> Result<()> {
    let Some(limit) = timeout else {
        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(file),
            LockMode::Exclusive => FileExt::lock_exclusive(file),
        };
        locked.map_err(|e| CatalogError::io("lock", path, e))?;
        debug!(path = %path.display(), ?mode, "acquired file lock");
        return Ok(());
    };

    let start = Instant::now();
    loop {
        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(file),
        };
        match attempt {
            Ok(()) => {
                debug!(
                    path = %path.display(),
                    ?mode,
                    waited = ?start.elapsed(),
                    "acquired file lock"
                );
                return Ok(());
            }
            Err(e) if is_contended(&e) => {
                let waited = start.elapsed();
                if waited >= limit {
                    return Err(CatalogError::LockTimeout {
                        path: path.to_path_buf(),
                        waited,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(CatalogError::io("lock", path, e)),
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    matches!(
        (err.raw_os_error(), fs2::lock_contended_error().raw_os_error()),
        (Some(actual), Some(contended)) if actual == contended
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_creates_file_and_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data.yaml");

        let lock = FileLock::acquire_exclusive(&path, None).unwrap();
        assert!(path.exists());
        assert_eq!(lock.mode(), LockMode::Exclusive);
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    fn test_shared_on_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::acquire_shared(&dir.path().join("absent.yaml"), None).unwrap();
        assert!(lock.is_none());
    }

    #[test]
    fn test_contended_exclusive_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.yaml");

        let _held = FileLock::acquire_exclusive(&path, None).unwrap();
        let err = FileLock::acquire_exclusive(&path, Some(Duration::from_millis(100))).unwrap_err();
        assert!(matches!(err, CatalogError::LockTimeout { .. }), "got {err}");
    }

    #[test]
    fn test_release_allows_reacquire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.yaml");

        let held = FileLock::acquire_exclusive(&path, None).unwrap();
        held.release();
        let again = FileLock::acquire_exclusive(&path, Some(Duration::from_millis(100)));
        assert!(again.is_ok());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.yaml");
        fs::write(&path, "x").unwrap();

        let first = FileLock::acquire_shared(&path, Some(Duration::from_millis(100))).unwrap();
        let second = FileLock::acquire_shared(&path, Some(Duration::from_millis(100))).unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
    }

    #[test]
    fn test_rewrite_truncates_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.yaml");
        fs::write(&path, "a much longer original body").unwrap();

        let mut lock = FileLock::acquire_exclusive(&path, None).unwrap();
        lock.rewrite(b"short").unwrap();
        assert_eq!(lock.read_to_string().unwrap(), "short");
        drop(lock);
        assert_eq!(fs::read_to_string(&path).unwrap(), "short");
    }

    #[test]
    fn test_rewrite_rejected_under_shared_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.yaml");
        fs::write(&path, "x").unwrap();

        let mut lock = FileLock::acquire_shared(&path, None).unwrap().unwrap();
        assert!(matches!(
            lock.rewrite(b"y"),
            Err(CatalogError::NotLocked { .. })
        ));
    }
}
