//! Destination-scoped run lock.
//!
//! Two runs against the same destination must not overlap. Each destination
//! maps to one lock file, named after a hash of its canonical path:
//!
//! ```text
//! <lock_dir>/
//! └─ snapcycle-<16 hex digits>.lock
//! ```
//!
//! Runs against different destinations use different lock files and never
//! block each other.

use crate::error::{SnapError, SnapResult};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An exclusive advisory lock on a destination.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct DestinationLock {
    path: PathBuf,
    _lock_file: File,
}

impl DestinationLock {
    /// Acquires the lock, waiting for as long as another run holds it.
    pub fn acquire(lock_dir: &Path, destination: &Path) -> SnapResult<Self> {
        let (path, file) = open_lock_file(lock_dir, destination)?;
        debug!(lock = %path.display(), "waiting for destination lock");
        file.lock_exclusive()?;
        debug!(lock = %path.display(), "destination lock acquired");
        Ok(Self {
            path,
            _lock_file: file,
        })
    }

    /// Acquires the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another run holds the lock.
    pub fn try_acquire(lock_dir: &Path, destination: &Path) -> SnapResult<Self> {
        let (path, file) = open_lock_file(lock_dir, destination)?;
        if file.try_lock_exclusive().is_err() {
            return Err(SnapError::Locked {
                destination: destination.to_path_buf(),
            });
        }
        Ok(Self {
            path,
            _lock_file: file,
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns the lock file name for a destination.
///
/// The destination is canonicalized first so that different spellings of
/// the same directory share a lock.
pub fn lock_file_name(destination: &Path) -> SnapResult<String> {
    let canonical = fs::canonicalize(destination)?;
    let digest = Sha256::digest(canonical.as_os_str().as_encoded_bytes());
    let mut name = String::from("snapcycle-");
    for byte in &digest[..8] {
        let _ = write!(name, "{byte:02x}");
    }
    name.push_str(".lock");
    Ok(name)
}

fn open_lock_file(lock_dir: &Path, destination: &Path) -> SnapResult<(PathBuf, File)> {
    fs::create_dir_all(lock_dir)?;
    let path = lock_dir.join(lock_file_name(destination)?);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    Ok((path, file))
}
