//! Store file layout and locking.
//!
//! A record store is a single data file plus two siblings derived from its
//! path:
//!
//! ```text
//! <path>        # record data: count header + (index entry, payload) pairs
//! <path>.wal    # write-ahead log of pre-images
//! <path>.lock   # advisory lock for single-writer access
//! ```
//!
//! The lock file ensures only one process can write to the store at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Suffix of the write-ahead log file.
const WAL_SUFFIX: &str = ".wal";
/// Suffix of the lock file.
const LOCK_SUFFIX: &str = ".lock";

/// Resolves the sibling files of a store and holds its exclusive lock.
///
/// # Thread Safety
///
/// `StorePaths` holds an exclusive advisory lock for the data file.
/// Only one instance can exist per store path at a time, across processes.
#[derive(Debug)]
pub struct StorePaths {
    /// Path to the data file.
    data: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl StorePaths {
    /// Resolves the store's file paths and acquires the exclusive lock.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the data file
    /// * `create_if_missing` - If true, creates missing parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The data file doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn acquire(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() && !create_if_missing {
            return Err(CoreError::invalid_format(format!(
                "store does not exist: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if create_if_missing {
                    fs::create_dir_all(parent)?;
                } else {
                    return Err(CoreError::invalid_format(format!(
                        "store directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        let lock_path = with_suffix(path, LOCK_SUFFIX);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Non-blocking: a held lock means another live store instance.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            data: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the data file.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data
    }

    /// Returns the path to the write-ahead log file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        with_suffix(&self.data, WAL_SUFFIX)
    }
}

/// Appends a suffix to the full file name (`records.db` -> `records.db.wal`).
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
