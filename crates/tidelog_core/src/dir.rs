//! Store directory management.
//!
//! This module handles the file system layout of a log store:
//!
//! ```text
//! <store>/
//! ├─ LOCK                      # Advisory lock for single-process access
//! └─ <topic>/
//!    ├─ TOPIC                  # Topic manifest
//!    └─ partition-<id>/        # Segment files of one partition
//! ```
//!
//! The LOCK file ensures only one process opens the store at a time.

use crate::error::{CoreError, CoreResult};
use crate::manifest::TopicManifest;
use crate::types::PartitionId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// File names within the store directory.
const LOCK_FILE: &str = "LOCK";
const TOPIC_MANIFEST_FILE: &str = "TOPIC";
/// Suffix for temporary files written by [`write_atomic`].
const TEMP_SUFFIX: &str = ".tmp";

/// Manages the store directory structure and file locking.
///
/// The `StoreDir` holds an exclusive lock on the store directory for its
/// whole lifetime. Dropping it releases the lock.
#[derive(Debug)]
pub struct StoreDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory of a topic.
    #[must_use]
    pub fn topic_dir(&self, topic: &str) -> PathBuf {
        self.path.join(topic)
    }

    /// Returns the directory of one partition.
    #[must_use]
    pub fn partition_dir(&self, topic: &str, partition: PartitionId) -> PathBuf {
        self.topic_dir(topic).join(partition.to_string())
    }

    /// Returns the path to a topic's manifest.
    #[must_use]
    pub fn manifest_path(&self, topic: &str) -> PathBuf {
        self.topic_dir(topic).join(TOPIC_MANIFEST_FILE)
    }

    /// Loads a topic manifest.
    ///
    /// Returns `None` if the topic has never been created.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be read or decoded.
    pub fn load_manifest(&self, topic: &str) -> CoreResult<Option<TopicManifest>> {
        let data = match fs::read(self.manifest_path(topic)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        TopicManifest::decode(&data).map(Some)
    }

    /// Saves a topic manifest atomically, creating the topic directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save_manifest(&self, manifest: &TopicManifest) -> CoreResult<()> {
        let topic_dir = self.topic_dir(&manifest.name);
        let created = !topic_dir.exists();
        fs::create_dir_all(&topic_dir)?;
        write_atomic(&self.manifest_path(&manifest.name), &manifest.encode())?;
        if created {
            sync_dir(&self.path)?;
        }
        Ok(())
    }

    /// Lists topics that have a manifest, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_topics(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if entry.path().join(TOPIC_MANIFEST_FILE).exists() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Writes `data` to `path` so that readers see either the old or the new
/// contents, never a mix.
///
/// Uses the write-then-rename pattern:
/// 1. Write to a temporary file next to `path`
/// 2. Sync the temporary file
/// 3. Rename it over `path`
/// 4. Sync the parent directory so the rename is durable
///
/// # Errors
///
/// Returns an error if any step fails.
pub fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Syncs a directory so that file creations, renames and deletions in it
/// are durable.
///
/// Windows NTFS journals metadata operations and has no directory fsync,
/// so this is a no-op there.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> CoreResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Syncs a directory so that file creations, renames and deletions in it
/// are durable.
#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> CoreResult<()> {
    Ok(())
}

/// Removes a file if it exists.
pub(crate) fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicConfig;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("new_store");

        assert!(!store_path.exists());
        let _dir = StoreDir::open(&store_path, true).unwrap();
        assert!(store_path.is_dir());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("locked");

        let _dir1 = StoreDir::open(&store_path, true).unwrap();
        let result = StoreDir::open(&store_path, true);
        assert!(matches!(result, Err(CoreError::StoreLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("reopen");

        {
            let _dir = StoreDir::open(&store_path, true).unwrap();
        }
        let _dir2 = StoreDir::open(&store_path, true).unwrap();
    }

    #[test]
    fn manifest_round_trip_and_listing() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        assert!(dir.load_manifest("orders").unwrap().is_none());
        assert!(dir.list_topics().unwrap().is_empty());

        let manifest = TopicManifest::new("orders", 3, TopicConfig::default());
        dir.save_manifest(&manifest).unwrap();
        dir.save_manifest(&TopicManifest::new("audit", 1, TopicConfig::default()))
            .unwrap();

        assert_eq!(dir.load_manifest("orders").unwrap(), Some(manifest));
        assert_eq!(dir.list_topics().unwrap(), vec!["audit", "orders"]);
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();

        assert_eq!(dir.topic_dir("t"), temp.path().join("t"));
        assert_eq!(
            dir.partition_dir("t", PartitionId::new(2)),
            temp.path().join("t").join("partition-2")
        );
        assert_eq!(dir.manifest_path("t"), temp.path().join("t").join("TOPIC"));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("file");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp.path().join("file.tmp").exists());
    }

    #[test]
    fn remove_if_exists_reports_presence() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f");
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
