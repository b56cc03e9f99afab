//! Session snapshot persistence with file locking.
//!
//! Snapshots are whole JSON documents replaced atomically. Readers and
//! writers coordinate through a `.lock` file beside the snapshot, since the
//! rename swaps the snapshot file itself. A missing or
//! unreadable snapshot is never an error for the caller: a broken file must
//! not stop a clinician from starting a new case.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Lock file guarding the snapshot at `path`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))
}

/// Load a snapshot with a shared lock.
///
/// Returns `None` when the file is missing. Corrupt or unreadable files are
/// logged at warn and also return `None`.
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        tracing::debug!("No snapshot at {:?}", path);
        return None;
    }

    let lock = match open_lock(path).and_then(|lock| lock.lock_shared().map(|_| lock)) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::warn!("Unable to lock snapshot {:?}: {}", path, e);
            return None;
        }
    };

    let mut contents = String::new();
    let read = File::open(path)
        .and_then(|file| std::io::BufReader::new(file).read_to_string(&mut contents));
    let _ = lock.unlock();
    if let Err(e) = read {
        tracing::warn!("Failed to read snapshot {:?}: {}", path, e);
        return None;
    }

    match serde_json::from_str(&contents) {
        Ok(value) => {
            tracing::debug!("Loaded snapshot from {:?}", path);
            Some(value)
        }
        Err(e) => {
            tracing::warn!("Failed to parse snapshot {:?}: {}", path, e);
            None
        }
    }
}

/// Atomically write a snapshot: temp file in the same directory, sync, rename
pub fn save_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("snapshot path {:?} has no parent", path)))?;
    std::fs::create_dir_all(parent)?;

    let lock = open_lock(path)?;
    lock.lock_exclusive()?;

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    let persisted = temp.persist(path).map_err(|e| Error::Io(e.error));
    lock.unlock()?;
    persisted?;

    tracing::debug!("Saved snapshot to {:?}", path);
    Ok(())
}

/// Remove a snapshot; a missing file is fine
pub fn clear_snapshot(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::create_session;
    use crate::types::Session;

    #[test]
    fn test_save_and_load_session() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("active.json");

        let session = create_session(Some(12.5), Some("2 years"), true);
        save_snapshot(&path, &session).unwrap();

        let loaded: Session = load_snapshot(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let loaded: Option<Session> = load_snapshot(&temp_dir.path().join("missing.json"));
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("active.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let loaded: Option<Session> = load_snapshot(&path);
        assert!(loaded.is_none());
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("active.json");

        save_snapshot(&path, &create_session(None, None, false)).unwrap();
        save_snapshot(&path, &create_session(None, None, false)).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "active.json" && e.file_name() != "active.json.lock")
            .collect();
        assert!(extras.is_empty(), "found extras: {:?}", extras);
    }

    #[test]
    fn test_save_waits_for_lock_holder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("active.json");
        assert_eq!(lock_path(&path), temp_dir.path().join("active.json.lock"));

        let held = open_lock(&path).unwrap();
        held.lock_exclusive().unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            save_snapshot(&writer_path, &create_session(None, None, false))
        });

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!path.exists(), "save ran while the lock was held");

        held.unlock().unwrap();
        writer.join().unwrap().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_clear_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("active.json");
        save_snapshot(&path, &create_session(None, None, false)).unwrap();

        clear_snapshot(&path).unwrap();
        assert!(!path.exists());
        clear_snapshot(&path).unwrap();
    }
}
