//! Checkpoint Store: the persisted watermark of the last published post.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::CheckpointError;

const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where the engine reads and writes its watermark.
pub trait CheckpointStore: Send + Sync {
    /// The last published timestamp, or `None` to start from the beginning.
    /// Never fails: an unreadable checkpoint is treated as absent.
    fn load(&self) -> Option<DateTime<Utc>>;

    /// Persist a new watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the watermark cannot be durably written.
    fn save(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError>;
}

/// Plain-text checkpoint file holding one RFC 3339 timestamp.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> Option<DateTime<Utc>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Checkpoint unreadable, starting from the beginning");
                return None;
            }
        };

        let parsed = parse_checkpoint(&content);
        if parsed.is_none() {
            warn!(path = %self.path.display(), content = %content.trim(), "Checkpoint corrupt, starting from the beginning");
        }
        parsed
    }

    fn save(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        let write_err = |source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Temp file in the same directory so the rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(format_checkpoint(timestamp).as_bytes())
            .map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!(path = %self.path.display(), %timestamp, "Checkpoint saved");
        Ok(())
    }
}

/// In-memory store for previews and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    value: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCheckpoint {
    #[must_use]
    pub fn new(initial: Option<DateTime<Utc>>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> Option<DateTime<Utc>> {
        *self.value.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn save(&self, timestamp: DateTime<Utc>) -> Result<(), CheckpointError> {
        *self.value.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(timestamp);
        Ok(())
    }
}

#[must_use]
pub fn format_checkpoint(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 and the older `YYYY-MM-DD HH:MM:SS` (UTC) form.
#[must_use]
pub fn parse_checkpoint(content: &str) -> Option<DateTime<Utc>> {
    let content = content.trim();
    DateTime::parse_from_rfc3339(content)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(content, LEGACY_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Exclusive claim on a checkpoint, held for the duration of a run.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    /// Claim the lock next to `checkpoint_path`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Locked`] if another run holds it.
    pub fn acquire(checkpoint_path: &Path) -> Result<Self, CheckpointError> {
        let mut name = checkpoint_path.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CheckpointError::Locked(path));
            }
            Err(source) => return Err(CheckpointError::Lock { path, source }),
        };
        // Best effort: the pid only helps a human judge staleness.
        let _ = writeln!(file, "{}", std::process::id());

        Ok(Self { path, _file: file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpoint::new(dir.path().join("checkpoint.txt"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpoint::new(dir.path().join("checkpoint.txt"));
        let ts = Utc.with_ymd_and_hms(2024, 10, 16, 22, 18, 35).unwrap();

        store.save(ts).unwrap();

        assert_eq!(store.load(), Some(ts));
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "2024-10-16T22:18:35Z");
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpoint::new(dir.path().join("checkpoint.txt"));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.save(ts).unwrap();
        store.save(ts + chrono::Duration::seconds(1)).unwrap();

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.txt");
        std::fs::write(&path, "not a time\u{0}").unwrap();
        assert_eq!(FileCheckpoint::new(path).load(), None);
    }

    #[test]
    fn test_legacy_format_accepted() {
        let ts = parse_checkpoint("2023-05-01 10:20:30\n").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 5, 1, 10, 20, 30).unwrap());
    }

    #[test]
    fn test_run_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("checkpoint.txt");

        let lock = RunLock::acquire(&checkpoint).unwrap();
        assert!(matches!(
            RunLock::acquire(&checkpoint),
            Err(CheckpointError::Locked(_))
        ));

        drop(lock);
        assert!(RunLock::acquire(&checkpoint).is_ok());
    }
}
