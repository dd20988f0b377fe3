//! Durable map from source post ids to their published destination records.
//!
//! Lets a quote resolve against a post published in an earlier run. The file
//! is append-only JSON lines; when an id appears more than once the last line
//! wins.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bluesky::StrongRef;

/// A post that reached the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub source_post_id: String,
    pub destination: StrongRef,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    path: Option<PathBuf>,
    records: HashMap<String, PublishRecord>,
}

impl Ledger {
    /// A ledger that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger file. A missing file is an empty ledger; bad lines are
    /// logged and ignored.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let mut ledger = Self {
            path: Some(path.to_path_buf()),
            records: HashMap::new(),
        };

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ledger,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ledger unreadable, prior quote targets will be unknown");
                return ledger;
            }
        };

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PublishRecord>(line) {
                Ok(record) => {
                    ledger
                        .records
                        .insert(record.source_post_id.clone(), record);
                }
                Err(e) => {
                    warn!(path = %path.display(), line = line_no + 1, error = %e, "Ignoring corrupt ledger line");
                }
            }
        }

        debug!(path = %path.display(), entries = ledger.records.len(), "Ledger loaded");
        ledger
    }

    #[must_use]
    pub fn get(&self, source_post_id: &str) -> Option<&PublishRecord> {
        self.records.get(source_post_id)
    }

    #[must_use]
    pub fn contains(&self, source_post_id: &str) -> bool {
        self.records.contains_key(source_post_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remember a published post, appending it to the file if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger file cannot be appended to.
    pub fn record(&mut self, record: PublishRecord) -> std::io::Result<()> {
        if let Some(path) = &self.path {
            let mut line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
            line.push('\n');
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
        }
        self.records.insert(record.source_post_id.clone(), record);
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
