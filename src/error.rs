//! Error taxonomy for a migration run.
//!
//! Only [`ArchiveFormatError`] and the fatal variants of [`EngineError`] end a
//! run. Everything else is scoped to a single post and is logged by the engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::bluesky::ClientError;
use crate::retry::RetryError;

/// The archive root cannot be used at all.
#[derive(Debug, Error)]
pub enum ArchiveFormatError {
    #[error("archive root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("no tweet data file found under {0} (looked for data/tweets.js, tweets.js)")]
    MissingTweetData(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tweet data in {path} is not a JSON array: {message}")]
    NotAnArray { path: PathBuf, message: String },
}

/// A single archive record could not be normalized.
#[derive(Debug, Error)]
pub enum PostRecordError {
    #[error("record has no id")]
    MissingId,
    #[error("post {id}: missing created_at")]
    MissingTimestamp { id: String },
    #[error("post {id}: unparsable created_at {value:?}")]
    BadTimestamp { id: String, value: String },
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A media attachment could not be prepared or uploaded.
#[derive(Debug, Error)]
pub enum MediaUploadError {
    #[error("media file not found: {0}")]
    NotFound(PathBuf),
    #[error("media directory is not available")]
    NoMediaDir,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported media type {mime} for {path}")]
    Unsupported { path: PathBuf, mime: String },
    #[error("{path} is {size} bytes, limit is {limit}")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("upload failed: {0}")]
    Upload(#[from] RetryError),
}

impl MediaUploadError {
    /// Whether this failure must stop the whole run rather than one post.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Upload(e) if e.is_fatal())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Upload(e) if e.is_cancelled())
    }

    /// An upload that ran out of retries; a later run may still succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upload(RetryError::Exhausted { .. }))
    }
}

/// Checkpoint persistence failures.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another run holds the lock {0}; remove it if no run is active")]
    Locked(PathBuf),
    #[error("failed to create lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authentication failed: {0}")]
    Authentication(#[source] ClientError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("failed to write ledger {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
