use std::fmt;

use chrono::{DateTime, Utc};

/// Where the engine is in its per-post cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Selecting,
    Transforming,
    Uploading,
    Submitting,
    Checkpointing,
    Done,
    Aborted,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::Transforming => "transforming",
            Self::Uploading => "uploading",
            Self::Submitting => "submitting",
            Self::Checkpointing => "checkpointing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Which posts a run considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Everything after the stored checkpoint.
    #[default]
    Resume,
    /// Everything after the given instant; the stored checkpoint is ignored
    /// for selection but still advanced.
    StartFrom(DateTime<Utc>),
    /// Every post with video, regardless of checkpoint. Never checkpoints.
    ReprocessVideos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub mode: RunMode,
}

impl RunOptions {
    /// Whether successful publishes move the checkpoint.
    #[must_use]
    pub fn persists_checkpoint(&self) -> bool {
        !self.dry_run && self.mode != RunMode::ReprocessVideos
    }
}

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Posts selected by the cursor and published.
    pub published: usize,
    /// Quoted posts published ahead of the post quoting them.
    pub quotes_published: usize,
    /// Posts passed over on purpose: already published, or nothing to post.
    pub skipped: usize,
    /// Posts that hit an error and were left for a later run.
    pub failed: usize,
    /// Quote relationships that could not be kept.
    pub dropped_quotes: usize,
    pub failed_ids: Vec<String>,
    pub interrupted: bool,
    pub dry_run: bool,
    /// Watermark after the run, if one was written.
    pub checkpoint: Option<DateTime<Utc>>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would publish" } else { "published" };
        writeln!(
            f,
            "{verb} {} posts ({} quoted posts published first), skipped {}, failed {}",
            self.published, self.quotes_published, self.skipped, self.failed
        )?;
        if self.dropped_quotes > 0 {
            writeln!(f, "dropped {} quote relationships", self.dropped_quotes)?;
        }
        if !self.failed_ids.is_empty() {
            writeln!(f, "failed post ids: {}", self.failed_ids.join(", "))?;
        }
        if let Some(ts) = self.checkpoint {
            writeln!(f, "checkpoint: {}", crate::checkpoint::format_checkpoint(ts))?;
        }
        if self.interrupted {
            writeln!(f, "run interrupted; the next run resumes after the checkpoint")?;
        }
        Ok(())
    }
}
