//! Command-line surface.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::engine::{RunMode, RunOptions};

/// Migrate an exported X/Twitter archive to a Bluesky account.
#[derive(Parser, Debug)]
#[command(name = "leaving-x")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Archive root folder (overrides TWITTER_DATA_ROOT_FOLDER)
    #[arg(long, global = true, value_name = "PATH")]
    pub archive: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// The subcommand, with `run` filled in when none was given.
    #[must_use]
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Publish archive posts that are newer than the checkpoint
    Run(RunArgs),

    /// Summarize the archive without contacting the destination
    Stats,

    /// Delete posts from the destination account by time window
    Delete(DeleteArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Show what would be posted without uploading, posting, or checkpointing
    #[arg(long)]
    pub dry_run: bool,

    /// Ignore the checkpoint and start after this time for this run
    /// (`YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, or RFC 3339)
    #[arg(long, value_name = "TIMESTAMP")]
    pub start_from: Option<String>,

    /// Timezone of `--start-from` when it carries no offset
    #[arg(long, value_enum, default_value_t = Timezone::Utc)]
    pub timezone: Timezone,

    /// Re-post every post with video; the checkpoint is left untouched
    #[arg(long, conflicts_with = "start_from")]
    pub reprocess_videos: bool,
}

impl RunArgs {
    /// Translate flags into engine options.
    ///
    /// # Errors
    ///
    /// Returns an error if `--start-from` cannot be parsed.
    pub fn options(&self) -> Result<RunOptions> {
        let mode = if self.reprocess_videos {
            RunMode::ReprocessVideos
        } else if let Some(raw) = &self.start_from {
            RunMode::StartFrom(parse_start_from(raw, self.timezone)?)
        } else {
            RunMode::Resume
        };
        Ok(RunOptions {
            dry_run: self.dry_run,
            mode,
        })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timezone {
    #[default]
    Utc,
    Local,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Start of the window, inclusive (UTC `YYYY-MM-DD HH:MM:SS`)
    #[arg(long)]
    pub start_time: String,

    /// End of the window, exclusive (UTC `YYYY-MM-DD HH:MM:SS`)
    #[arg(long)]
    pub end_time: String,

    /// Only delete posts whose text contains this string
    #[arg(long)]
    pub match_string: Option<String>,

    /// List matching posts without deleting them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Parse a `--start-from` value. Offsets in the value win over `timezone`.
///
/// # Errors
///
/// Returns an error for unrecognized formats or nonexistent local times.
pub fn parse_start_from(raw: &str, timezone: Timezone) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .with_context(|| format!("unrecognized timestamp {raw:?}"))?;

    match timezone {
        Timezone::Utc => Ok(naive.and_utc()),
        Timezone::Local => match Local.from_local_datetime(&naive).earliest() {
            Some(local) => Ok(local.with_timezone(&Utc)),
            None => bail!("{raw} does not exist in the local timezone"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::parse_from(["leaving-x", "--archive", "/tmp/x"]);
        assert!(matches!(cli.command(), Commands::Run(args) if !args.dry_run));
        assert_eq!(cli.archive, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "leaving-x",
            "run",
            "--dry-run",
            "--start-from",
            "2020-01-02 03:04:05",
        ]);
        let Commands::Run(args) = cli.command() else {
            panic!("expected run");
        };
        let options = args.options().unwrap();
        assert!(options.dry_run);
        assert_eq!(
            options.mode,
            RunMode::StartFrom(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_reprocess_conflicts_with_start_from() {
        let parsed = Cli::try_parse_from([
            "leaving-x",
            "run",
            "--reprocess-videos",
            "--start-from",
            "2020-01-01",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parse_start_from_formats() {
        let expected = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_start_from("2021-06-01", Timezone::Utc).unwrap(), expected);
        assert_eq!(
            parse_start_from("2021-06-01T02:00:00+02:00", Timezone::Local).unwrap(),
            expected
        );
        assert!(parse_start_from("yesterday", Timezone::Utc).is_err());
    }

    #[test]
    fn test_delete_args() {
        let cli = Cli::parse_from([
            "leaving-x",
            "delete",
            "--start-time",
            "2024-01-01 00:00:00",
            "--end-time",
            "2024-02-01 00:00:00",
            "--match-string",
            "Tweeted at",
            "--yes",
        ]);
        let Commands::Delete(args) = cli.command() else {
            panic!("expected delete");
        };
        assert_eq!(args.match_string.as_deref(), Some("Tweeted at"));
        assert!(args.yes && !args.dry_run);
    }
}
