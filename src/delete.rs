//! Bulk removal of the account's posts within a time window, optionally
//! restricted to posts containing a string.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bluesky::{BlueskyClient, ListedRecord};
use crate::retry::RetryPolicy;

const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which posts to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFilter {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub match_string: Option<String>,
}

impl DeleteFilter {
    /// Build a filter from command-line strings.
    ///
    /// # Errors
    ///
    /// Returns an error if either time is malformed or the window is empty.
    pub fn parse(start: &str, end: &str, match_string: Option<String>) -> Result<Self> {
        let start = parse_window_time(start).context("invalid --start-time")?;
        let end = parse_window_time(end).context("invalid --end-time")?;
        if start >= end {
            bail!("start time must be before end time");
        }
        Ok(Self {
            start,
            end,
            match_string: match_string.filter(|s| !s.is_empty()),
        })
    }

    #[must_use]
    pub fn matches(&self, record: &ListedRecord) -> bool {
        let Some(created_at) = record
            .created_at()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            return false;
        };

        if created_at < self.start || created_at >= self.end {
            return false;
        }

        self.match_string
            .as_deref()
            .map_or(true, |needle| record.text().contains(needle))
    }
}

fn parse_window_time(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), WINDOW_FORMAT)
        .map(|naive| naive.and_utc())
        .with_context(|| format!("expected YYYY-MM-DD HH:MM:SS, got {value:?}"))
}

/// Page through the account's posts and keep the ones the filter matches.
///
/// # Errors
///
/// Returns an error if listing fails.
pub async fn find_matching(client: &BlueskyClient, filter: &DeleteFilter) -> Result<Vec<ListedRecord>> {
    let mut matched = Vec::new();
    let mut cursor: Option<String> = None;
    let mut scanned = 0usize;

    loop {
        let page = client
            .list_posts(cursor.as_deref())
            .await
            .context("Failed to list posts")?;
        if page.records.is_empty() {
            break;
        }
        scanned += page.records.len();
        matched.extend(page.records.into_iter().filter(|r| filter.matches(r)));

        match page.cursor {
            Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
            _ => break,
        }
    }

    info!(scanned, matched = matched.len(), "Listed posts");
    Ok(matched)
}

/// Delete `records`, stopping early on interrupt. Returns how many went.
///
/// # Errors
///
/// Returns an error if the session is rejected; other per-post failures are
/// logged and skipped.
pub async fn delete_records(
    client: &BlueskyClient,
    records: &[ListedRecord],
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut deleted = 0;
    for record in records {
        match retry
            .run(cancel, "delete_post", || client.delete_post(record.rkey()))
            .await
        {
            Ok(()) => {
                deleted += 1;
                info!(uri = %record.uri, "Deleted");
            }
            Err(e) if e.is_cancelled() => {
                warn!(deleted, "Interrupted");
                break;
            }
            Err(e) if e.is_fatal() => return Err(e).context("Destination rejected the session"),
            Err(e) => warn!(uri = %record.uri, error = %e, "Delete failed"),
        }
    }
    Ok(deleted)
}

/// Print one line per record.
pub fn print_records(records: &[ListedRecord]) {
    for record in records {
        let created = record.created_at().unwrap_or("?");
        let text: String = record.text().chars().take(80).collect();
        println!("{created}  {}  {}", record.rkey(), text.replace('\n', " "));
    }
}

/// Ask on the terminal; anything but `y`/`yes` is a no.
///
/// # Errors
///
/// Returns an error if the terminal cannot be read.
pub fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn listed(created_at: &str, text: &str) -> ListedRecord {
        serde_json::from_value(json!({
            "uri": "at://did:plc:me/app.bsky.feed.post/3k",
            "cid": "c",
            "value": { "text": text, "createdAt": created_at }
        }))
        .unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let filter = DeleteFilter::parse("2024-01-01 00:00:00", "2024-01-02 00:00:00", None).unwrap();

        assert!(filter.matches(&listed("2024-01-01T00:00:00.000Z", "a")));
        assert!(filter.matches(&listed("2024-01-01T23:59:59Z", "a")));
        assert!(!filter.matches(&listed("2024-01-02T00:00:00Z", "a")));
        assert!(!filter.matches(&listed("2023-12-31T23:59:59Z", "a")));
    }

    #[test]
    fn test_match_string() {
        let filter = DeleteFilter::parse(
            "2024-01-01 00:00:00",
            "2024-01-02 00:00:00",
            Some("Tweeted at".to_string()),
        )
        .unwrap();

        assert!(filter.matches(&listed("2024-01-01T10:00:00Z", "hi\n\nTweeted at 2019")));
        assert!(!filter.matches(&listed("2024-01-01T10:00:00Z", "hi")));
    }

    #[test]
    fn test_rejects_inverted_window() {
        assert!(DeleteFilter::parse("2024-01-02 00:00:00", "2024-01-01 00:00:00", None).is_err());
        assert!(DeleteFilter::parse("2024-01-01", "2024-01-02 00:00:00", None).is_err());
    }

    #[test]
    fn test_record_without_created_at_never_matches() {
        let filter = DeleteFilter::parse("2000-01-01 00:00:00", "2100-01-01 00:00:00", None).unwrap();
        let record: ListedRecord = serde_json::from_value(json!({
            "uri": "at://did:plc:me/app.bsky.feed.post/3k",
            "cid": "c",
            "value": { "text": "x" }
        }))
        .unwrap();
        assert!(!filter.matches(&record));
    }
}
