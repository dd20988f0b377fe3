//! Archive Reader: locates the exported tweet data and media, normalizes every
//! record, and exposes the eligible posts in chronological order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

pub mod models;
pub mod parser;
pub mod stats;

pub use models::{
    CanonicalPost, Entities, HashtagEntity, MediaKind, MediaRef, MentionEntity, UrlEntity,
};
pub use parser::{parse_source_timestamp, status_id_from_url};
pub use stats::ArchiveStats;

use crate::error::ArchiveFormatError;
use parser::{parse_record, strip_js_prefix, ParsedRecord};

const TWEET_DATA_CANDIDATES: &[&str] = &["data/tweets.js", "data/tweet.js", "tweets.js", "tweet.js"];
const MEDIA_DIR_CANDIDATES: &[&str] = &["data/tweets_media", "tweets_media"];

/// Counts gathered while loading, for the run log and `stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub records: usize,
    pub replies: usize,
    pub retweets: usize,
    pub malformed: usize,
}

/// A loaded archive.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    media_dir: Option<PathBuf>,
    posts: Vec<CanonicalPost>,
    index: HashMap<String, usize>,
    report: LoadReport,
}

impl Archive {
    /// Load an archive from its root folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the root or its tweet data file is missing, or the
    /// data file does not hold a JSON array. Individual bad records are
    /// skipped, not reported as errors.
    pub async fn open(root: &Path) -> Result<Self, ArchiveFormatError> {
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            return Err(ArchiveFormatError::MissingRoot(root.to_path_buf()));
        }

        let data_path = first_existing(root, TWEET_DATA_CANDIDATES)
            .await
            .ok_or_else(|| ArchiveFormatError::MissingTweetData(root.to_path_buf()))?;

        let content = tokio::fs::read_to_string(&data_path)
            .await
            .map_err(|source| ArchiveFormatError::Read {
                path: data_path.clone(),
                source,
            })?;

        let media_dir = first_existing(root, MEDIA_DIR_CANDIDATES).await;
        if media_dir.is_none() {
            warn!(root = %root.display(), "No media folder found; posts with media will fail");
        }

        let mut archive = Self::from_tweet_data(&content, &data_path)?;
        archive.root = root.to_path_buf();
        archive.media_dir = media_dir;

        info!(
            path = %data_path.display(),
            records = archive.report.records,
            eligible = archive.posts.len(),
            replies = archive.report.replies,
            retweets = archive.report.retweets,
            malformed = archive.report.malformed,
            "Archive loaded"
        );

        Ok(archive)
    }

    /// Build an archive from the contents of a tweet data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON array.
    pub fn from_tweet_data(content: &str, path: &Path) -> Result<Self, ArchiveFormatError> {
        let records: Vec<Value> = serde_json::from_str(strip_js_prefix(content)).map_err(|e| {
            ArchiveFormatError::NotAnArray {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let mut report = LoadReport {
            records: records.len(),
            ..LoadReport::default()
        };
        let mut posts = Vec::with_capacity(records.len());

        for (position, record) in records.into_iter().enumerate() {
            match parse_record(record) {
                Ok(ParsedRecord::Original(post)) => posts.push(post),
                Ok(ParsedRecord::Reply(post)) => {
                    debug!(post_id = %post.id, "Excluding reply");
                    report.replies += 1;
                }
                Ok(ParsedRecord::Retweet(id)) => {
                    debug!(post_id = %id, "Excluding retweet");
                    report.retweets += 1;
                }
                Err(e) => {
                    warn!(position, error = %e, "Skipping malformed archive record");
                    report.malformed += 1;
                }
            }
        }

        posts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.numeric_id().cmp(&b.numeric_id()))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut index = HashMap::with_capacity(posts.len());
        posts.retain(|post| {
            if index.contains_key(&post.id) {
                warn!(post_id = %post.id, "Duplicate post id in archive, keeping the first");
                return false;
            }
            index.insert(post.id.clone(), index.len());
            true
        });

        Ok(Self {
            root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            media_dir: None,
            posts,
            index,
            report,
        })
    }

    /// Override the media directory (used when the archive is built in memory).
    #[must_use]
    pub fn with_media_dir(mut self, media_dir: impl Into<PathBuf>) -> Self {
        self.media_dir = Some(media_dir.into());
        self
    }

    /// Eligible posts, ascending by `created_at`, with replies already removed.
    pub fn posts(&self) -> impl Iterator<Item = &CanonicalPost> {
        self.posts.iter()
    }

    /// Look up an eligible post by its source id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CanonicalPost> {
        self.index.get(id).map(|&i| &self.posts[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn media_dir(&self) -> Option<&Path> {
        self.media_dir.as_deref()
    }

    #[must_use]
    pub fn report(&self) -> LoadReport {
        self.report
    }

    #[must_use]
    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats::compute(&self.posts, self.report)
    }
}

async fn first_existing(root: &Path, candidates: &[&str]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = root.join(candidate);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &str = r#"window.YTD.tweets.part0 = [
      { "tweet": { "id_str": "3", "created_at": "Wed Oct 16 22:18:35 +0000 2024", "full_text": "third" } },
      { "tweet": { "id_str": "1", "created_at": "Mon Oct 14 08:00:00 +0000 2024", "full_text": "first" } },
      { "tweet": { "id_str": "2", "created_at": "Tue Oct 15 08:00:00 +0000 2024", "full_text": "@bob reply" } },
      { "tweet": { "created_at": "Tue Oct 15 08:00:00 +0000 2024", "full_text": "no id" } },
      "garbage",
      { "tweet": { "id_str": "4", "created_at": "Mon Oct 14 08:00:00 +0000 2024", "full_text": "tie" } }
    ]"#;

    #[test]
    fn test_sorted_and_replies_excluded() {
        let archive = Archive::from_tweet_data(DATA, Path::new("tweets.js")).unwrap();
        let ids: Vec<_> = archive.posts().map(|p| p.id.as_str()).collect();

        assert_eq!(ids, vec!["1", "4", "3"]);
        assert!(archive.posts().all(|p| !p.is_reply));
        assert!(archive
            .posts()
            .zip(archive.posts().skip(1))
            .all(|(a, b)| a.created_at <= b.created_at));

        let report = archive.report();
        assert_eq!(report.records, 6);
        assert_eq!(report.replies, 1);
        assert_eq!(report.malformed, 2);
    }

    #[test]
    fn test_lookup_by_id() {
        let archive = Archive::from_tweet_data(DATA, Path::new("tweets.js")).unwrap();
        assert_eq!(archive.get("3").map(|p| p.text.as_str()), Some("third"));
        assert!(archive.get("2").is_none());
    }

    #[test]
    fn test_not_an_array() {
        let err = Archive::from_tweet_data("window.x = {}", Path::new("tweets.js")).unwrap_err();
        assert!(matches!(err, ArchiveFormatError::NotAnArray { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_data_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Archive::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, ArchiveFormatError::MissingTweetData(_)));
    }

    #[tokio::test]
    async fn test_open_finds_data_and_media() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("data/tweets_media"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("data/tweets.js"), DATA)
            .await
            .unwrap();

        let archive = Archive::open(dir.path()).await.unwrap();
        assert_eq!(archive.len(), 3);
        assert_eq!(
            archive.media_dir(),
            Some(dir.path().join("data/tweets_media").as_path())
        );
    }
}
