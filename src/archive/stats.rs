use std::fmt;

use chrono::{DateTime, Utc};

use super::models::CanonicalPost;
use super::LoadReport;

/// Summary figures about an archive's eligible posts.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveStats {
    pub posts: usize,
    pub replies_excluded: usize,
    pub retweets_excluded: usize,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub avg_text_chars: f64,
    pub hashtags: usize,
    pub mentions: usize,
    pub posts_with_media: usize,
    pub posts_with_video: usize,
    pub quotes: usize,
    pub days_spanned: i64,
    pub posts_per_day: f64,
}

impl ArchiveStats {
    /// Compute statistics over posts already sorted by `created_at`.
    #[must_use]
    pub fn compute(posts: &[CanonicalPost], report: LoadReport) -> Self {
        let earliest = posts.first().map(|p| p.created_at);
        let latest = posts.last().map(|p| p.created_at);

        let days_spanned = match (earliest, latest) {
            (Some(first), Some(last)) => (last.date_naive() - first.date_naive()).num_days() + 1,
            _ => 0,
        };

        let total_chars: usize = posts.iter().map(|p| p.text.chars().count()).sum();
        let avg_text_chars = if posts.is_empty() {
            0.0
        } else {
            total_chars as f64 / posts.len() as f64
        };
        let posts_per_day = if days_spanned > 0 {
            posts.len() as f64 / days_spanned as f64
        } else {
            0.0
        };

        Self {
            posts: posts.len(),
            replies_excluded: report.replies,
            retweets_excluded: report.retweets,
            earliest,
            latest,
            avg_text_chars,
            hashtags: posts.iter().map(|p| p.entities.hashtags.len()).sum(),
            mentions: posts.iter().map(|p| p.entities.mentions.len()).sum(),
            posts_with_media: posts.iter().filter(|p| !p.media_refs.is_empty()).count(),
            posts_with_video: posts.iter().filter(|p| p.has_video()).count(),
            quotes: posts.iter().filter(|p| p.quoted_post_id.is_some()).count(),
            days_spanned,
            posts_per_day,
        }
    }
}

impl fmt::Display for ArchiveStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Eligible posts:      {}", self.posts)?;
        writeln!(f, "Replies excluded:    {}", self.replies_excluded)?;
        writeln!(f, "Retweets excluded:   {}", self.retweets_excluded)?;
        if let (Some(first), Some(last)) = (self.earliest, self.latest) {
            writeln!(f, "Earliest:            {}", first.format("%Y-%m-%d %H:%M:%S"))?;
            writeln!(f, "Latest:              {}", last.format("%Y-%m-%d %H:%M:%S"))?;
        }
        writeln!(
            f,
            "Days spanned:        {} ({:.1} years)",
            self.days_spanned,
            self.days_spanned as f64 / 365.0
        )?;
        writeln!(f, "Posts per day:       {:.2}", self.posts_per_day)?;
        writeln!(f, "Average length:      {:.1} chars", self.avg_text_chars)?;
        writeln!(f, "Hashtags used:       {}", self.hashtags)?;
        writeln!(f, "Mentions made:       {}", self.mentions)?;
        writeln!(f, "Posts with media:    {}", self.posts_with_media)?;
        writeln!(f, "Posts with video:    {}", self.posts_with_video)?;
        write!(f, "Quote posts:         {}", self.quotes)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::archive::Archive;

    #[test]
    fn test_stats_over_small_archive() {
        let data = r#"[
          { "tweet": { "id_str": "1", "created_at": "Mon Oct 14 08:00:00 +0000 2024", "full_text": "abcd #one",
                       "entities": { "hashtags": [ { "text": "one", "indices": ["5", "9"] } ] } } },
          { "tweet": { "id_str": "2", "created_at": "Wed Oct 16 08:00:00 +0000 2024", "full_text": "ab" } },
          { "tweet": { "id_str": "3", "created_at": "Wed Oct 16 09:00:00 +0000 2024", "full_text": "@x hi" } }
        ]"#;
        let archive = Archive::from_tweet_data(data, Path::new("tweets.js")).unwrap();
        let stats = archive.stats();

        assert_eq!(stats.posts, 2);
        assert_eq!(stats.replies_excluded, 1);
        assert_eq!(stats.days_spanned, 3);
        assert_eq!(stats.hashtags, 1);
        assert!((stats.avg_text_chars - 5.5).abs() < f64::EPSILON);
        assert!(stats.to_string().contains("Eligible posts:      2"));
    }
}
