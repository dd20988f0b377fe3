use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source post normalized away from the exporter's schema quirks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPost {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Raw body, still HTML-escaped and containing `t.co` placeholders.
    pub text: String,
    pub is_reply: bool,
    pub quoted_post_id: Option<String>,
    pub media_refs: Vec<MediaRef>,
    pub entities: Entities,
}

impl CanonicalPost {
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.media_refs.iter().any(|m| m.kind.is_video())
    }

    /// Numeric form of the id, used to break timestamp ties.
    #[must_use]
    pub fn numeric_id(&self) -> u64 {
        self.id.parse().unwrap_or(u64::MAX)
    }
}

/// A local media file referenced by a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// File name inside the archive's media directory.
    pub file_name: String,
    pub kind: MediaKind,
    pub alt: Option<String>,
    /// Shortened link the source inserted into the text for this media.
    pub short_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

impl MediaKind {
    #[must_use]
    pub fn from_source(value: &str) -> Option<Self> {
        match value {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "animated_gif" => Some(Self::AnimatedGif),
            _ => None,
        }
    }

    /// Animated GIFs are exported as mp4 and travel the video path.
    #[must_use]
    pub fn is_video(self) -> bool {
        matches!(self, Self::Video | Self::AnimatedGif)
    }
}

/// Entity spans extracted by the source platform.
///
/// Offsets are kept for reference only; facets are always recomputed on the
/// transformed text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub urls: Vec<UrlEntity>,
    pub mentions: Vec<MentionEntity>,
    pub hashtags: Vec<HashtagEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntity {
    /// The shortened link as it appears in the raw text.
    pub url: String,
    pub expanded_url: String,
    pub display_url: Option<String>,
    pub indices: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEntity {
    pub screen_name: String,
    pub indices: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashtagEntity {
    pub text: String,
    pub indices: Option<(usize, usize)>,
}
