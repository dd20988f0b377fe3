//! Raw exporter schema and its normalization into [`CanonicalPost`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::models::{
    CanonicalPost, Entities, HashtagEntity, MediaKind, MediaRef, MentionEntity, UrlEntity,
};
use crate::error::PostRecordError;

const SOURCE_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

static STATUS_URL: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|mobile\.)?(?:twitter|x)\.com/[^/]+/status(?:es)?/(\d+)")
        .unwrap()
});

/// Archive entries come either wrapped in `{"tweet": ...}` or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Wrapped { tweet: RawTweet },
    Bare(RawTweet),
}

/// Ids, indices and bitrates appear as strings in some exports and numbers in others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

impl NumOrString {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTweet {
    id_str: Option<NumOrString>,
    id: Option<NumOrString>,
    created_at: Option<String>,
    full_text: Option<String>,
    text: Option<String>,
    quoted_status_id_str: Option<NumOrString>,
    #[serde(default)]
    entities: RawEntities,
    extended_entities: Option<RawExtendedEntities>,
    /// Everything else, inspected for `in_reply_to_*` keys.
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    urls: Vec<RawUrl>,
    #[serde(default)]
    user_mentions: Vec<RawMention>,
    #[serde(default)]
    hashtags: Vec<RawHashtag>,
}

#[derive(Debug, Deserialize)]
struct RawUrl {
    #[serde(default)]
    url: String,
    expanded_url: Option<String>,
    display_url: Option<String>,
    #[serde(default)]
    indices: Vec<NumOrString>,
}

#[derive(Debug, Deserialize)]
struct RawMention {
    #[serde(default)]
    screen_name: String,
    #[serde(default)]
    indices: Vec<NumOrString>,
}

#[derive(Debug, Deserialize)]
struct RawHashtag {
    #[serde(default)]
    text: String,
    #[serde(default)]
    indices: Vec<NumOrString>,
}

#[derive(Debug, Deserialize)]
struct RawExtendedEntities {
    #[serde(default)]
    media: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(rename = "type")]
    kind: Option<String>,
    media_url: Option<String>,
    media_url_https: Option<String>,
    url: Option<String>,
    ext_alt_text: Option<String>,
    video_info: Option<RawVideoInfo>,
}

#[derive(Debug, Deserialize)]
struct RawVideoInfo {
    #[serde(default)]
    variants: Vec<RawVariant>,
}

#[derive(Debug, Deserialize)]
struct RawVariant {
    content_type: Option<String>,
    bitrate: Option<NumOrString>,
    url: Option<String>,
}

/// What a single archive record turned out to be.
#[derive(Debug)]
pub enum ParsedRecord {
    Original(CanonicalPost),
    Reply(CanonicalPost),
    Retweet(String),
}

/// Strip the `window.YTD.tweets.part0 = ` assignment in front of the JSON array.
#[must_use]
pub fn strip_js_prefix(content: &str) -> &str {
    content.find('[').map_or(content, |start| &content[start..])
}

/// Normalize one archive record.
///
/// # Errors
///
/// Returns an error if the record lacks an id or a parsable timestamp.
pub fn parse_record(value: Value) -> Result<ParsedRecord, PostRecordError> {
    let tweet = match serde_json::from_value::<RawEntry>(value)? {
        RawEntry::Wrapped { tweet } | RawEntry::Bare(tweet) => tweet,
    };

    let id = tweet
        .id_str
        .or(tweet.id)
        .map(NumOrString::into_string)
        .filter(|s| !s.is_empty())
        .ok_or(PostRecordError::MissingId)?;

    let raw_created = tweet
        .created_at
        .ok_or_else(|| PostRecordError::MissingTimestamp { id: id.clone() })?;
    let created_at =
        parse_source_timestamp(&raw_created).ok_or_else(|| PostRecordError::BadTimestamp {
            id: id.clone(),
            value: raw_created.clone(),
        })?;

    let text = tweet.full_text.or(tweet.text).unwrap_or_default();

    if text.starts_with("RT @") {
        return Ok(ParsedRecord::Retweet(id));
    }

    let is_reply = text.starts_with('@')
        || tweet
            .extra
            .iter()
            .any(|(key, value)| key.starts_with("in_reply_to_") && !value.is_null());

    let entities = Entities {
        urls: tweet
            .entities
            .urls
            .into_iter()
            .filter(|u| !u.url.is_empty())
            .map(|u| UrlEntity {
                expanded_url: u.expanded_url.unwrap_or_else(|| u.url.clone()),
                url: u.url,
                display_url: u.display_url,
                indices: indices(&u.indices),
            })
            .collect(),
        mentions: tweet
            .entities
            .user_mentions
            .into_iter()
            .filter(|m| !m.screen_name.is_empty())
            .map(|m| MentionEntity {
                indices: indices(&m.indices),
                screen_name: m.screen_name,
            })
            .collect(),
        hashtags: tweet
            .entities
            .hashtags
            .into_iter()
            .filter(|h| !h.text.is_empty())
            .map(|h| HashtagEntity {
                indices: indices(&h.indices),
                text: h.text,
            })
            .collect(),
    };

    let quoted_post_id = tweet
        .quoted_status_id_str
        .map(NumOrString::into_string)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            entities
                .urls
                .iter()
                .find_map(|u| status_id_from_url(&u.expanded_url))
        })
        .filter(|quoted| *quoted != id);

    let media_refs = tweet
        .extended_entities
        .map(|ext| media_refs(&id, ext.media))
        .unwrap_or_default();

    let post = CanonicalPost {
        id,
        created_at,
        text,
        is_reply,
        quoted_post_id,
        media_refs,
        entities,
    };

    Ok(if post.is_reply {
        ParsedRecord::Reply(post)
    } else {
        ParsedRecord::Original(post)
    })
}

/// Parse the exporter's `Wed Oct 16 22:18:35 +0000 2024` format, or RFC 3339.
#[must_use]
pub fn parse_source_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value.trim(), SOURCE_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value.trim()))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extract the status id from a link to a post on the source platform.
#[must_use]
pub fn status_id_from_url(url: &str) -> Option<String> {
    STATUS_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn indices(raw: &[NumOrString]) -> Option<(usize, usize)> {
    match raw {
        [start, end] => {
            let start = usize::try_from(start.as_u64()?).ok()?;
            let end = usize::try_from(end.as_u64()?).ok()?;
            Some((start, end))
        }
        _ => None,
    }
}

fn media_refs(post_id: &str, media: Vec<RawMedia>) -> Vec<MediaRef> {
    let mut refs = Vec::new();

    for item in media {
        let Some(kind) = item.kind.as_deref().and_then(MediaKind::from_source) else {
            tracing::debug!(post_id, kind = ?item.kind, "Ignoring media of unknown type");
            continue;
        };

        let source_url = if kind.is_video() {
            best_mp4_variant(item.video_info.as_ref())
        } else {
            item.media_url_https.or(item.media_url)
        };

        let Some(source_url) = source_url else {
            tracing::warn!(post_id, ?kind, "No usable media URL, attachment dropped");
            continue;
        };

        let tag = source_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .split('?')
            .next()
            .unwrap_or_default();
        if tag.is_empty() {
            continue;
        }

        refs.push(MediaRef {
            file_name: format!("{post_id}-{tag}"),
            kind,
            alt: item.ext_alt_text.filter(|a| !a.trim().is_empty()),
            short_url: item.url,
        });
    }

    refs
}

/// Pick the highest-bitrate mp4 variant; streaming manifests have no bitrate.
fn best_mp4_variant(info: Option<&RawVideoInfo>) -> Option<String> {
    info?
        .variants
        .iter()
        .filter(|v| v.content_type.as_deref() == Some("video/mp4"))
        .filter_map(|v| Some((v.bitrate.as_ref()?.as_u64()?, v.url.as_ref()?)))
        .max_by_key(|(bitrate, _)| *bitrate)
        .map(|(_, url)| url.clone())
}
