//! Content Transformer: canonical post to destination text plus facet spans.

mod facets;

use std::sync::LazyLock;

use regex::Regex;

pub use facets::{build_facets, detect_spans, FacetSpan, SpanKind};

use crate::archive::{status_id_from_url, CanonicalPost};
use crate::constants::{ELLIPSIS, MAX_POST_CHARS};

static LEFTOVER_SHORT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://t\.co/[A-Za-z0-9]+").unwrap());

static RUN_OF_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub max_chars: usize,
    pub timestamp_addendum: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            max_chars: MAX_POST_CHARS,
            timestamp_addendum: true,
        }
    }
}

/// Destination-ready text with facet spans whose offsets index into `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedPost {
    pub text: String,
    pub spans: Vec<FacetSpan>,
    pub truncated: bool,
}

/// Transform a post's body.
///
/// `quote_embedded` says whether the post goes out with its quote as an embed.
/// Only then is the quoted-status link dropped from the text.
#[must_use]
pub fn transform(post: &CanonicalPost, quote_embedded: bool, options: &TransformOptions) -> TransformedPost {
    let (body, links) = rewrite_body(post, quote_embedded);
    let screen_names: Vec<String> = post
        .entities
        .mentions
        .iter()
        .map(|m| m.screen_name.clone())
        .collect();
    let spans = detect_spans(&body, &links, &screen_names);

    let (long, short) = if options.timestamp_addendum {
        (
            post.created_at
                .format("\n\nTweeted at %Y-%m-%d %H:%M:%S UTC")
                .to_string(),
            post.created_at.format("\nTweeted %Y-%m-%d").to_string(),
        )
    } else {
        (String::new(), String::new())
    };

    let body_chars = body.chars().count();
    let addendum = if body_chars + long.chars().count() <= options.max_chars {
        long
    } else {
        short
    };

    let budget = options.max_chars.saturating_sub(addendum.chars().count());
    let (mut text, spans, truncated) = if body_chars <= budget {
        (body, spans, false)
    } else {
        let (kept, spans) = truncate(&body, spans, budget);
        (kept, spans, true)
    };
    text.push_str(&addendum);

    TransformedPost {
        text,
        spans,
        truncated,
    }
}

/// Unescape, unwrap short links, and drop the links that become embeds.
///
/// Returns the body and the `(display, target)` pairs for link facets.
fn rewrite_body(post: &CanonicalPost, quote_embedded: bool) -> (String, Vec<(String, String)>) {
    let mut text = unescape_html(&post.text);
    let mut links = Vec::new();

    let media_links: Vec<&str> = post
        .media_refs
        .iter()
        .filter_map(|m| m.short_url.as_deref())
        .collect();

    for entity in &post.entities.urls {
        if entity.url.is_empty() {
            continue;
        }
        let is_quote_link = quote_embedded
            && post.quoted_post_id.is_some()
            && status_id_from_url(&entity.expanded_url).as_deref() == post.quoted_post_id.as_deref();

        if is_quote_link || media_links.contains(&entity.url.as_str()) {
            text = text.replace(&entity.url, "");
            continue;
        }

        let display = entity
            .display_url
            .clone()
            .unwrap_or_else(|| strip_scheme(&entity.expanded_url).to_string());
        text = text.replace(&entity.url, &display);
        links.push((display, entity.expanded_url.clone()));
    }

    for short in media_links {
        text = text.replace(short, "");
    }

    let text = LEFTOVER_SHORT_LINK.replace_all(&text, "");
    let text = RUN_OF_SPACES.replace_all(&text, " ");
    let text = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");

    (text.trim().to_string(), links)
}

/// Cut `body` so that it plus an ellipsis fits in `budget` characters.
fn truncate(body: &str, spans: Vec<FacetSpan>, budget: usize) -> (String, Vec<FacetSpan>) {
    let keep_chars = budget.saturating_sub(ELLIPSIS.chars().count());
    let hard_end = body
        .char_indices()
        .nth(keep_chars)
        .map_or(body.len(), |(i, _)| i);
    let prefix = &body[..hard_end];

    // Prefer a word boundary; fall back to a hard cut for one long token.
    let cut = prefix
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(hard_end, |(i, _)| i);
    let cut = if cut == 0 { hard_end } else { cut };

    let kept = body[..cut].trim_end();
    let kept_len = kept.len();
    let spans = spans.into_iter().filter(|s| s.end <= kept_len).collect();

    (format!("{kept}{ELLIPSIS}"), spans)
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

/// The exporter leaves the five XML entities escaped in post text.
fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::archive::{Entities, MediaKind, MediaRef, MentionEntity, UrlEntity};

    fn post(text: &str) -> CanonicalPost {
        CanonicalPost {
            id: "1".to_string(),
            created_at: Utc.with_ymd_and_hms(2020, 3, 4, 5, 6, 7).unwrap(),
            text: text.to_string(),
            is_reply: false,
            quoted_post_id: None,
            media_refs: Vec::new(),
            entities: Entities::default(),
        }
    }

    fn no_addendum() -> TransformOptions {
        TransformOptions {
            max_chars: MAX_POST_CHARS,
            timestamp_addendum: false,
        }
    }

    fn url_entity(short: &str, expanded: &str, display: &str) -> UrlEntity {
        UrlEntity {
            url: short.to_string(),
            expanded_url: expanded.to_string(),
            display_url: Some(display.to_string()),
            indices: None,
        }
    }

    #[test]
    fn test_short_links_unwrapped_with_correct_offsets() {
        let mut p = post("Schrödinger &amp; me: https://t.co/abc123 cc @alice.bsky.social");
        p.entities.urls = vec![url_entity(
            "https://t.co/abc123",
            "https://example.com/cats",
            "example.com/cats",
        )];

        let out = transform(&p, false, &no_addendum());
        assert_eq!(out.text, "Schrödinger & me: example.com/cats cc @alice.bsky.social");

        let link = &out.spans[0];
        assert_eq!(&out.text[link.start..link.end], "example.com/cats");
        assert_eq!(link.kind, SpanKind::Link("https://example.com/cats".to_string()));

        let mention = &out.spans[1];
        assert_eq!(&out.text[mention.start..mention.end], "@alice.bsky.social");
    }

    #[test]
    fn test_media_and_quote_links_removed() {
        let mut p = post("look at this https://t.co/quote https://t.co/media");
        p.quoted_post_id = Some("42".to_string());
        p.entities.urls = vec![url_entity(
            "https://t.co/quote",
            "https://twitter.com/someone/status/42",
            "twitter.com/someone/sta…",
        )];
        p.media_refs = vec![MediaRef {
            file_name: "1-a.jpg".to_string(),
            kind: MediaKind::Photo,
            alt: None,
            short_url: Some("https://t.co/media".to_string()),
        }];

        let out = transform(&p, true, &no_addendum());
        assert_eq!(out.text, "look at this");
        assert!(out.spans.is_empty());
    }

    #[test]
    fn test_status_link_kept_when_quote_not_embedded() {
        let mut p = post("great thread https://t.co/x");
        p.quoted_post_id = Some("999".to_string());
        p.entities.urls = vec![url_entity(
            "https://t.co/x",
            "https://twitter.com/someoneelse/status/999",
            "twitter.com/someoneelse/…",
        )];

        let out = transform(&p, false, &no_addendum());
        assert_eq!(out.text, "great thread twitter.com/someoneelse/…");
        assert_eq!(out.spans.len(), 1);
        assert_eq!(&out.text[out.spans[0].start..out.spans[0].end], "twitter.com/someoneelse/…");
        assert_eq!(
            out.spans[0].kind,
            SpanKind::Link("https://twitter.com/someoneelse/status/999".to_string())
        );
    }

    #[test]
    fn test_unknown_short_links_stripped() {
        let out = transform(&post("gone https://t.co/zzz  forever"), false, &no_addendum());
        assert_eq!(out.text, "gone forever");
    }

    #[test]
    fn test_source_mentions_link_to_profile() {
        let mut p = post("hey @jack");
        p.entities.mentions = vec![MentionEntity {
            screen_name: "jack".to_string(),
            indices: None,
        }];
        let out = transform(&p, false, &no_addendum());
        assert_eq!(out.spans[0].kind, SpanKind::Link("https://x.com/jack".to_string()));
    }

    #[test]
    fn test_addendum_appended() {
        let out = transform(&post("hello"), false, &TransformOptions::default());
        assert_eq!(out.text, "hello\n\nTweeted at 2020-03-04 05:06:07 UTC");
        assert!(!out.truncated);
    }

    #[test]
    fn test_short_addendum_when_long_does_not_fit() {
        let body = "a".repeat(280);
        let out = transform(&post(&body), false, &TransformOptions::default());
        assert!(out.text.ends_with("\nTweeted 2020-03-04"));
        assert!(out.text.chars().count() <= MAX_POST_CHARS);
        assert!(!out.truncated);
    }

    #[test]
    fn test_truncation_at_word_boundary_drops_cut_facets() {
        let filler = "word ".repeat(55);
        let text = format!("#first {filler}https://example.com/trailing");
        let out = transform(&post(&text), false, &no_addendum());

        assert!(out.truncated);
        assert!(out.text.ends_with("word…"));
        assert!(out.text.chars().count() <= MAX_POST_CHARS);
        assert_eq!(out.spans.len(), 1);
        assert_eq!(out.spans[0].kind, SpanKind::Tag("first".to_string()));
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let options = TransformOptions {
            max_chars: 10,
            timestamp_addendum: false,
        };
        let out = transform(&post(&"é".repeat(40)), false, &options);
        assert_eq!(out.text.chars().count(), 10);
        assert!(out.text.ends_with(ELLIPSIS));
    }
}
