//! Rich-text span detection on the final post text.
//!
//! Every offset here is a byte offset into the string it was computed on.
//! Nothing is carried over from source entity indices.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bluesky::{ByteSlice, Destination, Facet, FacetFeature};
use crate::retry::{RetryError, RetryPolicy};

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>()\[\]]+").unwrap());

static HANDLE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s(])(@([a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+))",
    )
    .unwrap()
});

static SCREEN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w@])(@(\w{1,15}))").unwrap());

static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)(#(\w{1,64}))").unwrap());

const URL_TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanKind {
    Link(String),
    /// A destination handle, still to be resolved to a DID.
    Mention(String),
    Tag(String),
}

/// A typed byte range in the transformed text, before DID resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetSpan {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl FacetSpan {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && self.start < end
    }
}

/// Collects spans, refusing any that overlap one already taken.
#[derive(Debug, Default)]
struct SpanSet {
    spans: Vec<FacetSpan>,
}

impl SpanSet {
    fn push(&mut self, start: usize, end: usize, kind: SpanKind) {
        if start >= end || self.spans.iter().any(|s| s.overlaps(start, end)) {
            return;
        }
        self.spans.push(FacetSpan { start, end, kind });
    }

    fn into_sorted(mut self) -> Vec<FacetSpan> {
        self.spans.sort_by_key(|s| s.start);
        self.spans
    }
}

/// Detect facets on `text`.
///
/// `links` are `(display text, target)` pairs produced while unwrapping short
/// links; `screen_names` are source-platform mentions that become profile links.
/// Earlier detectors win when ranges overlap.
#[must_use]
pub fn detect_spans(text: &str, links: &[(String, String)], screen_names: &[String]) -> Vec<FacetSpan> {
    let mut set = SpanSet::default();

    for (display, target) in links {
        if display.is_empty() {
            continue;
        }
        if let Some(start) = text
            .match_indices(display.as_str())
            .map(|(i, _)| i)
            .find(|&i| !set.spans.iter().any(|s| s.overlaps(i, i + display.len())))
        {
            set.push(start, start + display.len(), SpanKind::Link(target.clone()));
        }
    }

    for m in BARE_URL.find_iter(text) {
        let url = m.as_str().trim_end_matches(URL_TRAILING_PUNCT);
        set.push(m.start(), m.start() + url.len(), SpanKind::Link(url.to_string()));
    }

    for caps in HANDLE_MENTION.captures_iter(text) {
        if let (Some(whole), Some(handle)) = (caps.get(1), caps.get(2)) {
            set.push(
                whole.start(),
                whole.end(),
                SpanKind::Mention(handle.as_str().to_lowercase()),
            );
        }
    }

    if !screen_names.is_empty() {
        let known: Vec<String> = screen_names.iter().map(|n| n.to_lowercase()).collect();
        for caps in SCREEN_NAME.captures_iter(text) {
            if let (Some(whole), Some(name)) = (caps.get(1), caps.get(2)) {
                if known.contains(&name.as_str().to_lowercase()) {
                    set.push(
                        whole.start(),
                        whole.end(),
                        SpanKind::Link(format!("https://x.com/{}", name.as_str())),
                    );
                }
            }
        }
    }

    for caps in HASHTAG.captures_iter(text) {
        if let (Some(whole), Some(tag)) = (caps.get(1), caps.get(2)) {
            if tag.as_str().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            set.push(whole.start(), whole.end(), SpanKind::Tag(tag.as_str().to_string()));
        }
    }

    set.into_sorted()
}

/// Turn spans into destination facets, resolving mention handles to DIDs.
///
/// With no resolver (dry run) mentions are dropped; so are handles that do not
/// exist.
///
/// # Errors
///
/// Returns an error when a lookup runs out of retries, is cancelled, or fails
/// authentication. The post should not go out with its mentions silently lost.
pub async fn build_facets(
    spans: &[FacetSpan],
    resolver: Option<&dyn Destination>,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<Facet>, RetryError> {
    let mut dids: HashMap<&str, Option<String>> = HashMap::new();
    let mut facets = Vec::with_capacity(spans.len());

    for span in spans {
        let feature = match &span.kind {
            SpanKind::Link(uri) => FacetFeature::Link { uri: uri.clone() },
            SpanKind::Tag(tag) => FacetFeature::Tag { tag: tag.clone() },
            SpanKind::Mention(handle) => {
                let Some(resolver) = resolver else {
                    continue;
                };
                if !dids.contains_key(handle.as_str()) {
                    let did = match retry
                        .run(cancel, "resolve_handle", || resolver.resolve_handle(handle))
                        .await
                    {
                        Ok(did) => did,
                        Err(RetryError::Failed(e)) if !e.is_fatal() => {
                            warn!(handle = %handle, error = %e, "Handle lookup rejected, dropping mention");
                            None
                        }
                        Err(e) => return Err(e),
                    };
                    dids.insert(handle.as_str(), did);
                }
                match dids.get(handle.as_str()).cloned().flatten() {
                    Some(did) => FacetFeature::Mention { did },
                    None => {
                        debug!(handle = %handle, "Unresolvable mention left as plain text");
                        continue;
                    }
                }
            }
        };
        facets.push(Facet {
            index: ByteSlice {
                byte_start: span.start,
                byte_end: span.end,
            },
            features: vec![feature],
        });
    }

    Ok(facets)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::bluesky::{BlobRef, ClientError, PostRecord, StrongRef};

    /// Resolves `alice.test`; every other lookup hits a flaky network.
    #[derive(Default)]
    struct FlakyResolver {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Destination for FlakyResolver {
        async fn authenticate(&self) -> Result<(), ClientError> {
            Ok(())
        }

        async fn create_post(&self, _record: &PostRecord) -> Result<StrongRef, ClientError> {
            unreachable!("facet tests never post")
        }

        async fn upload_blob(&self, _data: Vec<u8>, _mime_type: &str) -> Result<BlobRef, ClientError> {
            unreachable!("facet tests never upload")
        }

        async fn upload_video(&self, _data: Vec<u8>, _mime_type: &str) -> Result<BlobRef, ClientError> {
            unreachable!("facet tests never upload")
        }

        async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, ClientError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match handle {
                "alice.test" => Ok(Some("did:plc:alice".to_string())),
                "ghost.test" => Err(ClientError::Api {
                    status: 400,
                    error: "InvalidRequest".to_string(),
                    message: "bad handle".to_string(),
                }),
                _ => Err(ClientError::Network("connection reset".to_string())),
            }
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            attempt_timeout: None,
        }
    }

    fn slice<'a>(text: &'a str, span: &FacetSpan) -> &'a str {
        &text[span.start..span.end]
    }

    #[test]
    fn test_url_and_mention_slices_match() {
        let text = "café ☕ see https://example.com/a?b=1, via @alice.bsky.social!";
        let spans = detect_spans(text, &[], &[]);

        assert_eq!(spans.len(), 2);
        assert_eq!(slice(text, &spans[0]), "https://example.com/a?b=1");
        assert_eq!(spans[0].kind, SpanKind::Link("https://example.com/a?b=1".to_string()));
        assert_eq!(slice(text, &spans[1]), "@alice.bsky.social");
        assert_eq!(spans[1].kind, SpanKind::Mention("alice.bsky.social".to_string()));
    }

    #[test]
    fn test_display_link_points_at_expanded_url() {
        let text = "read example.com/long… now";
        let links = vec![(
            "example.com/long…".to_string(),
            "https://example.com/long/article".to_string(),
        )];
        let spans = detect_spans(text, &links, &[]);

        assert_eq!(spans.len(), 1);
        assert_eq!(slice(text, &spans[0]), "example.com/long…");
        assert_eq!(
            spans[0].kind,
            SpanKind::Link("https://example.com/long/article".to_string())
        );
    }

    #[test]
    fn test_screen_names_become_profile_links() {
        let text = "thanks @Jack and @nobody";
        let spans = detect_spans(text, &[], &["jack".to_string()]);

        assert_eq!(spans.len(), 1);
        assert_eq!(slice(text, &spans[0]), "@Jack");
        assert_eq!(spans[0].kind, SpanKind::Link("https://x.com/Jack".to_string()));
    }

    #[test]
    fn test_hashtags_and_overlap() {
        let text = "#rust is fun https://example.com/#anchor #2024 #über";
        let spans = detect_spans(text, &[], &[]);

        let kinds: Vec<_> = spans.iter().map(|s| slice(text, s)).collect();
        assert_eq!(kinds, vec!["#rust", "https://example.com/#anchor", "#über"]);
        assert!(spans.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn test_email_is_not_a_mention() {
        let spans = detect_spans("mail me at me@example.com", &[], &[]);
        assert!(spans.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_drops_mentions() {
        let spans = detect_spans("hi @bob.test #tag", &[], &[]);
        let facets = build_facets(&spans, None, &retry(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(facets.len(), 1);
        assert_eq!(
            facets[0].features,
            vec![FacetFeature::Tag {
                tag: "tag".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_resolved_and_rejected_mentions() {
        let resolver = FlakyResolver::default();
        let dest: &dyn Destination = &resolver;
        let spans = detect_spans("hi @alice.test and @ghost.test", &[], &[]);

        let facets = build_facets(&spans, Some(dest), &retry(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            facets.iter().map(|f| f.features.clone()).collect::<Vec<_>>(),
            vec![vec![FacetFeature::Mention {
                did: "did:plc:alice".to_string()
            }]]
        );
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_outage_fails_instead_of_dropping_mention() {
        let resolver = FlakyResolver::default();
        let dest: &dyn Destination = &resolver;
        let spans = detect_spans("hi @bob.test", &[], &[]);

        let err = build_facets(&spans, Some(dest), &retry(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 3);
    }
}
