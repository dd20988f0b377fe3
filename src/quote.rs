//! Quote Resolver: decides what has to be published before a quoting post.
//!
//! Quote chains are walked iteratively with a visited set and a depth bound,
//! so malformed or cyclic archive data degrades to a dropped quote instead of
//! unbounded recursion.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, warn};

use crate::archive::{Archive, CanonicalPost};
use crate::bluesky::StrongRef;

/// Why a quote relationship was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The quoted post is not among the archive's eligible posts.
    Missing(String),
    Cycle(String),
    DepthExceeded(usize),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(id) => write!(f, "quoted post {id} is not in the archive"),
            Self::Cycle(id) => write!(f, "quote cycle through post {id}"),
            Self::DepthExceeded(depth) => write!(f, "quote chain deeper than {depth}"),
        }
    }
}

/// Work needed to publish a post's quote relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotePlan<'a> {
    /// Unpublished quoted posts, deepest first. Each one embeds the one before
    /// it; the first embeds `anchor`.
    pub to_publish: Vec<&'a CanonicalPost>,
    /// Already-published record at the bottom of the chain, if the walk ended
    /// on one.
    pub anchor: Option<StrongRef>,
    /// Set when the walk stopped on a link it could not follow.
    pub dropped: Option<DropReason>,
}

impl QuotePlan<'_> {
    /// Nothing to publish and nothing to embed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_publish.is_empty() && self.anchor.is_none()
    }
}

/// Plan the quote chain under `post`.
///
/// `published` answers whether a source id already has a destination record.
pub fn plan<'a, F>(
    post: &'a CanonicalPost,
    archive: &'a Archive,
    published: F,
    max_depth: usize,
) -> QuotePlan<'a>
where
    F: Fn(&str) -> Option<StrongRef>,
{
    let mut visited = HashSet::from([post.id.as_str()]);
    let mut chain: Vec<&CanonicalPost> = Vec::new();
    let mut anchor = None;
    let mut dropped = None;
    let mut current = post;

    while let Some(quoted_id) = current.quoted_post_id.as_deref() {
        if let Some(existing) = published(quoted_id) {
            debug!(post_id = %current.id, quoted_id, uri = %existing.uri, "Quote target already published");
            anchor = Some(existing);
            break;
        }
        if visited.contains(quoted_id) {
            dropped = Some(DropReason::Cycle(quoted_id.to_string()));
            break;
        }
        if chain.len() >= max_depth {
            dropped = Some(DropReason::DepthExceeded(max_depth));
            break;
        }
        let Some(quoted) = archive.get(quoted_id) else {
            dropped = Some(DropReason::Missing(quoted_id.to_string()));
            break;
        };
        visited.insert(quoted.id.as_str());
        chain.push(quoted);
        current = quoted;
    }

    if let Some(reason) = &dropped {
        warn!(post_id = %post.id, at = %current.id, reason = %reason, "Dropping quote relationship");
    }

    chain.reverse();
    QuotePlan {
        to_publish: chain,
        anchor,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use super::*;

    fn tweet(id: &str, day: u32, quotes: Option<&str>) -> String {
        let quoted = quotes.map_or(String::new(), |q| format!(r#", "quoted_status_id_str": "{q}""#));
        // January 2024 starts on a Monday.
        let weekday = ["Mon", "Tue", "Wed", "Thu", "Fri"][day as usize - 1];
        format!(
            r#"{{ "tweet": {{ "id_str": "{id}", "created_at": "{weekday} Jan {day:02} 08:00:00 +0000 2024", "full_text": "post {id}"{quoted} }} }}"#
        )
    }

    fn archive(tweets: &[String]) -> Archive {
        let data = format!("[{}]", tweets.join(","));
        Archive::from_tweet_data(&data, Path::new("tweets.js")).unwrap()
    }

    fn strong(id: &str) -> StrongRef {
        StrongRef {
            uri: format!("at://did:plc:me/app.bsky.feed.post/{id}"),
            cid: format!("cid{id}"),
        }
    }

    #[test]
    fn test_no_quote() {
        let a = archive(&[tweet("1", 1, None)]);
        let plan = plan(a.get("1").unwrap(), &a, |_| None, 4);
        assert!(plan.is_empty());
        assert!(plan.dropped.is_none());
    }

    #[test]
    fn test_unpublished_target_published_first() {
        let a = archive(&[tweet("1", 1, None), tweet("3", 3, Some("1"))]);
        let plan = plan(a.get("3").unwrap(), &a, |_| None, 4);

        let ids: Vec<_> = plan.to_publish.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
        assert!(plan.anchor.is_none());
        assert!(plan.dropped.is_none());
    }

    #[test]
    fn test_published_target_is_embedded_directly() {
        let a = archive(&[tweet("1", 1, None), tweet("3", 3, Some("1"))]);
        let done = HashMap::from([("1".to_string(), strong("1"))]);
        let plan = plan(a.get("3").unwrap(), &a, |id| done.get(id).cloned(), 4);

        assert!(plan.to_publish.is_empty());
        assert_eq!(plan.anchor, Some(strong("1")));
    }

    #[test]
    fn test_chain_stops_at_published_link() {
        let a = archive(&[
            tweet("1", 1, None),
            tweet("2", 2, Some("1")),
            tweet("3", 3, Some("2")),
        ]);
        let done = HashMap::from([("1".to_string(), strong("1"))]);
        let plan = plan(a.get("3").unwrap(), &a, |id| done.get(id).cloned(), 4);

        let ids: Vec<_> = plan.to_publish.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
        assert_eq!(plan.anchor, Some(strong("1")));
    }

    #[test]
    fn test_missing_target_dropped() {
        let a = archive(&[tweet("3", 3, Some("999"))]);
        let plan = plan(a.get("3").unwrap(), &a, |_| None, 4);

        assert!(plan.is_empty());
        assert_eq!(plan.dropped, Some(DropReason::Missing("999".to_string())));
    }

    #[test]
    fn test_cycle_dropped() {
        let a = archive(&[tweet("1", 1, Some("2")), tweet("2", 2, Some("1"))]);
        let plan = plan(a.get("2").unwrap(), &a, |_| None, 4);

        let ids: Vec<_> = plan.to_publish.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
        assert_eq!(plan.dropped, Some(DropReason::Cycle("2".to_string())));
    }

    #[test]
    fn test_depth_bound() {
        let a = archive(&[
            tweet("1", 1, None),
            tweet("2", 2, Some("1")),
            tweet("3", 3, Some("2")),
            tweet("4", 4, Some("3")),
        ]);
        let plan = plan(a.get("4").unwrap(), &a, |_| None, 2);

        let ids: Vec<_> = plan.to_publish.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(plan.dropped, Some(DropReason::DepthExceeded(2)));
    }
}
