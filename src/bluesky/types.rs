//! Wire types for the destination's XRPC endpoints and post lexicon.

use serde::{Deserialize, Serialize};

/// `com.atproto.repo.strongRef`: a record's URI and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

impl StrongRef {
    /// The record key, the last path segment of the URI.
    #[must_use]
    pub fn rkey(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// An uploaded blob as returned by `uploadBlob` and embedded in records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$type", default = "blob_type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub link: CidLink,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

fn blob_type() -> String {
    "blob".to_string()
}

impl BlobRef {
    #[must_use]
    pub fn new(cid: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            kind: blob_type(),
            link: CidLink { link: cid.into() },
            mime_type: mime_type.into(),
            size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadBlobResponse {
    pub blob: BlobRef,
}

/// Byte range in the UTF-8 encoded post text, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEmbed {
    pub alt: String,
    pub image: BlobRef,
}

/// The media half of an embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum MediaEmbed {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<ImageEmbed> },
    #[serde(rename = "app.bsky.embed.video")]
    Video {
        video: BlobRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEmbed {
    #[serde(rename = "$type", default = "record_embed_type")]
    pub kind: String,
    pub record: StrongRef,
}

fn record_embed_type() -> String {
    "app.bsky.embed.record".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<ImageEmbed> },
    #[serde(rename = "app.bsky.embed.video")]
    Video {
        video: BlobRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
    #[serde(rename = "app.bsky.embed.record")]
    Record { record: StrongRef },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia { record: RecordEmbed, media: MediaEmbed },
}

impl Embed {
    /// Compose the embed for a post with optional media and an optional quote.
    #[must_use]
    pub fn compose(media: Option<MediaEmbed>, quote: Option<StrongRef>) -> Option<Self> {
        match (media, quote) {
            (None, None) => None,
            (None, Some(record)) => Some(Self::Record { record }),
            (Some(MediaEmbed::Images { images }), None) => Some(Self::Images { images }),
            (Some(MediaEmbed::Video { video, alt }), None) => Some(Self::Video { video, alt }),
            (Some(media), Some(record)) => Some(Self::RecordWithMedia {
                record: RecordEmbed {
                    kind: record_embed_type(),
                    record,
                },
                media,
            }),
        }
    }

    /// The quoted record, if this embed carries one.
    #[must_use]
    pub fn quoted(&self) -> Option<&StrongRef> {
        match self {
            Self::Record { record } => Some(record),
            Self::RecordWithMedia { record, .. } => Some(&record.record),
            _ => None,
        }
    }
}

/// `app.bsky.feed.post` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(rename = "$type", default = "post_type")]
    pub kind: String,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
}

fn post_type() -> String {
    crate::constants::POST_COLLECTION.to_string()
}

impl PostRecord {
    #[must_use]
    pub fn new(text: String, created_at: String, facets: Vec<Facet>, embed: Option<Embed>) -> Self {
        Self {
            kind: post_type(),
            text,
            created_at,
            facets,
            embed,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRecordRequest<'a> {
    pub repo: &'a str,
    pub collection: &'a str,
    pub record: &'a PostRecord,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteRecordRequest<'a> {
    pub repo: &'a str,
    pub collection: &'a str,
    pub rkey: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Session {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub did: String,
    #[allow(dead_code)]
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveHandleResponse {
    pub did: String,
}

/// One page of `com.atproto.repo.listRecords`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListRecordsResponse {
    #[serde(default)]
    pub records: Vec<ListedRecord>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListedRecord {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

impl ListedRecord {
    #[must_use]
    pub fn text(&self) -> &str {
        self.value
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn created_at(&self) -> Option<&str> {
        self.value.get("createdAt").and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn rkey(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or_default()
    }
}

/// Error body returned by XRPC endpoints.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct XrpcErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}
