//! Media Uploader: local archive files to destination blob references.
//!
//! Images and video share one [`MediaHandler`] contract; the uploader picks
//! the handler by media kind so the engine never branches on it.

mod image;
mod video;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use image::ImageHandler;
pub use video::VideoHandler;

use crate::archive::{CanonicalPost, MediaRef};
use crate::bluesky::{BlobRef, ClientError, Destination, ImageEmbed, MediaEmbed};
use crate::config::MediaPolicy;
use crate::constants::MAX_IMAGES_PER_POST;
use crate::error::MediaUploadError;
use crate::retry::RetryPolicy;

/// A media file read from disk and checked against destination limits.
#[derive(Debug, Clone)]
pub struct PreparedMedia {
    pub path: PathBuf,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub alt: Option<String>,
}

impl PreparedMedia {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// One kind of attachment.
#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Short name for logs.
    fn kind(&self) -> &'static str;

    /// Locate, read, and validate the file for `media`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, of the wrong type,
    /// or over the size limit.
    async fn resolve(&self, media_dir: &Path, media: &MediaRef) -> Result<PreparedMedia, MediaUploadError>;

    /// Send the bytes to the destination.
    async fn upload(&self, dest: &dyn Destination, prepared: &PreparedMedia) -> Result<BlobRef, ClientError>;
}

/// Read a media file after checking its type and size.
pub(crate) async fn read_checked(
    media_dir: &Path,
    media: &MediaRef,
    accepts: impl Fn(&str) -> bool + Send,
    limit: u64,
) -> Result<PreparedMedia, MediaUploadError> {
    let path = media_dir.join(&media.file_name);

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaUploadError::NotFound(path));
        }
        Err(source) => return Err(MediaUploadError::Read { path, source }),
    };

    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    if !accepts(&mime_type) {
        return Err(MediaUploadError::Unsupported {
            path,
            mime: mime_type,
        });
    }

    if metadata.len() > limit {
        return Err(MediaUploadError::TooLarge {
            path,
            size: metadata.len(),
            limit,
        });
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| MediaUploadError::Read {
            path: path.clone(),
            source,
        })?;

    Ok(PreparedMedia {
        path,
        mime_type,
        bytes,
        alt: media.alt.clone(),
    })
}

/// Result of attaching a post's media.
#[derive(Debug, Default)]
pub struct AttachedMedia {
    pub embed: Option<MediaEmbed>,
    /// Attachments left out under [`MediaPolicy::Degrade`].
    pub dropped: usize,
}

pub struct MediaUploader {
    image: ImageHandler,
    video: VideoHandler,
    policy: MediaPolicy,
    retry: RetryPolicy,
}

impl MediaUploader {
    #[must_use]
    pub fn new(policy: MediaPolicy, retry: RetryPolicy) -> Self {
        Self {
            image: ImageHandler,
            video: VideoHandler,
            policy,
            retry,
        }
    }

    fn handler_for(&self, media: &MediaRef) -> &dyn MediaHandler {
        if media.kind.is_video() {
            &self.video
        } else {
            &self.image
        }
    }

    /// Resolve and upload a post's media, in `media_refs` order.
    ///
    /// With no destination (dry run) files are still resolved but nothing is
    /// uploaded; placeholder blob references stand in.
    ///
    /// # Errors
    ///
    /// Returns an error when the policy is [`MediaPolicy::Skip`] and any
    /// attachment fails. Regardless of policy, an upload that ran out of
    /// retries fails the post so a later run can try again, and
    /// authentication failures or cancellation stop the run.
    pub async fn attach(
        &self,
        post: &CanonicalPost,
        media_dir: Option<&Path>,
        dest: Option<&dyn Destination>,
        cancel: &CancellationToken,
    ) -> Result<AttachedMedia, MediaUploadError> {
        let selected = select(post);
        if selected.is_empty() {
            return Ok(AttachedMedia::default());
        }
        let mut dropped = post.media_refs.len() - selected.len();

        let Some(media_dir) = media_dir else {
            return self.degrade(&post.id, MediaUploadError::NoMediaDir).map(|()| AttachedMedia {
                embed: None,
                dropped: post.media_refs.len(),
            });
        };

        let mut prepared = Vec::with_capacity(selected.len());
        for media in selected {
            let handler = self.handler_for(media);
            match handler.resolve(media_dir, media).await {
                Ok(p) => {
                    debug!(post_id = %post.id, kind = handler.kind(), path = %p.path.display(), size = p.size(), "Media resolved");
                    prepared.push((handler, p));
                }
                Err(e) => {
                    self.degrade(&post.id, e)?;
                    dropped += 1;
                }
            }
        }

        let blobs: Vec<Result<BlobRef, MediaUploadError>> = match dest {
            None => prepared
                .iter()
                .map(|(_, p)| Ok(placeholder_blob(p)))
                .collect(),
            Some(dest) => {
                join_all(prepared.iter().map(|(handler, p)| async move {
                    self.retry
                        .run(cancel, handler.kind(), || handler.upload(dest, p))
                        .await
                        .map_err(MediaUploadError::from)
                }))
                .await
            }
        };

        let mut images = Vec::new();
        let mut video = None;
        for ((handler, p), blob) in prepared.into_iter().zip(blobs) {
            let blob = match blob {
                Ok(blob) => blob,
                Err(e) if e.is_fatal() || e.is_cancelled() || e.is_transient() => return Err(e),
                Err(e) => {
                    self.degrade(&post.id, e)?;
                    dropped += 1;
                    continue;
                }
            };
            if handler.kind() == VideoHandler::KIND {
                video = Some((blob, p.alt));
            } else {
                images.push(ImageEmbed {
                    alt: p.alt.unwrap_or_default(),
                    image: blob,
                });
            }
        }

        let embed = match video {
            Some((video, alt)) => Some(MediaEmbed::Video { video, alt }),
            None if !images.is_empty() => Some(MediaEmbed::Images { images }),
            None => None,
        };

        Ok(AttachedMedia { embed, dropped })
    }

    /// Apply the policy to one failed attachment.
    fn degrade(&self, post_id: &str, error: MediaUploadError) -> Result<(), MediaUploadError> {
        match self.policy {
            MediaPolicy::Skip => Err(error),
            MediaPolicy::Degrade => {
                warn!(post_id, error = %error, "Dropping attachment");
                Ok(())
            }
        }
    }
}

/// The destination takes one video or up to four images per post.
fn select(post: &CanonicalPost) -> Vec<&MediaRef> {
    if let Some(video) = post.media_refs.iter().find(|m| m.kind.is_video()) {
        if post.media_refs.len() > 1 {
            warn!(post_id = %post.id, total = post.media_refs.len(), "Post mixes video with other media, keeping only the first video");
        }
        return vec![video];
    }

    if post.media_refs.len() > MAX_IMAGES_PER_POST {
        warn!(post_id = %post.id, total = post.media_refs.len(), limit = MAX_IMAGES_PER_POST, "Too many images, keeping the first ones");
    }
    post.media_refs.iter().take(MAX_IMAGES_PER_POST).collect()
}

fn placeholder_blob(prepared: &PreparedMedia) -> BlobRef {
    let name = prepared
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    BlobRef::new(format!("dry-run:{name}"), prepared.mime_type.clone(), prepared.size())
}
