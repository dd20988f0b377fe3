use std::path::Path;

use async_trait::async_trait;

use super::{read_checked, MediaHandler, PreparedMedia};
use crate::archive::MediaRef;
use crate::bluesky::{BlobRef, ClientError, Destination};
use crate::constants::MAX_VIDEO_BYTES;
use crate::error::MediaUploadError;

/// Videos and animated GIFs, which the exporter stores as mp4.
///
/// Uploads go through the destination's long-timeout path.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoHandler;

impl VideoHandler {
    pub const KIND: &'static str = "video";
}

#[async_trait]
impl MediaHandler for VideoHandler {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn resolve(&self, media_dir: &Path, media: &MediaRef) -> Result<PreparedMedia, MediaUploadError> {
        read_checked(media_dir, media, |mime| mime == "video/mp4", MAX_VIDEO_BYTES).await
    }

    async fn upload(&self, dest: &dyn Destination, prepared: &PreparedMedia) -> Result<BlobRef, ClientError> {
        tracing::info!(path = %prepared.path.display(), size = prepared.size(), "Uploading video");
        dest.upload_video(prepared.bytes.clone(), &prepared.mime_type)
            .await
    }
}
