use std::path::Path;

use async_trait::async_trait;

use super::{read_checked, MediaHandler, PreparedMedia};
use crate::archive::MediaRef;
use crate::bluesky::{BlobRef, ClientError, Destination};
use crate::constants::MAX_IMAGE_BYTES;
use crate::error::MediaUploadError;

/// Still images, uploaded as ordinary blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageHandler;

impl ImageHandler {
    pub const KIND: &'static str = "image";
}

#[async_trait]
impl MediaHandler for ImageHandler {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn resolve(&self, media_dir: &Path, media: &MediaRef) -> Result<PreparedMedia, MediaUploadError> {
        read_checked(media_dir, media, |mime| mime.starts_with("image/"), MAX_IMAGE_BYTES).await
    }

    async fn upload(&self, dest: &dyn Destination, prepared: &PreparedMedia) -> Result<BlobRef, ClientError> {
        dest.upload_blob(prepared.bytes.clone(), &prepared.mime_type)
            .await
    }
}
