//! Shared constants used across the application.

/// User agent string sent with every request to the destination.
pub const USER_AGENT: &str = concat!("leaving-x/", env!("CARGO_PKG_VERSION"));

/// Maximum length of a destination post, in characters.
pub const MAX_POST_CHARS: usize = 300;

/// Marker appended to a body that had to be shortened.
pub const ELLIPSIS: &str = "\u{2026}";

/// Largest image the destination accepts as a blob.
pub const MAX_IMAGE_BYTES: u64 = 1_000_000;

/// Largest video we attempt to upload.
pub const MAX_VIDEO_BYTES: u64 = 50 * 1024 * 1024;

/// Images allowed in a single post.
pub const MAX_IMAGES_PER_POST: usize = 4;

/// Record collection for posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Page size used when listing records.
pub const LIST_PAGE_SIZE: u32 = 100;
