//! Remote side of the downloader: the collaborator traits the engine talks
//! to, the records they exchange, and the HTTP client implementing them
//! against weibo.com.

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod media;

pub use client::WeiboClient;

/// Error types for remote lookups and blob fetches
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty response body from {0}")]
    EmptyBody(String),
}

/// Result type for remote operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Cursor value requesting the first listing page.
pub const FIRST_PAGE_CURSOR: &str = "0";

/// Continuation value marking the last listing page.
pub const END_OF_LISTING_CURSOR: &str = "0";

/// One entry of an album listing page, loosely validated.
///
/// Everything is optional here; the producer drops entries without a photo
/// id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub photo_id: Option<String>,
    pub post_id: Option<String>,
    pub timeline_year: Option<String>,
    pub timeline_month: Option<String>,
    pub is_motion_photo: bool,
    pub video: Option<String>,
}

/// One page of the album listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub items: Vec<RawItem>,
    pub next_cursor: Option<String>,
}

impl ListingPage {
    /// The cursor for the following page, or `None` on the last page.
    pub fn continuation(&self) -> Option<&str> {
        self.next_cursor
            .as_deref()
            .map(str::trim)
            .filter(|cursor| !cursor.is_empty() && *cursor != END_OF_LISTING_CURSOR)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: Option<String>,
}

/// Listing, date and profile lookups for one account.
#[async_trait]
pub trait AlbumSource: Send + Sync {
    async fn fetch_page(&self, account_id: &str, cursor: &str) -> SourceResult<ListingPage>;

    /// Raw `created_at` of a post, `None` when the post carries none.
    async fn fetch_creation_time(&self, post_id: &str) -> SourceResult<Option<String>>;

    async fn fetch_profile(&self, account_id: &str) -> SourceResult<Profile>;
}

/// Fetches a whole media file into memory. Each call is one attempt with its
/// own timeout.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> SourceResult<Vec<u8>>;
}
