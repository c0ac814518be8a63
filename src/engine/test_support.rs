//! In-memory collaborators for engine tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::weibo::{AlbumSource, BlobFetcher, ListingPage, Profile, RawItem, SourceError, SourceResult};

pub fn item(photo_id: &str, post_id: &str, year: Option<&str>, month: Option<&str>) -> RawItem {
    RawItem {
        photo_id: Some(photo_id.to_string()),
        post_id: Some(post_id.to_string()),
        timeline_year: year.map(str::to_string),
        timeline_month: month.map(str::to_string),
        ..RawItem::default()
    }
}

pub fn motion_item(photo_id: &str, post_id: &str, year: &str, month: &str, video: &str) -> RawItem {
    RawItem {
        is_motion_photo: true,
        video: Some(video.to_string()),
        ..item(photo_id, post_id, Some(year), Some(month))
    }
}

/// Album listing served from memory. A cursor without a page answers with
/// an HTTP 500.
#[derive(Default)]
pub struct MockAlbum {
    pages: HashMap<String, ListingPage>,
    creation_times: HashMap<String, String>,
    display_name: Option<String>,
    page_delay: Duration,
    page_requests: Mutex<Vec<String>>,
    creation_requests: Mutex<Vec<String>>,
}

impl MockAlbum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, cursor: &str, items: Vec<RawItem>, next: Option<&str>) -> Self {
        self.pages.insert(
            cursor.to_string(),
            ListingPage {
                items,
                next_cursor: next.map(str::to_string),
            },
        );
        self
    }

    pub fn with_creation_time(mut self, post_id: &str, created_at: &str) -> Self {
        self.creation_times.insert(post_id.to_string(), created_at.to_string());
        self
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn page_requests(&self) -> Vec<String> {
        self.page_requests.lock().clone()
    }

    pub fn creation_requests(&self) -> Vec<String> {
        self.creation_requests.lock().clone()
    }
}

#[async_trait]
impl AlbumSource for MockAlbum {
    async fn fetch_page(&self, _account_id: &str, cursor: &str) -> SourceResult<ListingPage> {
        self.page_requests.lock().push(cursor.to_string());
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        self.pages.get(cursor).cloned().ok_or(SourceError::Status(500))
    }

    async fn fetch_creation_time(&self, post_id: &str) -> SourceResult<Option<String>> {
        self.creation_requests.lock().push(post_id.to_string());
        Ok(self.creation_times.get(post_id).cloned())
    }

    async fn fetch_profile(&self, _account_id: &str) -> SourceResult<Profile> {
        match &self.display_name {
            Some(name) => Ok(Profile {
                display_name: Some(name.clone()),
            }),
            None => Err(SourceError::Status(404)),
        }
    }
}

type FailurePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Blob fetcher answering with the URL bytes, unless the URL is marked as
/// failing.
pub struct MockFetcher {
    calls: Mutex<Vec<String>>,
    fails: FailurePredicate,
    delay: Duration,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::failing_when(|_| false)
    }

    pub fn failing_when(fails: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fails: Box::new(fails),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BlobFetcher for MockFetcher {
    async fn fetch_bytes(&self, url: &str) -> SourceResult<Vec<u8>> {
        self.calls.lock().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if (self.fails)(url) {
            return Err(SourceError::Status(503));
        }
        Ok(url.as_bytes().to_vec())
    }
}
