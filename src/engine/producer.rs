//! Discovery: walks the album listing page by page and turns every item
//! into download tasks.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::rate_limiter::{IntervalRateLimiter, WaitOutcome};
use crate::engine::run_state::RunState;
use crate::engine::task::{build_base_file_name, Task};
use crate::weibo::media::{guess_video_ext, normalize_video_url, parse_created_at};
use crate::weibo::{AlbumSource, RawItem, FIRST_PAGE_CURSOR};

/// Placeholder post id for items without one.
pub const MISSING_POST_ID: &str = "nomid";

/// Placeholder year or month when no date was ever resolved.
pub const UNKNOWN_DATE_PART: &str = "unknown";

/// Fills in missing item dates.
///
/// Remembers the last explicit year and month. Until the first item with a
/// complete explicit date shows up, items lacking one are probed through the
/// post's creation time.
#[derive(Debug, Clone)]
pub struct TimelineCursor {
    last_year: Option<String>,
    last_month: Option<String>,
    probe_active: bool,
}

impl Default for TimelineCursor {
    fn default() -> Self {
        Self {
            last_year: None,
            last_month: None,
            probe_active: true,
        }
    }
}

impl TimelineCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_probing(&self) -> bool {
        self.probe_active
    }

    /// Resolve the `(year, month)` an item is filed under.
    pub async fn resolve(&mut self, item: &RawItem, source: &dyn AlbumSource) -> (String, String) {
        let year = non_empty(item.timeline_year.as_deref());
        let month = non_empty(item.timeline_month.as_deref());

        if let (Some(year), Some(month)) = (year, month) {
            self.last_year = Some(year.to_string());
            self.last_month = Some(month.to_string());
            self.probe_active = false;
            return (year.to_string(), month.to_string());
        }
        if let Some(year) = year {
            self.last_year = Some(year.to_string());
        }
        if let Some(month) = month {
            self.last_month = Some(month.to_string());
        }

        if self.probe_active {
            if let Some(post_id) = non_empty(item.post_id.as_deref()) {
                self.probe(post_id, source).await;
            }
        }

        (
            self.last_year.clone().unwrap_or_else(|| UNKNOWN_DATE_PART.to_string()),
            self.last_month.clone().unwrap_or_else(|| UNKNOWN_DATE_PART.to_string()),
        )
    }

    async fn probe(&mut self, post_id: &str, source: &dyn AlbumSource) {
        let created_at = match source.fetch_creation_time(post_id).await {
            Ok(created_at) => created_at,
            Err(e) => {
                debug!(post_id, "Creation time lookup failed: {}", e);
                None
            }
        };

        if let Some((year, month)) = created_at.as_deref().and_then(parse_created_at) {
            debug!(post_id, year = year.as_str(), month = month.as_str(), "Resolved date from post");
            self.last_year = Some(year);
            self.last_month = Some(month);
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Marks production complete when dropped, whichever way discovery ends.
struct ProductionGuard<'a>(&'a RunState);

impl Drop for ProductionGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_production_complete();
    }
}

/// The single discovery task of a run
pub struct DiscoveryProducer {
    source: Arc<dyn AlbumSource>,
    account_id: String,
    limiter: IntervalRateLimiter,
    state: Arc<RunState>,
    timeline: TimelineCursor,
}

impl DiscoveryProducer {
    pub fn new(
        source: Arc<dyn AlbumSource>,
        account_id: impl Into<String>,
        limiter: IntervalRateLimiter,
        state: Arc<RunState>,
    ) -> Self {
        Self {
            source,
            account_id: account_id.into(),
            limiter,
            state,
            timeline: TimelineCursor::new(),
        }
    }

    /// Page through the listing until it ends, fails, or the run stops.
    /// Returns the number of pages fetched.
    pub async fn run(mut self) -> usize {
        let state = self.state.clone();
        let _guard = ProductionGuard(&state);
        let mut cursor = FIRST_PAGE_CURSOR.to_string();
        let mut pages = 0;

        loop {
            state.wait_if_paused().await;
            if state.is_stopped() {
                break;
            }

            let page = match self.source.fetch_page(&self.account_id, &cursor).await {
                Ok(page) => page,
                Err(e) => {
                    if !state.is_stopped() {
                        warn!(cursor = cursor.as_str(), "Listing request failed, ending discovery: {}", e);
                    }
                    break;
                }
            };
            pages += 1;

            for item in &page.items {
                if state.is_stopped() {
                    break;
                }
                self.enqueue_item(item).await;
            }

            let discovered = state.snapshot().discovered;
            debug!(page = pages, items = page.items.len(), discovered, "Listing page processed");
            if !state.is_stopped() {
                state.set_status(format!("Collecting: discovered {} files", discovered));
            }

            let Some(next) = page.continuation() else {
                break;
            };
            cursor = next.to_string();

            if self.limiter.wait_before_next_fetch(&state).await == WaitOutcome::Stopped
                || state.is_stopped()
            {
                break;
            }
        }

        info!(pages, discovered = state.snapshot().discovered, "Discovery finished");
        pages
    }

    /// Turn one listing item into its image task and, for motion photos, the
    /// companion video task.
    async fn enqueue_item(&mut self, item: &RawItem) {
        let Some(photo_id) = non_empty(item.photo_id.as_deref()) else {
            return;
        };
        let post_id = non_empty(item.post_id.as_deref()).unwrap_or(MISSING_POST_ID);
        let (year, month) = self.timeline.resolve(item, self.source.as_ref()).await;
        let base_name = build_base_file_name(post_id, &year, &month, photo_id);

        self.state.enqueue(Task::image(photo_id, &base_name));

        if !item.is_motion_photo {
            return;
        }
        let Some(reference) = non_empty(item.video.as_deref()) else {
            return;
        };
        let video_url = normalize_video_url(reference);
        if video_url.is_empty() {
            return;
        }
        let ext = guess_video_ext(&video_url);
        self.state.enqueue(Task::video(photo_id, &base_name, video_url, &ext));
    }
}
