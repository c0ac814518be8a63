//! Download engine for the album downloader
//!
//! This module provides:
//! 1. Resilient single-task downloads with mirror-host fallback and retries
//! 2. A bounded pool of workers draining the run's task queue
//! 3. Create-if-absent writes, so existing files are skipped, never replaced

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::engine::config_loader::Retry;
use crate::engine::destination::{Destination, DestinationError};
use crate::engine::run_state::{RunState, TaskOutcome};
use crate::engine::task::{Task, TaskKind};
use crate::weibo::media::{image_url, mirror_host_of, MIRROR_HOSTS};
use crate::weibo::{BlobFetcher, SourceError};

/// Error types for the download engine
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Fetch error: {0}")]
    Source(#[from] SourceError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    #[error("Download cancelled")]
    Cancelled,

    #[error("All {attempts} download attempts failed, last error: {last}")]
    Exhausted { attempts: usize, last: Box<DownloadError> },
}

/// Result type for download operations
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Successful end states of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    /// A file of that name already existed; nothing was written.
    Skipped,
}

/// How many times and how patiently a task is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Full passes over the candidate URLs.
    pub rounds: usize,
    pub backoff_base: Duration,
    /// Upper bound of the random extra delay added to the base.
    pub backoff_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Retry::default())
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &Retry) -> Self {
        Self {
            rounds: retry.rounds.max(1),
            backoff_base: Duration::from_millis(retry.backoff_base_ms),
            backoff_jitter: Duration::from_millis(retry.backoff_jitter_ms),
        }
    }

    pub fn backoff(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.backoff_jitter.as_millis() as u64);
        self.backoff_base + Duration::from_millis(jitter)
    }
}

/// Every URL worth trying for a task, in order.
///
/// Images can be served by any mirror host; the task's own host goes first.
/// Everything else only has its own URL.
pub fn download_candidates(task: &Task) -> Vec<String> {
    if task.kind != TaskKind::Image || task.media_id.is_empty() {
        return vec![task.url.clone()];
    }

    let mut hosts = MIRROR_HOSTS.to_vec();
    if let Some(preferred) = mirror_host_of(&task.url) {
        hosts.retain(|host| *host != preferred);
        hosts.insert(0, preferred);
    }
    hosts.into_iter().map(|host| image_url(host, &task.media_id)).collect()
}

/// Download one task into `destination`.
///
/// Tries every candidate URL, for `retry.rounds` rounds, sleeping a random
/// backoff after each failed attempt. In-flight requests are never
/// interrupted, but a stop is honoured before every attempt and during
/// backoff.
#[instrument(skip_all, fields(task_id = %task.id, filename = %task.filename))]
pub async fn download_task(
    task: &Task,
    fetcher: &dyn BlobFetcher,
    destination: &dyn Destination,
    retry: &RetryPolicy,
    state: &RunState,
) -> DownloadResult<DownloadOutcome> {
    if destination.contains(&task.filename).await? {
        debug!("File already present, skipping");
        return Ok(DownloadOutcome::Skipped);
    }

    let candidates = download_candidates(task);
    let total_attempts = retry.rounds.max(1) * candidates.len();
    let mut attempts = 0;
    let mut last_error = None;

    for round in 1..=retry.rounds.max(1) {
        for url in &candidates {
            if state.is_stopped() {
                return Err(DownloadError::Cancelled);
            }

            attempts += 1;
            match attempt(task, url, fetcher, destination).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(round, url = url.as_str(), "Download attempt failed: {}", e);
                    last_error = Some(e);
                }
            }

            if attempts < total_attempts {
                tokio::select! {
                    _ = sleep(retry.backoff()) => {}
                    _ = state.wait_for_stop() => return Err(DownloadError::Cancelled),
                }
            }
        }
    }

    Err(DownloadError::Exhausted {
        attempts,
        last: Box::new(last_error.unwrap_or(DownloadError::Cancelled)),
    })
}

async fn attempt(
    task: &Task,
    url: &str,
    fetcher: &dyn BlobFetcher,
    destination: &dyn Destination,
) -> DownloadResult<DownloadOutcome> {
    let bytes = fetcher.fetch_bytes(url).await?;
    if destination.write_new_file(&task.filename, &bytes).await? {
        debug!(url, bytes = bytes.len(), "Saved file");
        Ok(DownloadOutcome::Downloaded)
    } else {
        debug!("File appeared while downloading, skipping");
        Ok(DownloadOutcome::Skipped)
    }
}

/// Fixed-size set of workers sharing one fetcher and one destination
#[derive(Clone)]
pub struct WorkerPool {
    fetcher: Arc<dyn BlobFetcher>,
    destination: Arc<dyn Destination>,
    retry: RetryPolicy,
    concurrency: usize,
    idle_backoff: Duration,
}

impl WorkerPool {
    pub fn new(
        fetcher: Arc<dyn BlobFetcher>,
        destination: Arc<dyn Destination>,
        retry: RetryPolicy,
        concurrency: usize,
        idle_backoff: Duration,
    ) -> Self {
        Self {
            fetcher,
            destination,
            retry,
            concurrency: concurrency.max(1),
            idle_backoff,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Launch the workers into `workers`.
    pub fn spawn(&self, state: Arc<RunState>, workers: &mut JoinSet<()>) {
        info!("Starting {} download workers", self.concurrency);
        for index in 0..self.concurrency {
            let pool = self.clone();
            let state = state.clone();
            let span = info_span!("worker", worker = index);
            workers.spawn(async move { pool.run_worker(&state).await }.instrument(span));
        }
    }

    async fn run_worker(&self, state: &RunState) {
        loop {
            state.wait_if_paused().await;
            if state.is_stopped() && state.queue_len() == 0 {
                break;
            }

            let Some(task) = state.begin_next_download() else {
                if state.is_production_complete() || state.is_stopped() {
                    break;
                }
                let _ = tokio::time::timeout(self.idle_backoff, state.wait_for_work()).await;
                continue;
            };

            if !state.is_stopped() {
                state.set_status(format!("Downloading {}", task.filename));
            }

            let outcome = match download_task(
                &task,
                self.fetcher.as_ref(),
                self.destination.as_ref(),
                &self.retry,
                state,
            )
            .await
            {
                Ok(DownloadOutcome::Downloaded) => TaskOutcome::Downloaded,
                Ok(DownloadOutcome::Skipped) => TaskOutcome::Skipped,
                Err(DownloadError::Cancelled) => TaskOutcome::Cancelled,
                Err(e) => {
                    warn!(task_id = task.id.as_str(), url = task.url.as_str(), "Download failed: {}", e);
                    TaskOutcome::Failed
                }
            };
            state.finish_download(outcome);
        }

        debug!("Worker exiting");
        state.maybe_finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config_loader::Settings;
    use crate::engine::destination::LocalDirectory;
    use crate::engine::test_support::MockFetcher;
    use tempfile::tempdir;

    fn instant_retry() -> RetryPolicy {
        RetryPolicy {
            rounds: 2,
            backoff_base: Duration::ZERO,
            backoff_jitter: Duration::ZERO,
        }
    }

    fn running() -> RunState {
        RunState::new(Settings::default())
    }

    #[test]
    fn test_default_policy_makes_two_rounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.rounds, 2);
        assert_eq!(policy.backoff_base, Duration::from_millis(250));
        assert_eq!(policy.backoff_jitter, Duration::from_millis(400));
    }

    #[test]
    fn test_candidates_prefer_task_host() {
        let task = Task::image_from("p1", "base", image_url("wx3.sinaimg.cn", "p1"));
        assert_eq!(
            download_candidates(&task),
            vec![
                "https://wx3.sinaimg.cn/large/p1.jpg",
                "https://wx1.sinaimg.cn/large/p1.jpg",
                "https://wx2.sinaimg.cn/large/p1.jpg",
            ]
        );

        let foreign = Task::image_from("p1", "base", "https://example.com/p1.jpg".to_string());
        assert_eq!(download_candidates(&foreign)[0], "https://wx1.sinaimg.cn/large/p1.jpg");

        let video = Task::video("p1", "base", "https://us.sinaimg.cn/a.mov".to_string(), ".mov");
        assert_eq!(download_candidates(&video), vec!["https://us.sinaimg.cn/a.mov"]);
    }

    #[tokio::test]
    async fn test_every_host_is_tried_before_any_repeat() {
        let dir = tempdir().unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();
        let fetcher = MockFetcher::failing_when(|_| true);
        let task = Task::image_from("p1", "base", image_url("wx2.sinaimg.cn", "p1"));

        let result = download_task(&task, &fetcher, &destination, &instant_retry(), &running()).await;
        match result {
            Err(DownloadError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 6);
                assert!(matches!(*last, DownloadError::Source(SourceError::Status(503))));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let hosts: Vec<_> = fetcher.calls().iter().map(|url| mirror_host_of(url).unwrap()).collect();
        assert_eq!(
            hosts,
            vec![
                "wx2.sinaimg.cn",
                "wx1.sinaimg.cn",
                "wx3.sinaimg.cn",
                "wx2.sinaimg.cn",
                "wx1.sinaimg.cn",
                "wx3.sinaimg.cn",
            ]
        );
        assert!(!dir.path().join("base.jpg").exists());
    }

    #[tokio::test]
    async fn test_fallback_host_succeeds() {
        let dir = tempdir().unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();
        let fetcher = MockFetcher::failing_when(|url| url.contains("wx2."));
        let task = Task::image_from("p1", "base", image_url("wx2.sinaimg.cn", "p1"));

        let outcome = download_task(&task, &fetcher, &destination, &instant_retry(), &running())
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(
            std::fs::read(dir.path().join("base.jpg")).unwrap(),
            b"https://wx1.sinaimg.cn/large/p1.jpg"
        );
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped_without_fetching() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("base.jpg"), b"original").unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();
        let fetcher = MockFetcher::new();
        let task = Task::image("p1", "base");

        let outcome = download_task(&task, &fetcher, &destination, &instant_retry(), &running())
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Skipped);
        assert!(fetcher.calls().is_empty());
        assert_eq!(std::fs::read(dir.path().join("base.jpg")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_video_uses_only_its_own_url() {
        let dir = tempdir().unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();
        let fetcher = MockFetcher::failing_when(|_| true);
        let task = Task::video("p1", "base", "https://us.sinaimg.cn/a.mov".to_string(), ".mov");

        let result = download_task(&task, &fetcher, &destination, &instant_retry(), &running()).await;
        assert!(matches!(result, Err(DownloadError::Exhausted { attempts: 2, .. })));
        assert_eq!(fetcher.calls(), vec!["https://us.sinaimg.cn/a.mov"; 2]);
    }

    #[tokio::test]
    async fn test_stopped_run_cancels_before_fetching() {
        let dir = tempdir().unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();
        let fetcher = MockFetcher::new();
        let state = running();
        state.request_stop();

        let result = download_task(&Task::image("p1", "base"), &fetcher, &destination, &instant_retry(), &state).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_counts_failures() {
        let dir = tempdir().unwrap();
        let destination = Arc::new(LocalDirectory::create_if_absent(dir.path()).await.unwrap());
        let fetcher = Arc::new(MockFetcher::failing_when(|url| url.contains("/bad.")));
        let state = Arc::new(running());

        for id in ["a", "b", "c", "bad", "d"] {
            state.enqueue(Task::image(id, id));
        }
        state.mark_production_complete();

        let pool = WorkerPool::new(fetcher, destination, instant_retry(), 3, Duration::from_millis(10));
        let mut workers = JoinSet::new();
        pool.spawn(state.clone(), &mut workers);
        while workers.join_next().await.is_some() {}

        assert!(state.is_complete());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.tallies(), (5, 4, 1, 0));
        assert_eq!(snapshot.active, 0);
        assert!(dir.path().join("d.jpg").is_file());
    }
}
