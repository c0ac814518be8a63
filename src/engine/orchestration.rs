//! Orchestration layer for the album downloader
//!
//! The [`RunController`] owns at most one run at a time. Starting a run:
//! 1. Creates a fresh [`RunState`] and enters the running phase
//! 2. Verifies the output directory and opens the account subdirectory
//! 3. Launches the discovery producer and the worker pool in one `JoinSet`
//! 4. Waits for the completion signal and reports the final tallies

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::engine::config_loader::{AppConfig, DownloadOrder, Settings};
use crate::engine::destination::{Destination, DestinationError, LocalDirectory};
use crate::engine::download_engine::{RetryPolicy, WorkerPool};
use crate::engine::producer::DiscoveryProducer;
use crate::engine::rate_limiter::{IntervalRateLimiter, DEFAULT_TICK};
use crate::engine::run_state::{ProgressSnapshot, RunPhase, RunState};
use crate::weibo::{AlbumSource, BlobFetcher};

/// Error types for the run controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("No run in progress")]
    NotRunning,

    #[error("Output directory unavailable: {0}")]
    OutputUnavailable(#[source] DestinationError),

    #[error("Cannot open account directory {name}: {source}")]
    AccountDirectory { name: String, source: DestinationError },
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Knobs that stay fixed for the controller's lifetime
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub output_root: PathBuf,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// How long an idle worker waits before polling the queue again.
    pub idle_backoff: Duration,
    pub rate_tick: Duration,
}

impl ControllerOptions {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            concurrency: 4,
            retry: RetryPolicy::default(),
            idle_backoff: Duration::from_millis(300),
            rate_tick: DEFAULT_TICK,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.pools.download_concurrency.max(1),
            retry: RetryPolicy::from_config(&config.retry),
            ..Self::new(&config.paths.download_directory)
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Final summary of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Account directory the files were written to.
    pub location: String,
    pub snapshot: ProgressSnapshot,
    pub elapsed: Duration,
}

/// Coordinates the producer, the workers and the user's controls
pub struct RunController {
    source: Arc<dyn AlbumSource>,
    fetcher: Arc<dyn BlobFetcher>,
    options: ControllerOptions,
    current: Mutex<Option<Arc<RunState>>>,
}

impl RunController {
    pub fn new(source: Arc<dyn AlbumSource>, fetcher: Arc<dyn BlobFetcher>, options: ControllerOptions) -> Self {
        Self {
            source,
            fetcher,
            options,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Arc<RunState>> {
        self.current.lock().clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.current().map_or(RunPhase::Idle, |state| state.phase())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.current().map_or_else(ProgressSnapshot::idle, |state| state.snapshot())
    }

    /// Pause or resume the current run. Returns the new phase.
    pub fn toggle_pause(&self) -> ControllerResult<RunPhase> {
        self.current()
            .and_then(|state| state.toggle_pause())
            .ok_or(ControllerError::NotRunning)
    }

    /// Request the current run to stop. It ends once in-flight downloads
    /// have finished.
    pub fn stop(&self) -> ControllerResult<()> {
        match self.current() {
            Some(state) if state.request_stop() => Ok(()),
            _ => Err(ControllerError::NotRunning),
        }
    }

    /// Run one download of `account_id` to completion or stop.
    ///
    /// `settings` are used as given; validation happens where they are read.
    pub async fn start(&self, account_id: &str, settings: Settings) -> ControllerResult<RunReport> {
        let state = {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|state| state.phase() != RunPhase::Idle) {
                return Err(ControllerError::AlreadyRunning);
            }
            let state = Arc::new(RunState::new(settings));
            *current = Some(state.clone());
            state
        };

        let span = info_span!("run", run_id = %state.run_id(), account = account_id);
        let result = self.execute(account_id, state.clone()).instrument(span).await;
        if let Err(e) = &result {
            state.set_status(format!("Failed to start: {}", e));
        }
        state.finish();
        result
    }

    async fn execute(&self, account_id: &str, state: Arc<RunState>) -> ControllerResult<RunReport> {
        let started = Instant::now();
        state.set_status("Preparing...");
        info!(
            "Starting run: order {}, interval {}-{} ms, {} workers",
            state.settings().download_order,
            state.settings().min_interval_ms,
            state.settings().max_interval_ms,
            self.options.concurrency
        );

        let root = LocalDirectory::create_if_absent(&self.options.output_root)
            .await
            .map_err(ControllerError::OutputUnavailable)?;
        let dir_name = self.account_dir_name(account_id).await;
        let destination = root
            .child_directory(&dir_name)
            .await
            .map_err(|source| ControllerError::AccountDirectory {
                name: dir_name.clone(),
                source,
            })?;
        info!("Saving into {}", destination.location());

        if state.is_stopped() {
            info!("Stopped during setup");
            return Ok(self.report(&state, destination.location(), started));
        }

        let limiter = IntervalRateLimiter::from_settings(state.settings()).with_tick(self.options.rate_tick);
        let producer = DiscoveryProducer::new(self.source.clone(), account_id, limiter, state.clone());
        let pool = WorkerPool::new(
            self.fetcher.clone(),
            destination.clone(),
            self.options.retry.clone(),
            self.options.concurrency,
            self.options.idle_backoff,
        );

        state.set_status("Fetching media list...");
        let mut tasks = JoinSet::new();
        tasks.spawn(
            async move {
                producer.run().await;
            }
            .instrument(info_span!("producer")),
        );

        match state.settings().download_order {
            DownloadOrder::Reverse => {
                state.wait_for_production().await;
                if !state.is_stopped() && state.reverse_queue() {
                    let queued = state.queue_len();
                    info!("Reversed {} queued tasks", queued);
                    if queued > 0 {
                        state.set_status(format!("Collected {} files, downloading in reverse order...", queued));
                    }
                }
            }
            DownloadOrder::Ascending => state.wait_for_work().await,
        }
        pool.spawn(state.clone(), &mut tasks);

        state.wait_for_completion().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Run task ended abnormally: {}", e);
            }
        }

        Ok(self.report(&state, destination.location(), started))
    }

    /// Display name of the account, falling back to the raw id.
    async fn account_dir_name(&self, account_id: &str) -> String {
        match self.source.fetch_profile(account_id).await {
            Ok(profile) => profile
                .display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| account_id.to_string()),
            Err(e) => {
                warn!("Profile lookup failed, using account id as directory name: {}", e);
                account_id.to_string()
            }
        }
    }

    fn report(&self, state: &RunState, location: String, started: Instant) -> RunReport {
        let counts = state.snapshot();
        let outcome = if state.is_stopped() {
            RunOutcome::Stopped
        } else {
            RunOutcome::Completed
        };

        let status = match outcome {
            RunOutcome::Completed if counts.discovered == 0 => "No downloadable media found".to_string(),
            RunOutcome::Completed => format!(
                "Finished: downloaded {}, failed {}, skipped {}",
                counts.downloaded, counts.failed, counts.skipped
            ),
            RunOutcome::Stopped => format!(
                "Stopped: downloaded {}, failed {}, skipped {}",
                counts.downloaded, counts.failed, counts.skipped
            ),
        };
        state.set_status(status.as_str());
        info!(
            discovered = counts.discovered,
            downloaded = counts.downloaded,
            failed = counts.failed,
            skipped = counts.skipped,
            "{}",
            status
        );

        RunReport {
            run_id: state.run_id(),
            outcome,
            location,
            snapshot: state.snapshot(),
            elapsed: started.elapsed(),
        }
    }
}
