//! Shared state of one download run.
//!
//! A fresh [`RunState`] is created for every run and handed to the producer
//! and the workers behind an `Arc`. Cross-task mutation is limited to the
//! queue (behind one mutex) and atomic counters. Popping a task and marking
//! it active happen under the queue lock, so the completion check can never
//! observe a task that is neither queued nor active.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::config_loader::Settings;
use crate::engine::task::{Task, TaskQueue};

/// Lifecycle phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl RunPhase {
    pub fn is_running(self) -> bool {
        matches!(self, RunPhase::Running | RunPhase::Paused)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Running => write!(f, "running"),
            RunPhase::Paused => write!(f, "paused"),
            RunPhase::Stopping => write!(f, "stopping"),
        }
    }
}

/// How a single task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Downloaded,
    Skipped,
    Failed,
    /// Abandoned because the run was stopped; not counted anywhere.
    Cancelled,
}

/// One-shot signal; only the first `fire` has an effect.
#[derive(Debug)]
pub struct CompletionSignal {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            fired: AtomicBool::new(false),
            tx,
        }
    }
}

impl CompletionSignal {
    /// Returns true only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot see a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Point-in-time view of a run for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: RunPhase,
    pub discovered: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub active: usize,
    pub queued: usize,
    pub status: String,
}

impl ProgressSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: RunPhase::Idle,
            discovered: 0,
            downloaded: 0,
            failed: 0,
            skipped: 0,
            active: 0,
            queued: 0,
            status: "Ready".to_string(),
        }
    }

    /// Tasks that reached a final outcome.
    pub fn done(&self) -> usize {
        self.downloaded + self.failed + self.skipped
    }

    pub fn percent(&self) -> usize {
        if self.discovered == 0 {
            return 0;
        }
        self.done().min(self.discovered) * 100 / self.discovered
    }

    /// The monotonic tallies, without the status text.
    pub fn tallies(&self) -> (usize, usize, usize, usize) {
        (self.discovered, self.downloaded, self.failed, self.skipped)
    }
}

/// State shared by the controller, the producer and the workers of one run
#[derive(Debug)]
pub struct RunState {
    run_id: Uuid,
    settings: Settings,
    phase: Mutex<RunPhase>,
    queue: Mutex<TaskQueue>,
    status: Mutex<String>,
    stop_requested: AtomicBool,
    production_complete: AtomicBool,
    resumed_from_pause: AtomicBool,
    discovered: AtomicUsize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    active: AtomicUsize,
    pause_changed: Notify,
    work_available: Notify,
    completion: CompletionSignal,
}

impl RunState {
    /// Creates the state of a new run, already in the running phase.
    pub fn new(settings: Settings) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            settings,
            phase: Mutex::new(RunPhase::Running),
            queue: Mutex::new(TaskQueue::new()),
            status: Mutex::new("Ready".to_string()),
            stop_requested: AtomicBool::new(false),
            production_complete: AtomicBool::new(false),
            resumed_from_pause: AtomicBool::new(false),
            discovered: AtomicUsize::new(0),
            downloaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            pause_changed: Notify::new(),
            work_available: Notify::new(),
            completion: CompletionSignal::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.phase() == RunPhase::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        debug!(status = status.as_str(), "Status changed");
        *self.status.lock() = status;
    }

    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    /// Flips between running and paused. Returns the new phase, or `None`
    /// when the run is not in a pausable phase.
    pub fn toggle_pause(&self) -> Option<RunPhase> {
        let next = {
            let mut phase = self.phase.lock();
            let next = match *phase {
                RunPhase::Running => RunPhase::Paused,
                RunPhase::Paused => {
                    self.resumed_from_pause.store(true, Ordering::SeqCst);
                    RunPhase::Running
                }
                _ => return None,
            };
            *phase = next;
            next
        };

        self.set_status(if next == RunPhase::Paused { "Paused" } else { "Resuming..." });
        self.pause_changed.notify_waiters();
        info!(phase = %next, "Pause toggled");
        Some(next)
    }

    /// Consumes the one-shot "just resumed" flag.
    pub fn take_resumed(&self) -> bool {
        self.resumed_from_pause.swap(false, Ordering::SeqCst)
    }

    /// Stops the run: sets the stop signal, discards pending tasks and marks
    /// production complete. Returns false when the run was not running.
    pub fn request_stop(&self) -> bool {
        {
            let mut phase = self.phase.lock();
            if !phase.is_running() {
                return false;
            }
            *phase = RunPhase::Stopping;
        }
        self.stop_requested.store(true, Ordering::SeqCst);

        let discarded = self.queue.lock().clear();
        info!(discarded, "Stop requested, pending tasks discarded");

        self.set_status("Stopping, waiting for current steps to finish...");
        self.pause_changed.notify_waiters();
        self.mark_production_complete();
        self.maybe_finish();
        true
    }

    /// Moves a finished run back to idle.
    pub fn finish(&self) {
        *self.phase.lock() = RunPhase::Idle;
        self.pause_changed.notify_waiters();
    }

    /// Blocks while the run is paused. Returns whether it had to wait.
    pub async fn wait_if_paused(&self) -> bool {
        let mut waited = false;
        loop {
            let notified = self.pause_changed.notified();
            if !self.is_paused() || self.is_stopped() {
                return waited;
            }
            waited = true;
            notified.await;
        }
    }

    /// Resolves once stop has been requested.
    pub async fn wait_for_stop(&self) {
        loop {
            let notified = self.pause_changed.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Dedup-checked insert. Refused once the run is stopping.
    pub fn enqueue(&self, task: Task) -> bool {
        let inserted = {
            let mut queue = self.queue.lock();
            if self.is_stopped() {
                return false;
            }
            queue.enqueue(task)
        };
        if inserted {
            self.discovered.fetch_add(1, Ordering::SeqCst);
            self.work_available.notify_waiters();
        }
        inserted
    }

    /// Pops the next task and marks it active in the same step.
    pub fn begin_next_download(&self) -> Option<Task> {
        let mut queue = self.queue.lock();
        let task = queue.dequeue()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(task)
    }

    /// Records the outcome of an active task, releases it and re-evaluates
    /// completion.
    pub fn finish_download(&self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Downloaded => {
                self.downloaded.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            TaskOutcome::Cancelled => {}
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.maybe_finish();
    }

    /// Reverses the queue; only honoured before anything was dequeued.
    pub fn reverse_queue(&self) -> bool {
        self.queue.lock().reverse_all()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Nothing queued and no worker busy.
    pub fn is_drained(&self) -> bool {
        let queue = self.queue.lock();
        queue.is_empty() && self.active() == 0
    }

    /// Marks discovery as permanently finished. Only the first call counts.
    pub fn mark_production_complete(&self) -> bool {
        if self.production_complete.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Production complete");
        self.work_available.notify_waiters();
        self.maybe_finish();
        true
    }

    pub fn is_production_complete(&self) -> bool {
        self.production_complete.load(Ordering::SeqCst)
    }

    /// Fires the completion signal when production is complete, the queue is
    /// empty and no download is active. Safe to call any number of times.
    pub fn maybe_finish(&self) -> bool {
        if self.completion.has_fired() || !self.is_production_complete() {
            return false;
        }
        if !self.is_drained() {
            return false;
        }
        let fired = self.completion.fire();
        if fired {
            debug!("Completion signal fired");
        }
        fired
    }

    pub fn is_complete(&self) -> bool {
        self.completion.has_fired()
    }

    pub async fn wait_for_completion(&self) {
        self.completion.wait().await;
    }

    /// Waits until there is at least one task or discovery has finished.
    pub async fn wait_for_work(&self) {
        loop {
            let notified = self.work_available.notified();
            if self.queue_len() > 0 || self.is_production_complete() {
                return;
            }
            notified.await;
        }
    }

    /// Waits until discovery has finished.
    pub async fn wait_for_production(&self) {
        loop {
            let notified = self.work_available.notified();
            if self.is_production_complete() {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.phase(),
            discovered: self.discovered.load(Ordering::SeqCst),
            downloaded: self.downloaded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            active: self.active(),
            queued: self.queue_len(),
            status: self.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> RunState {
        RunState::new(Settings::default())
    }

    #[test]
    fn test_completion_fires_only_when_all_conditions_hold() {
        for production_complete in [false, true] {
            for queue_empty in [false, true] {
                for workers_idle in [false, true] {
                    let state = state();
                    if !workers_idle {
                        state.enqueue(Task::image("busy", "busy"));
                        assert!(state.begin_next_download().is_some());
                    }
                    if !queue_empty {
                        state.enqueue(Task::image("pending", "pending"));
                    }
                    if production_complete {
                        state.mark_production_complete();
                    }
                    state.maybe_finish();

                    let expected = production_complete && queue_empty && workers_idle;
                    assert_eq!(
                        state.is_complete(),
                        expected,
                        "production_complete={production_complete} queue_empty={queue_empty} workers_idle={workers_idle}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_completion_fires_once_after_last_worker() {
        let state = state();
        state.enqueue(Task::image("a", "a"));
        let _task = state.begin_next_download().unwrap();
        state.mark_production_complete();
        assert!(!state.is_complete());

        state.finish_download(TaskOutcome::Downloaded);
        assert!(state.is_complete());
        assert!(!state.maybe_finish());
        assert_eq!(state.snapshot().downloaded, 1);
    }

    #[test]
    fn test_signal_is_one_shot() {
        let signal = CompletionSignal::default();
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.has_fired());
    }

    #[test]
    fn test_stop_discards_queue_and_refuses_new_tasks() {
        let state = state();
        for id in ["a", "b", "c"] {
            state.enqueue(Task::image(id, id));
        }
        assert!(state.request_stop());
        assert_eq!(state.queue_len(), 0);
        assert_eq!(state.phase(), RunPhase::Stopping);
        assert!(state.is_production_complete());
        assert!(state.is_complete());

        assert!(!state.enqueue(Task::image("d", "d")));
        assert_eq!(state.queue_len(), 0);
        assert_eq!(state.snapshot().discovered, 3);
        assert!(!state.request_stop());
    }

    #[test]
    fn test_toggle_pause_sets_resumed_flag() {
        let state = state();
        assert_eq!(state.toggle_pause(), Some(RunPhase::Paused));
        assert!(!state.take_resumed());
        assert_eq!(state.toggle_pause(), Some(RunPhase::Running));
        assert!(state.take_resumed());
        assert!(!state.take_resumed());

        state.finish();
        assert_eq!(state.toggle_pause(), None);
    }

    #[tokio::test]
    async fn test_wait_if_paused_wakes_on_resume() {
        let state = Arc::new(state());
        state.toggle_pause();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        state.toggle_pause();
        let waited = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(waited);
    }

    #[tokio::test]
    async fn test_wait_if_paused_wakes_on_stop() {
        let state = Arc::new(state());
        state.toggle_pause();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_work_returns_on_first_task() {
        let state = Arc::new(state());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_work().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.enqueue(Task::image("a", "a"));
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[test]
    fn test_snapshot_progress_figures() {
        let state = state();
        for id in ["a", "b", "c", "d"] {
            state.enqueue(Task::image(id, id));
        }
        state.begin_next_download().unwrap();
        state.finish_download(TaskOutcome::Skipped);
        state.begin_next_download().unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.tallies(), (4, 0, 0, 1));
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.queued, 2);
        assert_eq!(snapshot.done(), 1);
        assert_eq!(snapshot.percent(), 25);
    }
}
