use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::engine::config_loader::Settings;
use crate::engine::run_state::RunState;

/// Longest single sleep between re-checks of the run state.
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Why a wait between listing pages ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full random interval elapsed.
    Elapsed,
    /// The run was stopped; no further page should be fetched.
    Stopped,
    /// The run was paused and resumed during (or just before) the wait.
    Resumed,
    /// Workers had nothing left to do once the minimum interval had passed.
    Idle,
}

/// Randomized delay between discovery requests.
///
/// The delay is drawn uniformly from `[min, max]` and slept in short ticks so
/// that pause and stop are noticed promptly. An idle pipeline ends the wait
/// early, but never before `min` has passed.
#[derive(Debug, Clone)]
pub struct IntervalRateLimiter {
    min: Duration,
    max: Duration,
    tick: Duration,
}

impl IntervalRateLimiter {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if max < min { (max, min) } else { (min, max) };
        Self {
            min,
            max,
            tick: DEFAULT_TICK,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Duration::from_millis(settings.min_interval_ms),
            Duration::from_millis(settings.max_interval_ms),
        )
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Draw the next delay
    pub fn next_delay(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Sleep for one random interval, re-checking the run every tick.
    pub async fn wait_before_next_fetch(&self, state: &RunState) -> WaitOutcome {
        let delay = self.next_delay();
        debug!("Rate limiter waiting for {:?}", delay);
        self.wait_for(delay, state).await
    }

    async fn wait_for(&self, delay: Duration, state: &RunState) -> WaitOutcome {
        let mut remaining = delay;
        let mut waited = Duration::ZERO;
        loop {
            if state.is_stopped() {
                return WaitOutcome::Stopped;
            }
            if state.wait_if_paused().await {
                state.take_resumed();
                return if state.is_stopped() {
                    WaitOutcome::Stopped
                } else {
                    WaitOutcome::Resumed
                };
            }
            if state.take_resumed() {
                return WaitOutcome::Resumed;
            }
            if remaining.is_zero() {
                return WaitOutcome::Elapsed;
            }
            if waited >= self.min && state.is_drained() {
                return WaitOutcome::Idle;
            }

            let step = remaining.min(self.tick);
            tokio::time::sleep(step).await;
            remaining -= step;
            waited += step;
        }
    }
}
