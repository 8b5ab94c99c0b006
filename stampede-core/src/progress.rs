use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::executor::{Executor, ExecutorState};
use crate::scenario::ScenarioStats;
use crate::schedule::StageSnapshot;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Position inside a ramping scenario's stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

impl From<StageSnapshot> for StageProgress {
    fn from(s: StageSnapshot) -> Self {
        Self {
            stage: s.index + 1,
            stages: s.count,
            stage_elapsed: s.stage_elapsed,
            stage_remaining: s.stage_remaining,
            start_target: s.start_target,
            end_target: s.end_target,
            current_target: s.current_target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioProgress {
    pub name: String,
    pub state: ExecutorState,
    pub active_vus: u64,
    pub stage: Option<StageProgress>,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub tick: u64,
    pub elapsed: Duration,
    pub scenarios: Vec<ScenarioProgress>,
}

impl ProgressUpdate {
    pub fn total_active_vus(&self) -> u64 {
        self.scenarios.iter().map(|s| s.active_vus).sum()
    }
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

pub(crate) struct ProgressSource {
    pub name: String,
    pub executor: Executor,
    pub stats: Arc<ScenarioStats>,
}

impl ProgressSource {
    fn sample(&self, elapsed: Duration) -> ScenarioProgress {
        let state = self.stats.state();
        let stage = match state {
            ExecutorState::Ramping { .. } => self.executor.stage_at(elapsed).map(Into::into),
            _ => None,
        };
        ScenarioProgress {
            name: self.name.clone(),
            state,
            active_vus: self.stats.active_vus.load(Ordering::Relaxed),
            stage,
            iterations_completed: self.stats.completed.load(Ordering::Relaxed),
            iterations_failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}

/// Calls `on_progress` every `interval` until `stop` is cancelled.
pub(crate) async fn report(
    sources: Vec<ProgressSource>,
    run_start: Instant,
    interval: Duration,
    on_progress: ProgressFn,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(run_start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick = 0u64;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tick += 1;
        let elapsed = run_start.elapsed();
        let scenarios = sources.iter().map(|s| s.sample(elapsed)).collect();
        on_progress(ProgressUpdate {
            tick,
            elapsed,
            scenarios,
        });
    }
}
