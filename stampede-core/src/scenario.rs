//! Per-scenario supervisor: drives an [`Executor`] against the clock and turns its desired VU
//! count into spawned and retired VU tasks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use stampede_metrics::MetricSink;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::budget::IterationBudget;
use crate::config::{ScenarioConfig, ScenarioExecutor, ScenarioExecutorKind};
use crate::context::IterationContext;
use crate::executor::{Executor, ExecutorState};
use crate::scope::MetricScope;
use crate::vu::{ActiveVuGuard, IterationFn, LiveVu, VuGauges, VuLoop};

/// Upper bound on how long the supervisor sleeps between checks. Exiting VUs are only noticed
/// on a check.
const SUPERVISOR_TICK: Duration = Duration::from_millis(50);

const NO_STAGE: usize = usize::MAX;

/// Live counters for one scenario. Written by the supervisor and its VUs, read by progress
/// reporting and the final summary.
#[derive(Debug)]
pub(crate) struct ScenarioStats {
    state: AtomicU8,
    stage: AtomicUsize,
    pub active_vus: AtomicU64,
    pub vus_spawned: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub interrupted: AtomicU64,
    pub forced_aborts: AtomicU64,
}

impl Default for ScenarioStats {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(0),
            stage: AtomicUsize::new(NO_STAGE),
            active_vus: AtomicU64::new(0),
            vus_spawned: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            interrupted: AtomicU64::new(0),
            forced_aborts: AtomicU64::new(0),
        }
    }
}

impl ScenarioStats {
    pub fn publish_state(&self, state: ExecutorState) {
        let (code, stage) = match state {
            ExecutorState::Pending => (0, NO_STAGE),
            ExecutorState::Running => (1, NO_STAGE),
            ExecutorState::Ramping { stage } => (2, stage),
            ExecutorState::Draining => (3, NO_STAGE),
            ExecutorState::Done => (4, NO_STAGE),
        };
        self.stage.store(stage, Ordering::Relaxed);
        self.state.store(code, Ordering::Release);
    }

    pub fn state(&self) -> ExecutorState {
        match self.state.load(Ordering::Acquire) {
            0 => ExecutorState::Pending,
            1 => ExecutorState::Running,
            2 => ExecutorState::Ramping {
                stage: match self.stage.load(Ordering::Relaxed) {
                    NO_STAGE => 0,
                    s => s,
                },
            },
            3 => ExecutorState::Draining,
            _ => ExecutorState::Done,
        }
    }

    pub fn summary(&self, config: &ScenarioConfig) -> ScenarioSummary {
        ScenarioSummary {
            name: config.name.clone(),
            executor: config.executor.kind(),
            state: self.state(),
            vus_spawned: self.vus_spawned.load(Ordering::Relaxed),
            iterations_completed: self.completed.load(Ordering::Relaxed),
            iterations_failed: self.failed.load(Ordering::Relaxed),
            iterations_interrupted: self.interrupted.load(Ordering::Relaxed),
            forced_aborts: self.forced_aborts.load(Ordering::Relaxed),
        }
    }
}

/// Final per-scenario counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub name: String,
    pub executor: ScenarioExecutorKind,
    pub state: ExecutorState,
    pub vus_spawned: u64,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub forced_aborts: u64,
}

/// State every scenario of one run shares.
pub(crate) struct RunShared<C> {
    pub run: Arc<C>,
    pub iteration: IterationFn<C>,
    pub sink: Arc<dyn MetricSink>,
    pub gauges: VuGauges,
    pub next_vu_id: Arc<AtomicU64>,
    pub run_start: Instant,
    pub run_abort: CancellationToken,
}

impl<C> Clone for RunShared<C> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
            iteration: self.iteration.clone(),
            sink: self.sink.clone(),
            gauges: self.gauges.clone(),
            next_vu_id: self.next_vu_id.clone(),
            run_start: self.run_start,
            run_abort: self.run_abort.clone(),
        }
    }
}

pub(crate) struct ScenarioSupervisor<C> {
    config: ScenarioConfig,
    executor: Executor,
    scope: MetricScope,
    stats: Arc<ScenarioStats>,
    budget: Option<Arc<IterationBudget>>,
    shared: RunShared<C>,
    /// Cancels in-flight iterations of this scenario.
    abort: CancellationToken,
    /// Asks every VU to exit after its current iteration.
    drain: CancellationToken,
    live: VecDeque<LiveVu>,
    retiring: Vec<LiveVu>,
    next_scenario_vu: u64,
}

impl<C: Send + Sync + 'static> ScenarioSupervisor<C> {
    pub fn new(config: ScenarioConfig, stats: Arc<ScenarioStats>, shared: RunShared<C>) -> Self {
        let budget = match &config.executor {
            ScenarioExecutor::SharedIterations { iterations, .. } => {
                Some(Arc::new(IterationBudget::new(*iterations)))
            }
            _ => None,
        };
        let abort = shared.run_abort.child_token();
        let drain = abort.child_token();
        Self {
            executor: Executor::new(&config),
            scope: MetricScope::new(&config.name, &config.tags),
            config,
            stats,
            budget,
            shared,
            abort,
            drain,
            live: VecDeque::new(),
            retiring: Vec::new(),
            next_scenario_vu: 1,
        }
    }

    pub async fn run(mut self) -> ScenarioSummary {
        let name = self.config.name.clone();
        let mut last_state: Option<ExecutorState> = None;

        loop {
            if self.shared.run_abort.is_cancelled() {
                break;
            }
            self.reap();

            let step = self.executor.advance(self.shared.run_start.elapsed());
            let mut state = step.state;

            // A shared-iterations scenario ends as soon as its budget is spent and every VU
            // has returned.
            if state.is_active()
                && let Some(budget) = &self.budget
                && budget.is_exhausted()
                && self.live.is_empty()
                && self.next_scenario_vu > 1
            {
                state = ExecutorState::Done;
            }

            if last_state != Some(state) {
                tracing::debug!(scenario = %name, state = %state, "scenario state changed");
                self.stats.publish_state(state);
                last_state = Some(state);
            }

            match state {
                ExecutorState::Pending => {}
                ExecutorState::Running | ExecutorState::Ramping { .. } => {
                    self.scale_to(step.desired_vus);
                }
                ExecutorState::Draining => {
                    if !self.drain.is_cancelled() {
                        self.drain.cancel();
                        self.retiring.extend(self.live.drain(..));
                    }
                    if self.retiring.is_empty() {
                        break;
                    }
                }
                ExecutorState::Done => break,
            }

            let wait = step
                .recheck_in
                .unwrap_or(Duration::ZERO)
                .min(SUPERVISOR_TICK);
            if wait.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.shared.run_abort.cancelled() => {}
                }
            }
        }

        self.finish().await;
        let done = ExecutorState::Done;
        if last_state != Some(done) {
            tracing::debug!(scenario = %name, state = %done, "scenario state changed");
        }
        self.stats.publish_state(done);
        self.stats.summary(&self.config)
    }

    fn reap(&mut self) {
        self.live.retain(|vu| !vu.task.is_finished());
        self.retiring.retain(|vu| !vu.task.is_finished());
    }

    fn scale_to(&mut self, desired: u64) {
        if self.budget.is_some() {
            // Shared iterations: a fixed pool, spawned once. VUs leave when the budget is spent.
            while self.next_scenario_vu <= desired {
                self.spawn_vu();
            }
            return;
        }

        let desired = usize::try_from(desired).unwrap_or(usize::MAX);
        while self.live.len() < desired {
            self.spawn_vu();
        }
        while self.live.len() > desired {
            let Some(vu) = self.live.pop_front() else {
                break;
            };
            tracing::trace!(scenario = self.scope.scenario(), vu = vu.id, "vu retiring");
            vu.stop.cancel();
            self.retiring.push(vu);
        }
    }

    fn spawn_vu(&mut self) {
        let vu_id = self.shared.next_vu_id.fetch_add(1, Ordering::Relaxed);
        let scenario_vu = self.next_scenario_vu;
        self.next_scenario_vu += 1;
        self.stats.vus_spawned.fetch_add(1, Ordering::Relaxed);

        let stop = self.drain.child_token();
        let vu_loop = VuLoop {
            ctx: IterationContext {
                vu_id,
                scenario_vu,
                iteration: 0,
                scope: self.scope.clone(),
                run: self.shared.run.clone(),
                sink: self.shared.sink.clone(),
            },
            iteration: self.shared.iteration.clone(),
            stop: stop.clone(),
            abort: self.abort.clone(),
            run_abort: self.shared.run_abort.clone(),
            budget: self.budget.clone(),
            stats: self.stats.clone(),
            guard: ActiveVuGuard::new(self.shared.gauges.clone(), self.stats.clone()),
        };

        tracing::trace!(scenario = self.scope.scenario(), vu = vu_id, "vu spawned");
        let task = tokio::spawn(vu_loop.run());
        self.live.push_back(LiveVu {
            id: vu_id,
            stop,
            task,
        });
    }

    /// Stops whatever is still running and waits for every VU task.
    async fn finish(&mut self) {
        self.drain.cancel();
        let mut remaining: Vec<LiveVu> = self.live.drain(..).collect();
        remaining.append(&mut self.retiring);

        if remaining.iter().any(|vu| !vu.task.is_finished()) {
            self.abort.cancel();
        }

        for vu in remaining {
            if let Err(err) = vu.task.await {
                tracing::error!(
                    scenario = self.scope.scenario(),
                    vu = vu.id,
                    error = %err,
                    "vu task failed"
                );
            }
        }
    }
}
