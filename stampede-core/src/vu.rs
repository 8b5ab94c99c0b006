use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use stampede_metrics::{MetricHandle, Observation};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::budget::IterationBudget;
use crate::context::IterationContext;
use crate::scenario::ScenarioStats;
use crate::scope::names;

pub(crate) type IterationFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub(crate) type IterationFn<C> = Arc<dyn Fn(IterationContext<C>) -> IterationFuture + Send + Sync>;

/// Run-wide `vus` / `vus_max` gauges.
#[derive(Debug, Clone)]
pub(crate) struct VuGauges {
    pub vus: MetricHandle,
    pub vus_max: MetricHandle,
}

/// Counts one live VU for as long as it exists.
pub(crate) struct ActiveVuGuard {
    gauges: VuGauges,
    stats: Arc<ScenarioStats>,
}

impl ActiveVuGuard {
    pub fn new(gauges: VuGauges, stats: Arc<ScenarioStats>) -> Self {
        let now = gauges.vus.add_gauge(1);
        gauges.vus_max.raise_to(now);
        stats.active_vus.fetch_add(1, Ordering::Relaxed);
        Self { gauges, stats }
    }
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        self.gauges.vus.add_gauge(-1);
        self.stats.active_vus.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(crate) struct LiveVu {
    pub id: u64,
    /// Finish the current iteration, then exit.
    pub stop: CancellationToken,
    pub task: JoinHandle<()>,
}

pub(crate) struct VuLoop<C> {
    pub ctx: IterationContext<C>,
    pub iteration: IterationFn<C>,
    pub stop: CancellationToken,
    /// Cancels the in-flight iteration.
    pub abort: CancellationToken,
    /// Set when the whole run is being force-aborted.
    pub run_abort: CancellationToken,
    pub budget: Option<Arc<IterationBudget>>,
    pub stats: Arc<ScenarioStats>,
    pub guard: ActiveVuGuard,
}

enum Outcome {
    Success,
    Failure,
    Interrupted,
}

impl<C: Send + Sync + 'static> VuLoop<C> {
    pub async fn run(self) {
        let Self {
            mut ctx,
            iteration,
            stop,
            abort,
            run_abort,
            budget,
            stats,
            guard,
        } = self;

        loop {
            if stop.is_cancelled() || abort.is_cancelled() {
                break;
            }
            if let Some(budget) = &budget
                && budget.claim().is_none()
            {
                break;
            }

            let started = Instant::now();
            let f = iteration.clone();
            let iter_ctx = ctx.clone();
            let mut task = tokio::spawn(async move { f(iter_ctx).await });

            let joined = tokio::select! {
                biased;
                res = &mut task => Some(res),
                _ = abort.cancelled() => None,
            };

            let outcome = match joined {
                None => {
                    task.abort();
                    let _ = task.await;
                    Outcome::Interrupted
                }
                Some(Ok(Ok(()))) => Outcome::Success,
                Some(Ok(Err(err))) => {
                    tracing::debug!(
                        scenario = ctx.scenario(),
                        vu = ctx.vu_id,
                        iteration = ctx.iteration,
                        error = %err,
                        "iteration failed"
                    );
                    Outcome::Failure
                }
                Some(Err(join)) => {
                    tracing::debug!(
                        scenario = ctx.scenario(),
                        vu = ctx.vu_id,
                        iteration = ctx.iteration,
                        panicked = join.is_panic(),
                        "iteration task did not complete"
                    );
                    Outcome::Failure
                }
            };

            let status = match outcome {
                Outcome::Interrupted => {
                    if run_abort.is_cancelled() {
                        stats.forced_aborts.fetch_add(1, Ordering::Relaxed);
                    }
                    stats.interrupted.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Outcome::Success => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    "success"
                }
                Outcome::Failure => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    "failure"
                }
            };

            let ms = started.elapsed().as_secs_f64() * 1000.0;
            ctx.sink.record(
                Observation::counter(names::ITERATIONS, 1)
                    .with_tag("status", status)
                    .with_tags(ctx.scope.tags()),
            );
            ctx.sink.record(
                Observation::trend(names::ITERATION_DURATION, ms).with_tags(ctx.scope.tags()),
            );

            ctx.iteration = ctx.iteration.saturating_add(1);
            tokio::task::yield_now().await;
        }

        tracing::trace!(scenario = ctx.scenario(), vu = ctx.vu_id, "vu exited");
        drop(guard);
    }
}
