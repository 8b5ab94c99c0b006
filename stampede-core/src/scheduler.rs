//! Run orchestration: setup, concurrent scenarios, the run-level safety timeout, the final
//! snapshot with threshold evaluation, then teardown.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use stampede_metrics::{MetricKind, MetricSink, Registry};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ScenarioConfig};
use crate::context::{HookContext, IterationContext};
use crate::error::Result;
use crate::executor::{Executor, ExecutorState};
use crate::progress::{self, DEFAULT_PROGRESS_INTERVAL, ProgressFn, ProgressSource, ProgressUpdate};
use crate::scenario::{RunShared, ScenarioStats, ScenarioSupervisor, ScenarioSummary};
use crate::scope::{MetricScope, SETUP_SCENARIO, TEARDOWN_SCENARIO, names};
use crate::summary::{RunResult, RunStatus};
use crate::thresholds::{self, Threshold};
use crate::vu::{IterationFn, IterationFuture, VuGauges};

type HookFuture<T> = Pin<Box<dyn Future<Output = std::result::Result<T, String>> + Send>>;
type SetupFn<C> = Box<dyn FnOnce(HookContext) -> HookFuture<C> + Send>;
type TeardownFn<C> = Box<dyn FnOnce(HookContext, Arc<C>) -> HookFuture<()> + Send>;

/// Everything a run needs besides the user code.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenarios: Vec<ScenarioConfig>,
    pub thresholds: Vec<Threshold>,
    /// Run-level safety timeout. When it elapses every in-flight iteration is cancelled.
    pub max_duration: Option<Duration>,
    pub fail_on_inconclusive: bool,
    pub progress_interval: Duration,
}

impl RunPlan {
    pub fn new(scenarios: Vec<ScenarioConfig>) -> Self {
        Self {
            scenarios,
            thresholds: Vec::new(),
            max_duration: None,
            fail_on_inconclusive: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios.into());
        }
        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidRunMaxDuration.into());
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::InvalidProgressInterval.into());
        }
        Ok(())
    }
}

const BUILTIN_METRICS: &[(&str, MetricKind)] = &[
    (names::HTTP_REQ_DURATION, MetricKind::Trend),
    (names::HTTP_REQS, MetricKind::Counter),
    (names::HTTP_REQ_FAILED, MetricKind::Rate),
    (names::CHECKS, MetricKind::Rate),
    (names::ITERATIONS, MetricKind::Counter),
    (names::ITERATION_DURATION, MetricKind::Trend),
    (names::VUS, MetricKind::Gauge),
    (names::VUS_MAX, MetricKind::Gauge),
];

/// Runs a [`RunPlan`]: setup once, every scenario concurrently, then teardown.
///
/// `C` is the run context produced by setup and shared read-only with every iteration.
pub struct Scheduler<C> {
    plan: RunPlan,
    registry: Arc<Registry>,
    setup: SetupFn<C>,
    teardown: Option<TeardownFn<C>>,
    progress: Option<ProgressFn>,
}

impl Scheduler<()> {
    pub fn new(plan: RunPlan, registry: Arc<Registry>) -> Self {
        Self {
            plan,
            registry,
            setup: Box::new(|_| -> HookFuture<()> { Box::pin(async { Ok(()) }) }),
            teardown: None,
            progress: None,
        }
    }
}

impl<C: Send + Sync + 'static> Scheduler<C> {
    /// Replaces setup. Any teardown registered before is dropped, since it expected the old
    /// context type.
    pub fn with_setup<C2, F, Fut, E>(self, setup: F) -> Scheduler<C2>
    where
        F: FnOnce(HookContext) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<C2, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        Scheduler {
            plan: self.plan,
            registry: self.registry,
            setup: Box::new(move |ctx| -> HookFuture<C2> {
                let fut = setup(ctx);
                Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
            }),
            teardown: None,
            progress: self.progress,
        }
    }

    pub fn with_teardown<F, Fut, E>(mut self, teardown: F) -> Self
    where
        F: FnOnce(HookContext, Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.teardown = Some(Box::new(move |ctx, run| -> HookFuture<()> {
            let fut = teardown(ctx, run);
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        }));
        self
    }

    pub fn with_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(on_progress));
        self
    }

    /// Executes the plan. Returns `Err` only for an invalid plan or a metric kind clash on a
    /// built-in metric; setup and teardown failures are reported in the [`RunResult`].
    pub async fn run<F, Fut, E>(self, iteration: F) -> Result<RunResult>
    where
        F: Fn(IterationContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Self {
            plan,
            registry,
            setup,
            teardown,
            progress,
        } = self;
        plan.validate()?;
        for (name, kind) in BUILTIN_METRICS {
            registry.register(name, *kind)?;
        }

        let sink: Arc<dyn MetricSink> = registry.clone();
        let started = Instant::now();
        tracing::info!(
            scenarios = plan.scenarios.len(),
            thresholds = plan.thresholds.len(),
            "run started"
        );

        let setup_ctx = HookContext {
            scope: MetricScope::new(SETUP_SCENARIO, &[]),
            sink: sink.clone(),
        };
        let run = match join_hook(tokio::spawn(setup(setup_ctx))).await {
            Ok(run) => {
                tracing::info!("setup completed");
                Arc::new(run)
            }
            Err(err) => {
                tracing::warn!(error = %err, "setup failed; no scenario will run");
                let snapshot = registry.snapshot();
                let thresholds = thresholds::evaluate(&snapshot, &plan.thresholds);
                let scenarios = plan
                    .scenarios
                    .iter()
                    .map(|c| ScenarioStats::default().summary(c))
                    .collect();
                return Ok(RunResult {
                    status: RunStatus::SetupFailed,
                    snapshot,
                    thresholds,
                    fail_on_inconclusive: plan.fail_on_inconclusive,
                    iterations_completed: 0,
                    iterations_failed: 0,
                    iterations_interrupted: 0,
                    checks_passed: 0,
                    checks_failed: 0,
                    forced_aborts: 0,
                    scenarios,
                    setup_error: Some(err),
                    teardown_error: None,
                    elapsed: started.elapsed(),
                });
            }
        };

        let iteration = Arc::new(iteration);
        let iteration: IterationFn<C> = Arc::new(move |ctx| -> IterationFuture {
            let fut = iteration(ctx);
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });

        let gauges = VuGauges {
            vus: registry.handle_for(names::VUS, MetricKind::Gauge, &[] as &[(&str, &str)])?,
            vus_max: registry.handle_for(
                names::VUS_MAX,
                MetricKind::Gauge,
                &[] as &[(&str, &str)],
            )?,
        };

        let run_start = Instant::now();
        let run_abort = CancellationToken::new();
        let shared = RunShared {
            run: run.clone(),
            iteration,
            sink: sink.clone(),
            gauges,
            next_vu_id: Arc::new(AtomicU64::new(1)),
            run_start,
            run_abort: run_abort.clone(),
        };

        let mut stats = Vec::with_capacity(plan.scenarios.len());
        let mut sources = Vec::with_capacity(plan.scenarios.len());
        let mut tasks = Vec::with_capacity(plan.scenarios.len());
        for config in &plan.scenarios {
            let scenario_stats = Arc::new(ScenarioStats::default());
            sources.push(ProgressSource {
                name: config.name.clone(),
                executor: Executor::new(config),
                stats: scenario_stats.clone(),
            });
            let supervisor =
                ScenarioSupervisor::new(config.clone(), scenario_stats.clone(), shared.clone());
            tasks.push(tokio::spawn(supervisor.run()));
            stats.push(scenario_stats);
        }
        drop(shared);

        let progress_stop = CancellationToken::new();
        let progress_task = progress.map(|on_progress| {
            tokio::spawn(progress::report(
                sources,
                run_start,
                plan.progress_interval,
                on_progress,
                progress_stop.clone(),
            ))
        });

        // A deadline past the clock's range never fires.
        let deadline = plan.max_duration.and_then(|d| run_start.checked_add(d));
        let scenarios_done = async {
            let mut finished = Vec::with_capacity(tasks.len());
            for (task, config) in tasks.into_iter().zip(&plan.scenarios) {
                match task.await {
                    Ok(summary) => finished.push(Some(summary)),
                    Err(err) => {
                        tracing::error!(scenario = %config.name, error = %err, "scenario task failed");
                        finished.push(None);
                    }
                }
            }
            finished
        };
        tokio::pin!(scenarios_done);

        let timeout = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let mut forced = false;
        let finished = tokio::select! {
            finished = &mut scenarios_done => finished,
            _ = timeout => {
                forced = true;
                tracing::warn!(
                    max_duration = ?plan.max_duration,
                    "run max duration reached; aborting in-flight iterations"
                );
                run_abort.cancel();
                scenarios_done.await
            }
        };

        progress_stop.cancel();
        if let Some(task) = progress_task {
            let _ = task.await;
        }

        let scenarios: Vec<ScenarioSummary> = finished
            .into_iter()
            .zip(stats.iter().zip(&plan.scenarios))
            .map(|(summary, (stats, config))| {
                summary.unwrap_or_else(|| {
                    let mut fallback = stats.summary(config);
                    fallback.state = ExecutorState::Done;
                    fallback
                })
            })
            .collect();

        let snapshot = registry.snapshot();
        let report = thresholds::evaluate(&snapshot, &plan.thresholds);
        let checks = snapshot.rate(names::CHECKS).unwrap_or_default();

        let teardown_error = match teardown {
            Some(teardown) => {
                let ctx = HookContext {
                    scope: MetricScope::new(TEARDOWN_SCENARIO, &[]),
                    sink,
                };
                match join_hook(tokio::spawn(teardown(ctx, run.clone()))).await {
                    Ok(()) => {
                        tracing::info!("teardown completed");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "teardown failed");
                        Some(err)
                    }
                }
            }
            None => None,
        };
        drop(run);

        let status = if forced {
            RunStatus::ForcedAbort
        } else {
            RunStatus::Completed
        };
        let result = RunResult {
            status,
            fail_on_inconclusive: plan.fail_on_inconclusive,
            iterations_completed: scenarios.iter().map(|s| s.iterations_completed).sum(),
            iterations_failed: scenarios.iter().map(|s| s.iterations_failed).sum(),
            iterations_interrupted: scenarios.iter().map(|s| s.iterations_interrupted).sum(),
            checks_passed: checks.hits,
            checks_failed: checks.misses(),
            forced_aborts: scenarios.iter().map(|s| s.forced_aborts).sum(),
            scenarios,
            setup_error: None,
            teardown_error,
            elapsed: run_start.elapsed(),
            snapshot,
            thresholds: report,
        };

        tracing::info!(
            status = %result.status,
            iterations = result.iterations_completed,
            failed = result.iterations_failed,
            elapsed = ?result.elapsed,
            "run finished"
        );
        Ok(result)
    }
}

async fn join_hook<T>(
    task: tokio::task::JoinHandle<std::result::Result<T, String>>,
) -> std::result::Result<T, String> {
    match task.await {
        Ok(res) => res,
        Err(err) if err.is_panic() => Err("hook panicked".to_string()),
        Err(err) => Err(err.to_string()),
    }
}
