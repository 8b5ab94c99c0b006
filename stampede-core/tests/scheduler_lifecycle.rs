use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stampede_core::config::{ConfigError, ScenarioConfig, ScenarioExecutor};
use stampede_core::{Error, ExecutorState, RunPlan, RunStatus, Scheduler};
use stampede_metrics::{Registry, SeriesValues};
use tokio::time::Instant;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn constant(name: &str, vus: u64, duration: Duration) -> ScenarioConfig {
    ScenarioConfig {
        name: name.to_string(),
        tags: Vec::new(),
        start_offset: Duration::ZERO,
        graceful_stop: Duration::from_secs(30),
        executor: ScenarioExecutor::ConstantVus { vus, duration },
    }
}

fn gauge(values: Option<SeriesValues>) -> i64 {
    match values {
        Some(SeriesValues::Gauge(v)) => v,
        other => panic!("expected gauge, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn constant_vus_keeps_exactly_n_vus_busy() {
    let registry = Arc::new(Registry::default());
    let per_vu: Arc<Mutex<BTreeMap<u64, u64>>> = Arc::default();
    let in_flight = Arc::new(AtomicU64::new(0));
    let peak = Arc::new(AtomicU64::new(0));

    let plan = RunPlan::new(vec![constant("steady", 5, Duration::from_secs(1))]);
    let result = Scheduler::new(plan, registry.clone())
        .run({
            let per_vu = per_vu.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move |ctx| {
                let per_vu = per_vu.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    ctx.sleep(ms(100)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    *per_vu
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .entry(ctx.vu_id())
                        .or_default() += 1;
                    Ok::<(), Infallible>(())
                }
            }
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(peak.load(Ordering::SeqCst), 5);

    let per_vu = per_vu.lock().unwrap_or_else(|e| e.into_inner()).clone();
    assert_eq!(per_vu.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert!(per_vu.values().all(|n| *n >= 1));

    let scenario = result
        .scenario("steady")
        .unwrap_or_else(|| panic!("missing scenario summary"));
    assert_eq!(scenario.vus_spawned, 5);
    assert_eq!(scenario.state, ExecutorState::Done);
    assert_eq!(scenario.iterations_failed, 0);
    assert_eq!(
        scenario.iterations_completed,
        per_vu.values().sum::<u64>()
    );
    assert!((45..=55).contains(&result.iterations_completed));

    let snapshot = &result.snapshot;
    assert_eq!(
        snapshot.counter("iterations", &[("status", "success")]),
        result.iterations_completed
    );
    assert_eq!(gauge(snapshot.merged("vus_max")), 5);
    assert_eq!(gauge(snapshot.merged("vus")), 0);
    let durations = snapshot
        .trend("iteration_duration")
        .unwrap_or_else(|| panic!("missing iteration_duration"));
    assert_eq!(durations.count(), result.iterations_completed);
}

#[tokio::test(start_paused = true)]
async fn setup_failure_runs_no_iteration_and_skips_teardown() {
    let registry = Arc::new(Registry::default());
    let calls = Arc::new(AtomicU64::new(0));
    let teardown_ran = Arc::new(AtomicBool::new(false));

    let plan = RunPlan::new(vec![constant("never", 3, Duration::from_secs(5))]);
    let result = Scheduler::new(plan, registry)
        .with_setup(|_ctx| async { Err::<String, _>("login rejected") })
        .with_teardown({
            let teardown_ran = teardown_ran.clone();
            move |_ctx, _run| async move {
                teardown_ran.store(true, Ordering::SeqCst);
                Ok::<(), Infallible>(())
            }
        })
        .run({
            let calls = calls.clone();
            move |_ctx| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Infallible>(())
                }
            }
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::SetupFailed);
    assert_eq!(result.setup_error.as_deref(), Some("login rejected"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!teardown_ran.load(Ordering::SeqCst));
    assert_eq!(result.iterations_completed, 0);
    assert_eq!(result.scenarios[0].state, ExecutorState::Pending);
    assert_eq!(result.scenarios[0].vus_spawned, 0);
}

#[tokio::test(start_paused = true)]
async fn setup_context_reaches_iterations_and_teardown_error_is_reported() {
    let registry = Arc::new(Registry::default());
    let teardown_saw: Arc<Mutex<Option<String>>> = Arc::default();

    let plan = RunPlan::new(vec![constant("ctx", 2, ms(300))]);
    let result = Scheduler::new(plan, registry)
        .with_setup(|_ctx| async { Ok::<_, Infallible>("token-123".to_string()) })
        .with_teardown({
            let teardown_saw = teardown_saw.clone();
            move |_ctx, run: Arc<String>| async move {
                *teardown_saw.lock().unwrap_or_else(|e| e.into_inner()) = Some((*run).clone());
                Err::<(), _>("cleanup failed")
            }
        })
        .run(|ctx| async move {
            if ctx.run() != "token-123" {
                return Err(format!("unexpected context {}", ctx.run()));
            }
            ctx.sleep(ms(50)).await;
            Ok(())
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.iterations_completed > 0);
    assert_eq!(result.iterations_failed, 0);
    assert_eq!(result.teardown_error.as_deref(), Some("cleanup failed"));
    assert_eq!(
        teardown_saw
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref(),
        Some("token-123")
    );
}

#[tokio::test(start_paused = true)]
async fn run_max_duration_force_aborts_in_flight_iterations() {
    let registry = Arc::new(Registry::default());
    let plan = RunPlan::new(vec![constant("stuck", 2, Duration::from_secs(10))])
        .with_max_duration(Duration::from_secs(3));

    let started = Instant::now();
    let result = Scheduler::new(plan, registry)
        .run(|ctx| async move {
            ctx.sleep(Duration::from_secs(3600)).await;
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::ForcedAbort);
    assert_eq!(result.forced_aborts, 2);
    assert_eq!(result.iterations_completed, 0);
    assert_eq!(result.iterations_interrupted, 2);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn failing_and_panicking_iterations_do_not_stop_the_vu() {
    let registry = Arc::new(Registry::default());
    let plan = RunPlan::new(vec![constant("flaky", 2, Duration::from_secs(1))]);

    let result = Scheduler::new(plan, registry)
        .run(|ctx| async move {
            ctx.sleep(ms(10)).await;
            match ctx.iteration() % 3 {
                0 => panic!("iteration {} blew up", ctx.iteration()),
                1 => Err("boom".to_string()),
                _ => Ok(()),
            }
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.scenarios[0].vus_spawned, 2);
    assert!(result.iterations_completed > 0);
    assert!(result.iterations_failed >= 2 * result.iterations_completed);
    assert_eq!(
        result
            .snapshot
            .counter("iterations", &[("status", "failure")]),
        result.iterations_failed
    );
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_interrupts_iterations_that_overrun_it() {
    let registry = Arc::new(Registry::default());
    let mut scenario = constant("slow", 1, Duration::from_secs(1));
    scenario.graceful_stop = ms(500);

    let started = Instant::now();
    let result = Scheduler::new(RunPlan::new(vec![scenario]), registry)
        .run(|ctx| async move {
            ctx.sleep(Duration::from_secs(10)).await;
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.iterations_interrupted, 1);
    assert_eq!(result.forced_aborts, 0);
    assert_eq!(result.iterations_completed, 0);
    let waited = started.elapsed();
    assert!(waited >= ms(1500) && waited < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_lets_the_current_iteration_finish() {
    let registry = Arc::new(Registry::default());
    let mut scenario = constant("overlap", 1, Duration::from_secs(1));
    scenario.graceful_stop = Duration::from_secs(5);

    let result = Scheduler::new(RunPlan::new(vec![scenario]), registry)
        .run(|ctx| async move {
            ctx.sleep(ms(700)).await;
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    // 0..700ms and 700..1400ms; the second one straddles the end of the active window.
    assert_eq!(result.iterations_completed, 2);
    assert_eq!(result.iterations_interrupted, 0);
}

#[tokio::test(start_paused = true)]
async fn shared_iterations_runs_the_exact_budget() {
    let registry = Arc::new(Registry::default());
    let vus_seen: Arc<Mutex<BTreeSet<u64>>> = Arc::default();
    let scenario = ScenarioConfig {
        name: "batch".to_string(),
        tags: vec![("kind".to_string(), "batch".to_string())],
        start_offset: Duration::ZERO,
        graceful_stop: Duration::from_secs(30),
        executor: ScenarioExecutor::SharedIterations {
            vus: 3,
            iterations: 10,
            max_duration: Duration::from_secs(60),
        },
    };

    let started = Instant::now();
    let result = Scheduler::new(RunPlan::new(vec![scenario]), registry)
        .run({
            let vus_seen = vus_seen.clone();
            move |ctx| {
                let vus_seen = vus_seen.clone();
                async move {
                    vus_seen
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(ctx.vu_id());
                    ctx.sleep(ms(100)).await;
                    Ok::<(), Infallible>(())
                }
            }
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.iterations_completed, 10);
    assert_eq!(result.scenarios[0].state, ExecutorState::Done);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(vus_seen.lock().unwrap_or_else(|e| e.into_inner()).len(), 3);
    assert_eq!(
        result
            .snapshot
            .counter("iterations", &[("scenario", "batch"), ("kind", "batch")]),
        10
    );
}

#[tokio::test(start_paused = true)]
async fn scenarios_run_concurrently_with_offsets_and_run_wide_vu_ids() {
    let registry = Arc::new(Registry::default());
    let mut late = constant("late", 3, Duration::from_secs(1));
    late.start_offset = Duration::from_secs(2);
    let plan = RunPlan::new(vec![constant("early", 2, Duration::from_secs(1)), late]);

    let first_start: Arc<Mutex<BTreeMap<(String, u64), Duration>>> = Arc::default();
    let t0 = Instant::now();
    let result = Scheduler::new(plan, registry)
        .run({
            let first_start = first_start.clone();
            move |ctx| {
                let first_start = first_start.clone();
                async move {
                    first_start
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .entry((ctx.scenario().to_string(), ctx.vu_id()))
                        .or_insert_with(|| t0.elapsed());
                    ctx.sleep(ms(100)).await;
                    Ok::<(), Infallible>(())
                }
            }
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::Completed);
    let first_start = first_start.lock().unwrap_or_else(|e| e.into_inner()).clone();

    let ids = |scenario: &str| -> BTreeSet<u64> {
        first_start
            .keys()
            .filter(|(s, _)| s == scenario)
            .map(|(_, id)| *id)
            .collect()
    };
    assert_eq!(ids("early"), BTreeSet::from([1, 2]));
    assert_eq!(ids("late"), BTreeSet::from([3, 4, 5]));

    for ((scenario, _), at) in &first_start {
        if scenario == "late" {
            assert!(*at >= Duration::from_secs(2), "late VU started at {at:?}");
        } else {
            assert!(*at < Duration::from_secs(1));
        }
    }
}

#[tokio::test]
async fn empty_plan_is_rejected() {
    let registry = Arc::new(Registry::default());
    let err = match Scheduler::new(RunPlan::new(Vec::new()), registry)
        .run(|_ctx| async { Ok::<(), Infallible>(()) })
        .await
    {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Config(ConfigError::NoScenarios)));
}

#[tokio::test(start_paused = true)]
async fn max_duration_beyond_the_clock_range_never_fires() {
    let registry = Arc::new(Registry::default());
    let plan = RunPlan::new(vec![constant("short", 1, ms(500))])
        .with_max_duration(Duration::from_secs(u64::MAX));

    let result = Scheduler::new(plan, registry)
        .run(|ctx| async move {
            ctx.sleep(ms(100)).await;
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.forced_aborts, 0);
    assert!(result.iterations_completed >= 1);
}

#[tokio::test]
async fn zero_progress_interval_is_rejected() {
    let registry = Arc::new(Registry::default());
    let plan =
        RunPlan::new(vec![constant("steady", 1, ms(100))]).with_progress_interval(Duration::ZERO);
    let err = match Scheduler::new(plan, registry)
        .with_progress(|_update: stampede_core::ProgressUpdate| {})
        .run(|_ctx| async { Ok::<(), Infallible>(()) })
        .await
    {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    assert!(matches!(err, Error::Config(ConfigError::InvalidProgressInterval)));
}
