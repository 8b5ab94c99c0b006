use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stampede_core::config::{ScenarioConfig, ScenarioExecutor};
use stampede_core::{Executor, ProgressFn, ScenarioProgress};

mod format;
mod progress;
mod summary;

use format::{format_duration, format_ms};
use progress::HumanProgress;

use super::{OutputFormatter, RunReport};
use crate::workload::Target;

type Windows = HashMap<String, (Duration, Duration)>;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
    /// Active window of every time-bounded scenario, relative to the run start.
    windows: Arc<Mutex<Windows>>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, target: &Target, scenarios: &[ScenarioConfig]) {
        println!("plan: {}", plan_path.display());
        println!("target: {}", target.base_url);
        if let Some(t) = target.timeout {
            println!("request timeout: {}", format_ms(t.as_secs_f64() * 1000.0));
        }

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for s in scenarios {
            println!("scenario: {} {}", s.name, describe_executor(&s.executor));
            if !matches!(s.executor, ScenarioExecutor::SharedIterations { .. }) {
                windows.insert(
                    s.name.clone(),
                    (s.start_offset, Executor::new(s).active_until()),
                );
            }
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        let windows = self.windows.clone();

        Some(Arc::new(move |u| {
            let windows = windows
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for s in &u.scenarios {
                progress.update(
                    &s.name,
                    windows.get(&s.name).copied(),
                    u.elapsed,
                    progress_message(s, u.elapsed),
                );
            }
        }))
    }

    fn print_summary(&self, report: &RunReport<'_>) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", summary::render(report));

        let failed: Vec<_> = report
            .result
            .thresholds
            .outcomes
            .iter()
            .filter(|o| o.threshold.required && o.verdict == stampede_core::Verdict::Fail)
            .collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for o in failed {
                match o.observed {
                    Some(v) => eprintln!(
                        "  {}: {} (observed {v})",
                        o.threshold.target(),
                        o.threshold.source
                    ),
                    None => eprintln!(
                        "  {}: {} (not applicable)",
                        o.threshold.target(),
                        o.threshold.source
                    ),
                }
            }
        }
        Ok(())
    }
}

fn describe_executor(executor: &ScenarioExecutor) -> String {
    match executor {
        ScenarioExecutor::ConstantVus { vus, duration } => {
            format!("exec=constant-vus vus={vus} duration={}", format_duration(*duration))
        }
        ScenarioExecutor::RampingVus {
            start_vus,
            stages,
            ramp,
        } => {
            let stages = stages
                .iter()
                .map(|s| format!("{}->{}", format_duration(s.duration), s.target))
                .collect::<Vec<_>>()
                .join(",");
            format!("exec=ramping-vus start_vus={start_vus} ramp={ramp} stages=[{stages}]")
        }
        ScenarioExecutor::SharedIterations {
            vus,
            iterations,
            max_duration,
        } => format!(
            "exec=shared-iterations vus={vus} iterations={iterations} max_duration={}",
            format_duration(*max_duration)
        ),
    }
}

fn progress_message(s: &ScenarioProgress, elapsed: Duration) -> String {
    let mut msg = format!(
        "{} vus={} iters={} failed={} elapsed={}",
        s.state.name(),
        s.active_vus,
        s.iterations_completed,
        s.iterations_failed,
        format_duration(elapsed)
    );
    if let Some(stage) = &s.stage {
        msg.push_str(&format!(
            " stage={}/{} target={} stage_remaining={}",
            stage.stage,
            stage.stages,
            stage.current_target,
            format_duration(stage.stage_remaining)
        ));
    }
    msg
}
