use std::time::Duration;

use stampede_metrics::Snapshot;

use crate::scenario::ScenarioSummary;
use crate::thresholds::ThresholdReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RunStatus {
    Completed,
    /// The run-level `max_duration` elapsed and in-flight iterations were cancelled.
    ForcedAbort,
    /// Setup failed; no scenario ran.
    SetupFailed,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    /// Taken after every scenario finished and before teardown ran.
    pub snapshot: Snapshot,
    pub thresholds: ThresholdReport,
    pub fail_on_inconclusive: bool,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    /// In-flight iterations cancelled by the run-level safety timeout.
    pub forced_aborts: u64,
    pub scenarios: Vec<ScenarioSummary>,
    pub setup_error: Option<String>,
    pub teardown_error: Option<String>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.passed(self.fail_on_inconclusive)
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioSummary> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}
