mod budget;
mod context;
mod error;
mod executor;
mod progress;
mod request;
mod scenario;
mod schedule;
mod scheduler;
mod scope;
mod summary;
mod vu;

pub mod config;
pub mod thresholds;

#[cfg(test)]
mod test_support;

pub use budget::IterationBudget;
pub use context::{HookContext, IterationContext};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorState, Step};
pub use progress::{
    DEFAULT_PROGRESS_INTERVAL, ProgressFn, ProgressUpdate, ScenarioProgress, StageProgress,
};
pub use request::{
    CheckResult, DEFAULT_REQUEST_TIMEOUT, Predicate, Request, RequestRunner, Response, Transport,
    TransportError, check,
};
pub use scenario::ScenarioSummary;
pub use schedule::{RampSchedule, StageSnapshot};
pub use scheduler::{RunPlan, Scheduler};
pub use scope::{MetricScope, SETUP_SCENARIO, TEARDOWN_SCENARIO, names};
pub use summary::{RunResult, RunStatus};
pub use thresholds::{Threshold, ThresholdOutcome, ThresholdReport, Verdict};
