//! Scenario executor state machine.
//!
//! An [`Executor`] is a pure function of time since the run start: it says which state a
//! scenario is in, how many VUs should be live, and when to look again. The scenario supervisor
//! owns the side effects (spawning and retiring VUs).

use std::time::Duration;

use crate::config::{ScenarioConfig, ScenarioExecutor};
use crate::schedule::{RampSchedule, StageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorState {
    Pending,
    Running,
    Ramping { stage: usize },
    Draining,
    Done,
}

impl ExecutorState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Ramping { .. } => "ramping",
            Self::Draining => "draining",
            Self::Done => "done",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Ramping { .. })
    }
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ramping { stage } => write!(f, "ramping(stage {})", stage + 1),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: ExecutorState,
    pub desired_vus: u64,
    /// When the outcome of `advance` can next change. `None` once `Done`.
    pub recheck_in: Option<Duration>,
}

#[derive(Debug, Clone)]
enum Shape {
    Constant { vus: u64, duration: Duration },
    Ramping { schedule: RampSchedule },
    SharedIterations { vus: u64, max_duration: Duration },
}

impl Shape {
    fn active_duration(&self) -> Duration {
        match self {
            Self::Constant { duration, .. } => *duration,
            Self::Ramping { schedule } => schedule.total_duration(),
            Self::SharedIterations { max_duration, .. } => *max_duration,
        }
    }
}

/// Time-driven view of one scenario's executor.
#[derive(Debug, Clone)]
pub struct Executor {
    start_offset: Duration,
    graceful_stop: Duration,
    shape: Shape,
}

impl Executor {
    pub fn new(config: &ScenarioConfig) -> Self {
        let shape = match &config.executor {
            ScenarioExecutor::ConstantVus { vus, duration } => Shape::Constant {
                vus: *vus,
                duration: *duration,
            },
            ScenarioExecutor::RampingVus {
                start_vus,
                stages,
                ramp,
            } => Shape::Ramping {
                schedule: RampSchedule::new(*start_vus, stages.clone(), *ramp),
            },
            ScenarioExecutor::SharedIterations {
                vus, max_duration, ..
            } => Shape::SharedIterations {
                vus: *vus,
                max_duration: *max_duration,
            },
        };

        Self {
            start_offset: config.start_offset,
            graceful_stop: config.graceful_stop,
            shape,
        }
    }

    /// Elapsed run time at which the active window closes and draining begins.
    pub fn active_until(&self) -> Duration {
        self.start_offset
            .saturating_add(self.shape.active_duration())
    }

    /// Elapsed run time after which in-flight iterations are aborted.
    pub fn hard_stop_at(&self) -> Duration {
        self.active_until().saturating_add(self.graceful_stop)
    }

    pub fn advance(&self, elapsed: Duration) -> Step {
        if elapsed < self.start_offset {
            return Step {
                state: ExecutorState::Pending,
                desired_vus: 0,
                recheck_in: Some(self.start_offset - elapsed),
            };
        }

        let active_until = self.active_until();
        if elapsed >= active_until {
            let hard_stop = self.hard_stop_at();
            if elapsed >= hard_stop {
                return Step {
                    state: ExecutorState::Done,
                    desired_vus: 0,
                    recheck_in: None,
                };
            }
            return Step {
                state: ExecutorState::Draining,
                desired_vus: 0,
                recheck_in: Some(hard_stop - elapsed),
            };
        }

        let local = elapsed - self.start_offset;
        let until_drain = active_until - elapsed;
        match &self.shape {
            Shape::Constant { vus, .. } | Shape::SharedIterations { vus, .. } => Step {
                state: ExecutorState::Running,
                desired_vus: *vus,
                recheck_in: Some(until_drain),
            },
            Shape::Ramping { schedule } => Step {
                state: ExecutorState::Ramping {
                    stage: schedule.stage_index_at(local).unwrap_or(0),
                },
                desired_vus: schedule.target_at(local),
                recheck_in: Some(schedule.next_change_in(local).min(until_drain)),
            },
        }
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        self.advance(elapsed).state == ExecutorState::Done
    }

    /// Stage position for progress reporting; `None` for non-ramping executors.
    pub fn stage_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        match &self.shape {
            Shape::Ramping { schedule } => {
                schedule.stage_snapshot_at(elapsed.saturating_sub(self.start_offset))
            }
            _ => None,
        }
    }

    pub fn is_ramping(&self) -> bool {
        matches!(self.shape, Shape::Ramping { .. })
    }
}
