use std::time::Duration;

use crate::config::{RampPolicy, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise VU target over time. `elapsed` is measured from the scenario's own start.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
    ramp: RampPolicy,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>, ramp: RampPolicy) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
            ramp,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage active at `elapsed`. Stage ends are exclusive.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        if self.stages.is_empty() || elapsed >= self.total_duration() {
            return None;
        }
        Some(self.cumulative_ends.partition_point(|end| *end <= elapsed))
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration) {
        let end = self.cumulative_ends[idx];
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, end)
    }

    fn start_target_of(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(idx) = self.stage_index_at(elapsed) else {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        };

        let end_target = self.stages[idx].target;
        if self.ramp == RampPolicy::Immediate {
            return end_target;
        }

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return end_target;
        }
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let start_i = self.start_target_of(idx) as i128;
        let delta = end_target as i128 - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);
        let idx = self
            .stage_index_at(clamped)
            .unwrap_or(self.stages.len().saturating_sub(1));

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: self.start_target_of(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(clamped),
        })
    }

    /// Time until the target next changes, capped at the end of the current stage.
    pub fn next_change_in(&self, elapsed: Duration) -> Duration {
        let Some(idx) = self.stage_index_at(elapsed) else {
            return Duration::ZERO;
        };

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let until_stage_end = stage_end.saturating_sub(elapsed);

        let start_target = self.start_target_of(idx);
        let end_target = self.stages[idx].target;
        if self.ramp == RampPolicy::Immediate || start_target == end_target {
            return until_stage_end;
        }

        // Solve for the first t where the interpolated target moves off its current value.
        let current = self.target_at(elapsed) as i128;
        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let want = if delta > 0 { current + 1 } else { current - 1 };

        let stage_ns = stage_end.saturating_sub(stage_start).as_nanos() as i128;
        let elapsed_ns = elapsed.saturating_sub(stage_start).as_nanos() as i128;

        // |target(t) - start| = floor(|delta| * t / stage); take the ceiling of the inverse.
        let needed = (want - start_i).abs();
        let needed_ns = (needed.saturating_mul(stage_ns) + delta.abs() - 1) / delta.abs();
        let wait_ns = needed_ns.saturating_sub(elapsed_ns).max(1);
        let wait = Duration::from_nanos(wait_ns.min(u64::MAX as i128) as u64);

        wait.min(until_stage_end)
    }
}
