use stampede_core::{RunResult, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more required thresholds failed.
    ThresholdsFailed = 11,

    /// More transactions were admitted than the plan's `admissibleSuccesses`.
    RaceDetected = 13,

    /// Setup (login) failed; no scenario ran.
    SetupFailed = 20,

    /// The run-level `maxDuration` elapsed and in-flight iterations were aborted.
    ForcedAbort = 21,

    /// Invalid CLI/config/plan (bad flags, invalid durations, invalid thresholds syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Most severe outcome wins: setup failure, forced abort, race, then thresholds.
    #[must_use]
    pub fn from_outcome(result: &RunResult, race_detected: bool) -> Self {
        match result.status {
            RunStatus::SetupFailed => Self::SetupFailed,
            RunStatus::ForcedAbort => Self::ForcedAbort,
            RunStatus::Completed if race_detected => Self::RaceDetected,
            RunStatus::Completed if !result.thresholds_passed() => Self::ThresholdsFailed,
            RunStatus::Completed => Self::Success,
        }
    }
}
