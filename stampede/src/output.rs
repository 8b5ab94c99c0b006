use std::path::Path;

use stampede_core::config::ScenarioConfig;
use stampede_core::{ProgressFn, RunResult};

use crate::cli::OutputFormat;
use crate::exit_codes::ExitCode;
use crate::workload::{RaceReport, Target};

mod human;
mod json;

/// Everything the final summary shows.
pub(crate) struct RunReport<'a> {
    pub result: &'a RunResult,
    pub race: RaceReport,
    pub exit_code: ExitCode,
}

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, target: &Target, scenarios: &[ScenarioConfig]);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, report: &RunReport<'_>) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
