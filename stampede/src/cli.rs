use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Accepts humantime strings (`10s`, `250ms`, `1m30s`) or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m): {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars on stderr and a summary table on stdout.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and a final summary document to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Concurrent load generator for the transaction API",
    long_about = "stampede drives concurrent virtual users against a transaction API.\n\nA YAML run plan declares the target, one or more scenarios (constant-vus, ramping-vus, shared-iterations) and thresholds. Every virtual user logs in once per run (setup) and then creates transactions back-to-back.\n\nLogging goes to stderr; use -v or RUST_LOG to raise verbosity.",
    after_help = "Examples:\n  stampede run plans/spike.yaml\n  stampede run plans/spike.yaml --vus 50 --duration 30s\n  stampede run plans/spike.yaml --base-url http://localhost:8080/api --output json\n  stampede validate plans/spike.yaml"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test plan
    #[command(
        long_about = "Run a YAML plan: log in once, run every scenario concurrently, evaluate thresholds and report.\n\nCLI flags override values from the plan."
    )]
    Run(RunArgs),

    /// Parse and validate a plan without sending any request
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the run plan (.yaml)
    pub plan: PathBuf,

    /// Override the target's base URL
    #[arg(long, env = "STAMPEDE_BASE_URL")]
    pub base_url: Option<String>,

    /// Number of virtual users (ramping scenarios run as constant VUs)
    #[arg(long)]
    pub vus: Option<u64>,

    /// Scenario duration (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Seed for the request parameter generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the run plan (.yaml)
    pub plan: PathBuf,
}
