use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use stampede_core::config::ScenarioConfig;
use stampede_core::{ProgressFn, ProgressUpdate, RunResult};
use stampede_metrics::SeriesValues;

use super::{OutputFormatter, RunReport};
use crate::workload::{RaceReport, Target};

/// NDJSON on stdout: one `progress` line per tick and a final `summary` line.
pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _target: &Target, _scenarios: &[ScenarioConfig]) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, report: &RunReport<'_>) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(report));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub active_vus: u64,
    pub scenarios: Vec<JsonScenarioProgress>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioProgress {
    pub name: String,
    pub state: &'static str,
    pub active_vus: u64,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vus: Option<u64>,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        active_vus: u.total_active_vus(),
        scenarios: u
            .scenarios
            .iter()
            .map(|s| JsonScenarioProgress {
                name: s.name.clone(),
                state: s.state.name(),
                active_vus: s.active_vus,
                iterations_completed: s.iterations_completed,
                iterations_failed: s.iterations_failed,
                stage: s.stage.map(|st| st.stage),
                stages: s.stage.map(|st| st.stages),
                target_vus: s.stage.map(|st| st.current_target),
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub status: String,
    pub exit_code: i32,
    pub elapsed_secs: f64,
    pub iterations: JsonIterations,
    pub checks: JsonChecks,
    pub forced_aborts: u64,
    pub scenarios: Vec<JsonScenarioSummary>,
    pub metrics: BTreeMap<String, JsonMetric>,
    pub thresholds: Vec<JsonThreshold>,
    pub race: RaceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonIterations {
    pub completed: u64,
    pub failed: u64,
    pub interrupted: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonChecks {
    pub passed: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioSummary {
    pub name: String,
    pub executor: String,
    pub state: &'static str,
    pub vus_spawned: u64,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub forced_aborts: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Counter {
        value: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        rate: f64,
        hits: u64,
        total: u64,
    },
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl From<SeriesValues> for JsonMetric {
    fn from(values: SeriesValues) -> Self {
        match values {
            SeriesValues::Counter(value) => Self::Counter { value },
            SeriesValues::Gauge(value) => Self::Gauge { value },
            SeriesValues::Rate(r) => Self::Rate {
                rate: r.rate(),
                hits: r.hits,
                total: r.total,
            },
            SeriesValues::Trend(t) => {
                let s = t.summary();
                Self::Trend {
                    count: s.count,
                    min: s.min,
                    max: s.max,
                    avg: s.avg,
                    med: s.med,
                    p90: s.p90,
                    p95: s.p95,
                    p99: s.p99,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub required: bool,
    pub verdict: String,
    pub observed: Option<f64>,
}

fn build_summary_line(report: &RunReport<'_>) -> JsonSummaryLine {
    let result: &RunResult = report.result;
    let snapshot = &result.snapshot;

    let metrics = snapshot
        .metric_names()
        .into_iter()
        .filter_map(|name| {
            snapshot
                .merged(name)
                .map(|values| (name.to_string(), JsonMetric::from(values)))
        })
        .collect();

    JsonSummaryLine {
        kind: "summary",
        status: result.status.to_string(),
        exit_code: report.exit_code.as_i32(),
        elapsed_secs: result.elapsed.as_secs_f64(),
        iterations: JsonIterations {
            completed: result.iterations_completed,
            failed: result.iterations_failed,
            interrupted: result.iterations_interrupted,
        },
        checks: JsonChecks {
            passed: result.checks_passed,
            failed: result.checks_failed,
        },
        forced_aborts: result.forced_aborts,
        scenarios: result
            .scenarios
            .iter()
            .map(|s| JsonScenarioSummary {
                name: s.name.clone(),
                executor: s.executor.to_string(),
                state: s.state.name(),
                vus_spawned: s.vus_spawned,
                iterations_completed: s.iterations_completed,
                iterations_failed: s.iterations_failed,
                iterations_interrupted: s.iterations_interrupted,
                forced_aborts: s.forced_aborts,
            })
            .collect(),
        metrics,
        thresholds: result
            .thresholds
            .outcomes
            .iter()
            .map(|o| JsonThreshold {
                metric: o.threshold.target(),
                expression: o.threshold.source.clone(),
                required: o.threshold.required,
                verdict: o.verdict.to_string(),
                observed: o.observed,
            })
            .collect(),
        race: report.race,
        setup_error: result.setup_error.clone(),
        teardown_error: result.teardown_error.clone(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use stampede_core::{
        ExecutorState, RunStatus, ScenarioProgress, Threshold, ThresholdOutcome,
        ThresholdReport, Verdict,
    };
    use stampede_metrics::{MetricSink, Observation, Registry};

    use super::*;
    use crate::exit_codes::ExitCode;

    fn to_value<T: Serialize>(line: &T) -> Value {
        match serde_json::to_value(line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        }
    }

    #[test]
    fn progress_line_has_kind_and_scenarios() {
        let update = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_millis(3000),
            scenarios: vec![ScenarioProgress {
                name: "steady".to_string(),
                state: ExecutorState::Running,
                active_vus: 5,
                stage: None,
                iterations_completed: 12,
                iterations_failed: 1,
            }],
        };

        let v = to_value(&build_progress_line(&update));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("active_vus").and_then(Value::as_u64), Some(5));
        assert_eq!(
            v.pointer("/scenarios/0/state").and_then(Value::as_str),
            Some("running")
        );
        assert!(v.pointer("/scenarios/0/stage").is_none());
    }

    #[test]
    fn summary_line_carries_metrics_thresholds_and_race() {
        let registry = Registry::default();
        registry.record(Observation::counter("transactions_created", 2));
        registry.record(Observation::rate("http_req_failed", false));
        registry.record(Observation::rate("http_req_failed", true));
        registry.record(Observation::trend("http_req_duration", 10.0));
        registry.record(Observation::trend("http_req_duration", 30.0));

        let threshold = Threshold::parse("http_req_failed", "rate<0.1", true)
            .unwrap_or_else(|e| panic!("{e}"));
        let result = RunResult {
            status: RunStatus::Completed,
            snapshot: registry.snapshot(),
            thresholds: ThresholdReport {
                outcomes: vec![ThresholdOutcome {
                    threshold,
                    verdict: Verdict::Fail,
                    observed: Some(0.5),
                }],
            },
            fail_on_inconclusive: false,
            iterations_completed: 2,
            iterations_failed: 0,
            iterations_interrupted: 0,
            checks_passed: 0,
            checks_failed: 0,
            forced_aborts: 0,
            scenarios: Vec::new(),
            setup_error: None,
            teardown_error: None,
            elapsed: Duration::from_secs(1),
        };
        let report = RunReport {
            result: &result,
            race: RaceReport {
                created: 2,
                rejected: 0,
                admissible: 1,
                detected: true,
            },
            exit_code: ExitCode::RaceDetected,
        };

        let v = to_value(&build_summary_line(&report));
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("exit_code").and_then(Value::as_i64), Some(13));
        assert_eq!(v.get("status").and_then(Value::as_str), Some("completed"));
        assert_eq!(
            v.pointer("/metrics/transactions_created/type")
                .and_then(Value::as_str),
            Some("counter")
        );
        assert_eq!(
            v.pointer("/metrics/http_req_failed/rate")
                .and_then(Value::as_f64),
            Some(0.5)
        );
        assert_eq!(
            v.pointer("/metrics/http_req_duration/count")
                .and_then(Value::as_u64),
            Some(2)
        );
        assert_eq!(
            v.pointer("/metrics/http_req_duration/max")
                .and_then(Value::as_f64),
            Some(30.0)
        );
        assert_eq!(
            v.pointer("/thresholds/0/verdict").and_then(Value::as_str),
            Some("fail")
        );
        assert_eq!(
            v.pointer("/race/detected").and_then(Value::as_bool),
            Some(true)
        );
        assert!(v.get("setup_error").is_none());
    }
}
