use std::collections::BTreeMap;
use std::fmt::Write as _;

use stampede_core::{ExecutorState, RunResult, ThresholdOutcome, Verdict, names};
use stampede_metrics::{RateCounts, SeriesValues, Snapshot};

use super::format::{format_duration, format_ms_opt, format_percent, format_rate};
use crate::output::RunReport;
use crate::workload::RaceReport;

const NAME_WIDTH: usize = 28;

pub(crate) fn render(report: &RunReport<'_>) -> String {
    let result = report.result;
    let mut out = String::new();

    writeln!(
        out,
        "run: {} in {} (exit {})",
        result.status,
        format_duration(result.elapsed),
        report.exit_code.as_i32()
    )
    .ok();
    if let Some(err) = &result.setup_error {
        writeln!(out, "  setup error: {err}").ok();
    }
    if let Some(err) = &result.teardown_error {
        writeln!(out, "  teardown error: {err}").ok();
    }
    out.push('\n');

    render_scenarios(result, &mut out);
    render_metrics(result, &mut out);
    render_checks(&result.snapshot, &mut out);
    render_thresholds(&result.thresholds.outcomes, &mut out);
    render_race(&report.race, &mut out);

    out
}

fn render_scenarios(result: &RunResult, out: &mut String) {
    out.push_str("scenarios\n");
    for s in &result.scenarios {
        write!(
            out,
            "  {} ({}) {}: vus={} iterations={} failed={} interrupted={}",
            s.name,
            s.executor,
            state_label(s.state),
            s.vus_spawned,
            s.iterations_completed,
            s.iterations_failed,
            s.iterations_interrupted
        )
        .ok();
        if s.forced_aborts > 0 {
            write!(out, " forced_aborts={}", s.forced_aborts).ok();
        }
        out.push('\n');
    }
    out.push('\n');
}

fn render_metrics(result: &RunResult, out: &mut String) {
    let snapshot = &result.snapshot;
    if snapshot.is_empty() {
        out.push_str("metrics: none recorded\n\n");
        return;
    }

    out.push_str("metrics\n");
    let secs = result.elapsed.as_secs_f64();
    for name in snapshot.metric_names() {
        let Some(values) = snapshot.merged(name) else {
            continue;
        };
        let rendered = match values {
            SeriesValues::Counter(v) if secs > 0.0 => {
                format!("{v} ({}/s)", format_rate(v as f64 / secs))
            }
            SeriesValues::Counter(v) => v.to_string(),
            SeriesValues::Gauge(v) => v.to_string(),
            SeriesValues::Rate(r) => format_rate_counts(r),
            SeriesValues::Trend(t) => {
                let s = t.summary();
                format!(
                    "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} count={}",
                    format_ms_opt(s.avg),
                    format_ms_opt(s.min),
                    format_ms_opt(s.med),
                    format_ms_opt(s.max),
                    format_ms_opt(s.p90),
                    format_ms_opt(s.p95),
                    format_ms_opt(s.p99),
                    s.count
                )
            }
        };
        writeln!(out, "  {:.<NAME_WIDTH$}: {rendered}", format!("{name} ")).ok();
    }
    out.push('\n');
}

fn format_rate_counts(r: RateCounts) -> String {
    format!(
        "{} {} of {}",
        format_percent(r.hits, r.total),
        r.hits,
        r.total
    )
}

/// Per-check tallies from the `checks` rate, keyed by its `check` tag.
fn check_tallies(snapshot: &Snapshot) -> BTreeMap<&str, RateCounts> {
    let mut tallies: BTreeMap<&str, RateCounts> = BTreeMap::new();
    for series in snapshot.series() {
        if series.name != names::CHECKS {
            continue;
        }
        let (Some(check), SeriesValues::Rate(r)) = (series.tag("check"), &series.values) else {
            continue;
        };
        let entry = tallies.entry(check).or_default();
        *entry = entry.merge(*r);
    }
    tallies
}

fn render_checks(snapshot: &Snapshot, out: &mut String) {
    let tallies = check_tallies(snapshot);
    if tallies.is_empty() {
        return;
    }
    out.push_str("checks\n");
    for (name, r) in tallies {
        let mark = if r.misses() == 0 { "ok  " } else { "FAIL" };
        writeln!(out, "  {mark} {name}: {} of {} passed", r.hits, r.total).ok();
    }
    out.push('\n');
}

fn render_thresholds(outcomes: &[ThresholdOutcome], out: &mut String) {
    if outcomes.is_empty() {
        return;
    }
    out.push_str("thresholds\n");
    for o in outcomes {
        let verdict = match o.verdict {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Inconclusive => "N/A ",
        };
        let observed = match o.observed {
            Some(v) => format!("observed {v:.4}"),
            None if o.verdict == Verdict::Inconclusive => "no data".to_string(),
            None => "not applicable".to_string(),
        };
        let optional = if o.threshold.required {
            ""
        } else {
            " [optional]"
        };
        writeln!(
            out,
            "  {verdict} {}: {} ({observed}){optional}",
            o.threshold.target(),
            o.threshold.source
        )
        .ok();
    }
    out.push('\n');
}

fn render_race(race: &RaceReport, out: &mut String) {
    let verdict = if race.detected {
        "RACE DETECTED"
    } else {
        "no race"
    };
    writeln!(
        out,
        "race: {verdict} (created {}, admissible {}, rejected {})",
        race.created, race.admissible, race.rejected
    )
    .ok();
}

fn state_label(state: ExecutorState) -> String {
    match state {
        ExecutorState::Ramping { stage } => format!("ramping (stage {})", stage + 1),
        other => other.name().to_string(),
    }
}
