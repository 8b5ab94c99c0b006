use std::time::Duration;

/// Renders a millisecond value in the largest unit that keeps it readable.
pub(crate) fn format_ms(ms: f64) -> String {
    if !ms.is_finite() {
        return "-".to_string();
    }
    if ms >= 1000.0 {
        return format!("{:.2}s", ms / 1000.0);
    }
    if ms >= 1.0 {
        return format!("{ms:.2}ms");
    }
    format!("{:.0}us", ms * 1000.0)
}

pub(crate) fn format_ms_opt(ms: Option<f64>) -> String {
    ms.map(format_ms).unwrap_or_else(|| "-".to_string())
}

/// A single rounded component: `850ms`, `12s`, `3m05s`.
pub(crate) fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = (ms + 500) / 1000;
    if secs < 60 {
        return format!("{secs}s");
    }
    format!("{}m{:02}s", secs / 60, secs % 60)
}

pub(crate) fn format_percent(hits: u64, total: u64) -> String {
    if total == 0 {
        return "n/a".to_string();
    }
    format!("{:.2}%", (hits as f64) * 100.0 / (total as f64))
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}
