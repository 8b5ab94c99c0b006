use stampede_metrics::{SeriesValues, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdParseError {
    #[error("empty threshold")]
    Empty,

    #[error("invalid threshold (missing operator): {0}")]
    MissingOperator(String),

    #[error("invalid threshold: {0}")]
    Malformed(String),

    #[error("unknown aggregation `{agg}` in threshold: {raw}")]
    UnknownAggregation { agg: String, raw: String },

    #[error("percentile out of range in threshold: {0}")]
    PercentileOutOfRange(String),

    #[error("invalid numeric value in threshold: {0}")]
    InvalidValue(String),

    #[error("invalid threshold metric selector: {0}")]
    InvalidSelector(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, ThresholdParseError> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err(ThresholdParseError::Empty);
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| ThresholdParseError::MissingOperator(raw.to_string()))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(ThresholdParseError::Malformed(raw.to_string()));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let Some(inner) = other.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) else {
                return Err(ThresholdParseError::UnknownAggregation {
                    agg: left.to_string(),
                    raw: raw.to_string(),
                });
            };
            let p: f64 = inner
                .parse()
                .map_err(|_| ThresholdParseError::Malformed(raw.to_string()))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(ThresholdParseError::PercentileOutOfRange(raw.to_string()));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| ThresholdParseError::InvalidValue(raw.to_string()))?;

    Ok(ThresholdExpr { agg, op, value })
}

/// Splits `metric{key=value,...}` into the metric name and its tag selector.
pub fn parse_threshold_key(
    raw: &str,
) -> Result<(String, Vec<(String, String)>), ThresholdParseError> {
    let raw_trimmed = raw.trim();
    let Some(open) = raw_trimmed.find('{') else {
        if raw_trimmed.is_empty() || raw_trimmed.contains('}') {
            return Err(ThresholdParseError::InvalidSelector(raw.to_string()));
        }
        return Ok((raw_trimmed.to_string(), Vec::new()));
    };

    let name = raw_trimmed[..open].trim();
    let inner = raw_trimmed[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| ThresholdParseError::InvalidSelector(raw.to_string()))?;
    if name.is_empty() {
        return Err(ThresholdParseError::InvalidSelector(raw.to_string()));
    }

    let mut selector = Vec::new();
    for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once(['=', ':'])
            .ok_or_else(|| ThresholdParseError::InvalidSelector(raw.to_string()))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(ThresholdParseError::InvalidSelector(raw.to_string()));
        }
        selector.push((k.to_string(), v.to_string()));
    }

    Ok((name.to_string(), selector))
}

/// One compiled threshold expression against one (optionally tag-filtered) metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub selector: Vec<(String, String)>,
    pub expression: ThresholdExpr,
    /// Expression as written, for reporting.
    pub source: String,
    pub required: bool,
}

impl Threshold {
    pub fn parse(key: &str, expression: &str, required: bool) -> Result<Self, ThresholdParseError> {
        let (metric, selector) = parse_threshold_key(key)?;
        Ok(Self {
            metric,
            selector,
            expression: parse_threshold_expr(expression)?,
            source: expression.trim().to_string(),
            required,
        })
    }

    /// `metric` or `metric{k=v,...}`.
    pub fn target(&self) -> String {
        if self.selector.is_empty() {
            return self.metric.clone();
        }
        let tags: Vec<String> = self
            .selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}{{{}}}", self.metric, tags.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub threshold: Threshold,
    pub verdict: Verdict,
    pub observed: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdReport {
    pub outcomes: Vec<ThresholdOutcome>,
}

impl ThresholdReport {
    /// False when a required threshold failed, or, with `fail_on_inconclusive`, when a required
    /// threshold had no data.
    pub fn passed(&self, fail_on_inconclusive: bool) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.threshold.required)
            .all(|o| match o.verdict {
                Verdict::Pass => true,
                Verdict::Fail => false,
                Verdict::Inconclusive => !fail_on_inconclusive,
            })
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.outcomes.iter().filter(|o| o.verdict == verdict).count()
    }
}

/// Evaluates every threshold against `snapshot`. Pure: no clock, no registry access.
pub fn evaluate(snapshot: &Snapshot, thresholds: &[Threshold]) -> ThresholdReport {
    let outcomes = thresholds
        .iter()
        .map(|t| {
            let (verdict, observed) = match snapshot.select(&t.metric, t.selector.as_slice()) {
                None => (Verdict::Inconclusive, None),
                Some(values) => match observed_value(&values, t.expression.agg) {
                    Observed::NoData => (Verdict::Inconclusive, None),
                    Observed::NotApplicable => (Verdict::Fail, None),
                    Observed::Value(v) => {
                        let verdict = if compare(v, t.expression.op, t.expression.value) {
                            Verdict::Pass
                        } else {
                            Verdict::Fail
                        };
                        (verdict, Some(v))
                    }
                },
            };
            ThresholdOutcome {
                threshold: t.clone(),
                verdict,
                observed,
            }
        })
        .collect();

    ThresholdReport { outcomes }
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
        ThresholdOp::Ne => left != right,
    }
}

enum Observed {
    Value(f64),
    NoData,
    NotApplicable,
}

fn observed_value(values: &SeriesValues, agg: ThresholdAgg) -> Observed {
    let trend_stat = |v: Option<f64>| v.map_or(Observed::NoData, Observed::Value);

    match (values, agg) {
        (SeriesValues::Trend(t), ThresholdAgg::Count) => Observed::Value(t.count() as f64),
        (SeriesValues::Trend(t), _) if t.is_empty() => Observed::NoData,
        (SeriesValues::Trend(t), ThresholdAgg::Avg) => trend_stat(t.avg()),
        (SeriesValues::Trend(t), ThresholdAgg::Min) => trend_stat(t.min()),
        (SeriesValues::Trend(t), ThresholdAgg::Max) => trend_stat(t.max()),
        (SeriesValues::Trend(t), ThresholdAgg::Med) => trend_stat(t.percentile(50.0)),
        (SeriesValues::Trend(t), ThresholdAgg::P(p)) => trend_stat(t.percentile(p)),

        (SeriesValues::Rate(r), _) if r.no_data() => Observed::NoData,
        (SeriesValues::Rate(r), ThresholdAgg::Rate) => Observed::Value(r.rate()),
        (SeriesValues::Rate(r), ThresholdAgg::Count) => Observed::Value(r.total as f64),

        (SeriesValues::Counter(c), ThresholdAgg::Count) => Observed::Value(*c as f64),

        (
            SeriesValues::Gauge(g),
            ThresholdAgg::Avg | ThresholdAgg::Min | ThresholdAgg::Max,
        ) => Observed::Value(*g as f64),

        _ => Observed::NotApplicable,
    }
}
