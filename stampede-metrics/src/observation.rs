use crate::metrics::MetricKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservedValue {
    /// A duration in milliseconds, or any other numeric sample.
    Trend(f64),
    Rate(bool),
    Counter(u64),
    Gauge(i64),
}

impl ObservedValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Trend(_) => MetricKind::Trend,
            Self::Rate(_) => MetricKind::Rate,
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// One emitted fact: a value for a named metric under a set of tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: String,
    pub value: ObservedValue,
    pub tags: Vec<(String, String)>,
}

impl Observation {
    pub fn new(metric: impl Into<String>, value: ObservedValue) -> Self {
        Self {
            metric: metric.into(),
            value,
            tags: Vec::new(),
        }
    }

    pub fn trend(metric: impl Into<String>, value: f64) -> Self {
        Self::new(metric, ObservedValue::Trend(value))
    }

    pub fn rate(metric: impl Into<String>, hit: bool) -> Self {
        Self::new(metric, ObservedValue::Rate(hit))
    }

    pub fn counter(metric: impl Into<String>, value: u64) -> Self {
        Self::new(metric, ObservedValue::Counter(value))
    }

    pub fn gauge(metric: impl Into<String>, value: i64) -> Self {
        Self::new(metric, ObservedValue::Gauge(value))
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Appends tags whose keys are not already present.
    #[must_use]
    pub fn with_tags<'a>(mut self, tags: impl IntoIterator<Item = &'a (String, String)>) -> Self {
        for (k, v) in tags {
            if !self.tags.iter().any(|(existing, _)| existing == k) {
                self.tags.push((k.clone(), v.clone()));
            }
        }
        self
    }
}

/// Destination for observations. The registry is the production sink; tests substitute a
/// recording fake.
pub trait MetricSink: Send + Sync {
    fn record(&self, observation: Observation);
}

impl<T: MetricSink + ?Sized> MetricSink for std::sync::Arc<T> {
    fn record(&self, observation: Observation) {
        (**self).record(observation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_tags_does_not_override() {
        let scenario_tags = vec![
            ("scenario".to_string(), "race".to_string()),
            ("team".to_string(), "credit".to_string()),
        ];
        let obs = Observation::rate("checks", true)
            .with_tag("scenario", "login")
            .with_tags(&scenario_tags);

        assert_eq!(
            obs.tags,
            vec![
                ("scenario".to_string(), "login".to_string()),
                ("team".to_string(), "credit".to_string()),
            ]
        );
        assert_eq!(obs.value.kind(), MetricKind::Rate);
    }
}
