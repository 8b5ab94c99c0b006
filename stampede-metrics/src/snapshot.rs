use crate::metrics::{MetricKind, RateCounts};
use crate::trend::TrendSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValues {
    Counter(u64),
    Gauge(i64),
    Rate(RateCounts),
    Trend(TrendSnapshot),
}

impl SeriesValues {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Combines two series of the same kind. Counters and gauges add, rates add their tallies,
    /// trends merge their samples. Returns `None` on a kind mismatch.
    pub fn merge(&self, other: &SeriesValues) -> Option<SeriesValues> {
        Some(match (self, other) {
            (Self::Counter(a), Self::Counter(b)) => Self::Counter(a.saturating_add(*b)),
            (Self::Gauge(a), Self::Gauge(b)) => Self::Gauge(a.saturating_add(*b)),
            (Self::Rate(a), Self::Rate(b)) => Self::Rate(a.merge(*b)),
            (Self::Trend(a), Self::Trend(b)) => Self::Trend(a.merge(b)),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    /// Sorted by key.
    pub tags: Vec<(String, String)>,
    pub values: SeriesValues,
}

impl SeriesSnapshot {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn matches<K: AsRef<str>, V: AsRef<str>>(&self, selector: &[(K, V)]) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.tag(k.as_ref()) == Some(v.as_ref()))
    }
}

/// Read-only view of every series at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    series: Vec<SeriesSnapshot>,
}

impl Snapshot {
    pub fn new(mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        Self { series }
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Distinct metric names, sorted.
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.series.iter().map(|s| s.name.as_str()).collect();
        names.dedup();
        names
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series.iter().find(|s| s.name == name).map(|s| s.kind)
    }

    /// Merges every series of `name` whose tags contain all pairs of `selector`.
    /// Returns `None` when no series matches.
    pub fn select<K, V>(&self, name: &str, selector: &[(K, V)]) -> Option<SeriesValues>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.series
            .iter()
            .filter(|s| s.name == name && s.matches(selector))
            .map(|s| &s.values)
            .fold(None, |acc: Option<SeriesValues>, v| match acc {
                None => Some(v.clone()),
                Some(acc) => acc.merge(v).or(Some(acc)),
            })
    }

    pub fn merged(&self, name: &str) -> Option<SeriesValues> {
        self.select::<&str, &str>(name, &[])
    }

    /// Sum of a counter across all its series; `0` when absent.
    pub fn counter_total(&self, name: &str) -> u64 {
        match self.merged(name) {
            Some(SeriesValues::Counter(v)) => v,
            _ => 0,
        }
    }

    pub fn counter<K: AsRef<str>, V: AsRef<str>>(&self, name: &str, selector: &[(K, V)]) -> u64 {
        match self.select(name, selector) {
            Some(SeriesValues::Counter(v)) => v,
            _ => 0,
        }
    }

    pub fn rate(&self, name: &str) -> Option<RateCounts> {
        match self.merged(name)? {
            SeriesValues::Rate(r) => Some(r),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<TrendSnapshot> {
        match self.merged(name)? {
            SeriesValues::Trend(t) => Some(t),
            _ => None,
        }
    }
}
