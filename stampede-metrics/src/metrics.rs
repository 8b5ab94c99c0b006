use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::observation::ObservedValue;
use crate::snapshot::SeriesValues;
use crate::trend::Trend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

/// Boolean outcome tally of a rate series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateCounts {
    pub hits: u64,
    pub total: u64,
}

impl RateCounts {
    pub fn push(&mut self, hit: bool) {
        self.total = self.total.saturating_add(1);
        if hit {
            self.hits = self.hits.saturating_add(1);
        }
    }

    pub fn merge(self, other: RateCounts) -> RateCounts {
        RateCounts {
            hits: self.hits.saturating_add(other.hits),
            total: self.total.saturating_add(other.total),
        }
    }

    /// `hits / total`, or `0` for an empty series (see [`RateCounts::no_data`]).
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.hits as f64 / self.total as f64
    }

    pub fn no_data(&self) -> bool {
        self.total == 0
    }

    pub fn misses(&self) -> u64 {
        self.total.saturating_sub(self.hits)
    }
}

/// Write handle to one `(metric, tags)` series. Cheap to clone; hot paths can cache it.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Mutex<RateCounts>>),
    Trend(Arc<Mutex<Trend>>),
}

impl MetricHandle {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(Mutex::new(RateCounts::default()))),
            MetricKind::Trend => Self::Trend(Arc::new(Mutex::new(Trend::default()))),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    #[inline]
    pub fn add(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    /// Adds `delta` to a gauge and returns the new value.
    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        match self {
            Self::Gauge(g) => g.fetch_add(delta, Ordering::Relaxed).saturating_add(delta),
            _ => 0,
        }
    }

    /// Raises a gauge to `value` if it is currently lower (peak tracking).
    pub fn raise_to(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn push_rate(&self, hit: bool) {
        if let Self::Rate(r) = self {
            r.lock().push(hit);
        }
    }

    #[inline]
    pub fn push_trend(&self, value: f64) {
        if let Self::Trend(t) = self {
            t.lock().push(value);
        }
    }

    /// Applies an observed value. Returns `false` when the value's kind does not match the
    /// series kind.
    pub fn apply(&self, value: &ObservedValue) -> bool {
        match (self, value) {
            (Self::Counter(_), ObservedValue::Counter(v)) => self.add(*v),
            (Self::Gauge(_), ObservedValue::Gauge(v)) => self.set(*v),
            (Self::Rate(_), ObservedValue::Rate(v)) => self.push_rate(*v),
            (Self::Trend(_), ObservedValue::Trend(v)) => self.push_trend(*v),
            _ => return false,
        }
        true
    }

    pub(crate) fn values(&self) -> SeriesValues {
        match self {
            Self::Counter(c) => SeriesValues::Counter(c.load(Ordering::Relaxed)),
            Self::Gauge(g) => SeriesValues::Gauge(g.load(Ordering::Relaxed)),
            Self::Rate(r) => SeriesValues::Rate(*r.lock()),
            Self::Trend(t) => SeriesValues::Trend(t.lock().snapshot()),
        }
    }
}
