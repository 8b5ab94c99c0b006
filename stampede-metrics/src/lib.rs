//! Metric pipeline: a tagged series registry that concurrent virtual users write into and the
//! run coordinator snapshots.
//!
//! Four series kinds exist. Counters and gauges are plain atomics; rates and trends sit behind
//! one mutex per series so a snapshot never observes a half-applied update.

pub mod key;
pub mod metrics;
pub mod observation;
pub mod registry;
pub mod snapshot;
pub mod tags;
pub mod trend;

pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind, RateCounts};
pub use observation::{MetricSink, Observation, ObservedValue};
pub use registry::{Error, MetricId, Registry, Result};
pub use snapshot::{SeriesSnapshot, SeriesValues, Snapshot};
pub use tags::TagSet;
pub use trend::{Trend, TrendSnapshot, TrendSummary, nearest_rank};
