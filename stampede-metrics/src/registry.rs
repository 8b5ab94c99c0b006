use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind};
use crate::observation::{MetricSink, Observation};
use crate::snapshot::{SeriesSnapshot, Snapshot};
use crate::tags::TagSet;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{metric}` is registered as {registered}, not {requested}")]
    KindMismatch {
        metric: String,
        registered: MetricKind,
        requested: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// Concurrent metric registry. One instance per run; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    series: DashMap<MetricId, DashMap<TagSet, MetricHandle>>,
}

impl Registry {
    /// Registers `name` with `kind`, or returns the existing id if it is already registered
    /// with the same kind.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let name_id = self.interner.intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    metric: name.to_string(),
                    registered: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.series.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.get(name)?;
        self.defs
            .read()
            .iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.intern(key)
    }

    pub fn resolve_tags<K, V>(&self, tags: &[(K, V)]) -> TagSet
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        TagSet::from_unsorted(tags.iter().map(|(k, v)| {
            (
                self.interner.intern(k.as_ref()),
                self.interner.intern(v.as_ref()),
            )
        }))
    }

    /// Returns the write handle of a series, creating the series on first use.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let kind = self.defs.read().get(metric.0 as usize)?.kind;
        let series = self.series.get(&metric)?;
        let handle = series
            .entry(tags)
            .or_insert_with(|| MetricHandle::new(kind))
            .clone();
        Some(handle)
    }

    /// Registers (if needed) and returns the handle for `name` under `tags`.
    pub fn handle_for<K, V>(
        &self,
        name: &str,
        kind: MetricKind,
        tags: &[(K, V)],
    ) -> Result<MetricHandle>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let id = self.register(name, kind)?;
        let tags = self.resolve_tags(tags);
        Ok(self
            .handle(id, tags)
            .unwrap_or_else(|| MetricHandle::new(kind)))
    }

    fn resolve_string(&self, id: KeyId) -> String {
        self.interner
            .resolve(id)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// Point-in-time copy of every series. Each series is read under its own lock, so a rate
    /// never shows hits without the matching total and a trend is never half-appended.
    pub fn snapshot(&self) -> Snapshot {
        let defs: Vec<(String, MetricKind)> = self
            .defs
            .read()
            .iter()
            .map(|d| (self.resolve_string(d.name), d.kind))
            .collect();

        let mut out = Vec::new();
        for entry in self.series.iter() {
            let Some((name, kind)) = defs.get(entry.key().0 as usize) else {
                continue;
            };

            for series in entry.value().iter() {
                let tags = series
                    .key()
                    .iter()
                    .map(|(k, v)| (self.resolve_string(k), self.resolve_string(v)))
                    .collect();

                out.push(SeriesSnapshot {
                    name: name.clone(),
                    kind: *kind,
                    tags,
                    values: series.value().values(),
                });
            }
        }

        Snapshot::new(out)
    }
}

impl MetricSink for Registry {
    fn record(&self, observation: Observation) {
        let kind = observation.value.kind();
        match self.handle_for(&observation.metric, kind, &observation.tags) {
            Ok(handle) => {
                handle.apply(&observation.value);
            }
            Err(err) => {
                tracing::warn!(error = %err, "observation rejected");
            }
        }
    }
}
