use std::sync::Mutex;

use stampede_metrics::{MetricSink, Observation};

/// Sink that keeps every observation in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Observation>>,
}

impl MetricSink for RecordingSink {
    fn record(&self, observation: Observation) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observation);
    }
}

impl RecordingSink {
    pub fn take(&self) -> Vec<Observation> {
        std::mem::take(&mut *self.seen.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
