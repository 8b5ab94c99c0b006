use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::MetricSink;

use crate::scope::MetricScope;

/// What one iteration sees: its VU identity, the shared run context and the metric sink.
pub struct IterationContext<C> {
    pub(crate) vu_id: u64,
    pub(crate) scenario_vu: u64,
    pub(crate) iteration: u64,
    pub(crate) scope: MetricScope,
    pub(crate) run: Arc<C>,
    pub(crate) sink: Arc<dyn MetricSink>,
}

impl<C> Clone for IterationContext<C> {
    fn clone(&self) -> Self {
        Self {
            vu_id: self.vu_id,
            scenario_vu: self.scenario_vu,
            iteration: self.iteration,
            scope: self.scope.clone(),
            run: self.run.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<C> IterationContext<C> {
    /// The value produced by setup. Read-only for the whole run.
    pub fn run(&self) -> &C {
        &self.run
    }

    /// Run-wide VU id, 1-based, in spawn order.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 1-based VU index within the scenario.
    pub fn scenario_vu(&self) -> u64 {
        self.scenario_vu
    }

    /// 0-based iteration counter of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn scenario(&self) -> &str {
        self.scope.scenario()
    }

    pub fn scope(&self) -> &MetricScope {
        &self.scope
    }

    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }

    /// Cooperative pause. Only this iteration waits; the timer follows tokio's clock, so
    /// paused-clock tests skip it instantly.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Passed to the setup and teardown hooks.
#[derive(Clone)]
pub struct HookContext {
    pub(crate) scope: MetricScope,
    pub(crate) sink: Arc<dyn MetricSink>,
}

impl HookContext {
    pub fn scope(&self) -> &MetricScope {
        &self.scope
    }

    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }
}
