use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One bar per scenario on stderr. Scenarios with a known end get a bar, shared-iterations
/// scenarios a spinner.
pub(crate) struct HumanProgress {
    inner: Mutex<Inner>,
}

struct Inner {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        Self {
            inner: Mutex::new(Inner {
                multi,
                bars: HashMap::new(),
            }),
        }
    }

    pub(crate) fn update(
        &self,
        scenario: &str,
        window: Option<(Duration, Duration)>,
        elapsed: Duration,
        message: String,
    ) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let pb = inner.bar(scenario, window.is_some());
        pb.set_message(message);

        match window {
            Some((start, end)) => {
                let total_ms = end.saturating_sub(start).as_millis() as u64;
                let done_ms = elapsed.saturating_sub(start).as_millis() as u64;
                pb.set_length(total_ms);
                pb.set_position(done_ms.min(total_ms));
            }
            None => pb.tick(),
        }
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, pb) in inner.bars.drain() {
            pb.finish_and_clear();
        }
        let _ = inner.multi.clear();
    }
}

impl Inner {
    fn bar(&mut self, scenario: &str, bounded: bool) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(scenario.to_string()).or_insert_with(|| {
            let pb = if bounded {
                let pb = multi.add(ProgressBar::new(0));
                pb.set_style(bar_style());
                pb
            } else {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(spinner_style());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            };
            pb.set_prefix(scenario.to_string());
            pb
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>12} [{bar:24.cyan/blue}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>12} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
