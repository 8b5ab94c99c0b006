use std::sync::atomic::{AtomicU64, Ordering};

/// Iteration budget shared by the VUs of a shared-iterations scenario.
#[derive(Debug)]
pub struct IterationBudget {
    claimed: AtomicU64,
    total: u64,
}

impl IterationBudget {
    pub fn new(total: u64) -> Self {
        Self {
            claimed: AtomicU64::new(0),
            total,
        }
    }

    /// Claims the next iteration. Returns its 0-based scenario-wide index, or `None` once the
    /// budget is spent.
    pub fn claim(&self) -> Option<u64> {
        let mut cur = self.claimed.load(Ordering::Relaxed);
        loop {
            if cur >= self.total {
                return None;
            }
            match self.claimed.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(cur),
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::Relaxed).min(self.total)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.claimed() >= self.total
    }
}
