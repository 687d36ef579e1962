//! Cooperative stop signal for chases and batch dashboards.
//!
//! Checked once per hop or once per basin.  Clones share the same flag and
//! budget counter, so one handle can cancel work running on other threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    cancelled: Arc<AtomicBool>,
    spent: Arc<AtomicU64>,
    deadline: Option<Instant>,
    budget: Option<u64>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Stop once `units` (hops or nodes) have been charged.
    pub fn with_budget(mut self, units: u64) -> Self {
        self.budget = Some(units);
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn charge(&self, units: u64) {
        self.spent.fetch_add(units, Ordering::Relaxed);
    }

    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::Relaxed)
    }

    pub fn should_stop(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        match self.budget {
            Some(budget) => self.spent() >= budget,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_stops() {
        let signal = StopSignal::new();
        signal.charge(1_000_000);
        assert!(!signal.should_stop());
    }

    #[test]
    fn test_cancel_is_shared_across_clones() {
        let signal = StopSignal::new();
        let other = signal.clone();
        other.cancel();
        assert!(signal.should_stop());
    }

    #[test]
    fn test_budget() {
        let signal = StopSignal::new().with_budget(3);
        signal.charge(2);
        assert!(!signal.should_stop());
        signal.charge(1);
        assert!(signal.should_stop());
    }

    #[test]
    fn test_expired_deadline() {
        let signal = StopSignal::new().with_timeout(Duration::ZERO);
        assert!(signal.should_stop());
    }
}
