use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared counters for cross-thread engine monitoring. Cheap to clone;
/// every clone observes the same underlying counters.
#[derive(Clone)]
pub struct EngineMetrics {
    // Signal sources
    pub signals_event: Arc<AtomicU64>,
    pub signals_poll: Arc<AtomicU64>,
    pub signals_debounced: Arc<AtomicU64>,

    // Correction outcomes
    pub corrections_attempted: Arc<AtomicU64>,
    pub corrections_applied: Arc<AtomicU64>,
    pub corrections_failed: Arc<AtomicU64>,

    // Error handling
    pub retries: Arc<AtomicU64>,
    pub errors_recoverable: Arc<AtomicU64>,
    pub errors_fatal: Arc<AtomicU64>,
    pub errors_suppressed: Arc<AtomicU64>,

    pub device_changes: Arc<AtomicU64>,
    pub last_correction_time: Arc<RwLock<Option<Instant>>>,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self {
            signals_event: Arc::new(AtomicU64::new(0)),
            signals_poll: Arc::new(AtomicU64::new(0)),
            signals_debounced: Arc::new(AtomicU64::new(0)),

            corrections_attempted: Arc::new(AtomicU64::new(0)),
            corrections_applied: Arc::new(AtomicU64::new(0)),
            corrections_failed: Arc::new(AtomicU64::new(0)),

            retries: Arc::new(AtomicU64::new(0)),
            errors_recoverable: Arc::new(AtomicU64::new(0)),
            errors_fatal: Arc::new(AtomicU64::new(0)),
            errors_suppressed: Arc::new(AtomicU64::new(0)),

            device_changes: Arc::new(AtomicU64::new(0)),
            last_correction_time: Arc::new(RwLock::new(None)),
        }
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_correction_applied(&self, at: Instant) {
        self.corrections_applied.fetch_add(1, Ordering::Relaxed);
        *self.last_correction_time.write() = Some(at);
    }

    /// One-line counter summary for periodic status logging.
    pub fn summary(&self) -> String {
        format!(
            "signals event/poll/debounced {}/{}/{} corrections ok/fail {}/{} retries {} errors rec/fatal/supp {}/{}/{}",
            self.signals_event.load(Ordering::Relaxed),
            self.signals_poll.load(Ordering::Relaxed),
            self.signals_debounced.load(Ordering::Relaxed),
            self.corrections_applied.load(Ordering::Relaxed),
            self.corrections_failed.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
            self.errors_recoverable.load(Ordering::Relaxed),
            self.errors_fatal.load(Ordering::Relaxed),
            self.errors_suppressed.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = EngineMetrics::new();
        let clone = metrics.clone();
        clone.signals_poll.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.signals_poll.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn mark_correction_records_count_and_time() {
        let metrics = EngineMetrics::new();
        assert!(metrics.last_correction_time.read().is_none());
        metrics.mark_correction_applied(Instant::now());
        assert_eq!(metrics.corrections_applied.load(Ordering::Relaxed), 1);
        assert!(metrics.last_correction_time.read().is_some());
    }

    #[test]
    fn summary_contains_every_counter() {
        let metrics = EngineMetrics::new();
        metrics.corrections_failed.fetch_add(2, Ordering::Relaxed);
        assert!(metrics.summary().contains("ok/fail 0/2"));
    }
}
