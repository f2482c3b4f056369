//! Clock abstraction so time-window logic (error dedup, debounce,
//! correction timestamps) can run against virtual time in tests.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock implementation used everywhere outside tests.
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Virtual clock advanced explicitly by tests.
pub struct TestClock {
    current: std::sync::Mutex<Instant>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            current: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.current.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap()
    }
}

pub type SharedClock = std::sync::Arc<dyn Clock>;

pub fn real_clock() -> SharedClock {
    std::sync::Arc::new(RealClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_clock_tracks_wall_time() {
        let clock = RealClock;
        let before = Instant::now();
        let t = clock.now();
        assert!(t >= before);
        assert!(t.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_clock_only_moves_when_advanced() {
        let clock = TestClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(3));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now().duration_since(t0), Duration::from_millis(3500));
    }
}
