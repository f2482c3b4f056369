use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TARGET_VOLUME: f32 = 0.8;
pub const DEFAULT_POLL_INTERVAL_SECS: f32 = 0.5;
pub const DEFAULT_EPSILON: f32 = 0.02;
/// Floor for the poll interval so a bad stored value cannot spin the guard.
pub const MIN_POLL_INTERVAL_SECS: f32 = 0.05;

/// Persisted lock settings. Owned by a settings collaborator on disk; the
/// engine receives a sanitized copy at start and updated copies over the
/// command channel, and never mutates them itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lock_enabled: bool,
    pub target_volume: f32,
    pub poll_interval_secs: f32,
    pub epsilon: f32,
    /// Read by the login-item collaborator only; the engine ignores it.
    pub launch_at_login: bool,
    /// While in the future the engine behaves as Idle but keeps
    /// `lock_enabled`, resuming automatically at the deadline.
    pub pause_until: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_enabled: true,
            target_volume: DEFAULT_TARGET_VOLUME,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            epsilon: DEFAULT_EPSILON,
            launch_at_login: false,
            pause_until: None,
        }
    }
}

impl Settings {
    /// Coerce every stored value into its valid range. Persisted data is
    /// never trusted raw: NaN, negative, or out-of-range values come back
    /// clamped or replaced with the default.
    pub fn sanitized(mut self) -> Self {
        self.target_volume = clamp_unit(self.target_volume);
        self.epsilon = if self.epsilon.is_finite() && self.epsilon >= 0.0 {
            self.epsilon.min(1.0)
        } else {
            DEFAULT_EPSILON
        };
        if !self.poll_interval_secs.is_finite() || self.poll_interval_secs <= 0.0 {
            self.poll_interval_secs = DEFAULT_POLL_INTERVAL_SECS;
        }
        self.poll_interval_secs = self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f32(self.poll_interval_secs)
    }

    /// Time left on an active pause, if any. A `pause_until` in the past
    /// counts as no pause at all.
    pub fn pause_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.pause_until
            .and_then(|until| (until - now).to_std().ok())
            .filter(|d| !d.is_zero())
    }
}

/// Clamp a scalar volume into [0, 1]; non-finite values collapse to 0.
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s, s.clone().sanitized());
        assert_eq!(s.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn out_of_range_values_are_coerced() {
        let s = Settings {
            target_volume: 1.7,
            epsilon: -0.5,
            poll_interval_secs: 0.0,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(s.target_volume, 1.0);
        assert_eq!(s.epsilon, DEFAULT_EPSILON);
        assert_eq!(s.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn non_finite_values_are_coerced() {
        let s = Settings {
            target_volume: f32::NAN,
            epsilon: f32::INFINITY,
            poll_interval_secs: f32::NAN,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(s.target_volume, 0.0);
        assert_eq!(s.epsilon, DEFAULT_EPSILON);
        assert_eq!(s.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn tiny_poll_interval_is_floored() {
        let s = Settings {
            poll_interval_secs: 0.001,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(s.poll_interval_secs, MIN_POLL_INTERVAL_SECS);
    }

    #[test]
    fn pause_remaining_ignores_past_deadlines() {
        let now = Utc::now();
        let past = Settings {
            pause_until: Some(now - TimeDelta::seconds(10)),
            ..Settings::default()
        };
        assert_eq!(past.pause_remaining(now), None);

        let future = Settings {
            pause_until: Some(now + TimeDelta::seconds(90)),
            ..Settings::default()
        };
        let remaining = future.pause_remaining(now).unwrap();
        assert!(remaining >= Duration::from_secs(89));
        assert!(remaining <= Duration::from_secs(90));
    }

    #[test]
    fn settings_roundtrip_through_serde() {
        let s = Settings {
            lock_enabled: false,
            target_volume: 0.65,
            pause_until: Some(Utc::now()),
            ..Settings::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let s: Settings = serde_json::from_str(r#"{"target_volume": 0.6}"#).unwrap();
        assert_eq!(s.target_volume, 0.6);
        assert!(s.lock_enabled);
        assert_eq!(s.epsilon, DEFAULT_EPSILON);
    }

    #[test]
    fn clamp_unit_bounds() {
        assert_eq!(clamp_unit(-0.1), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
        assert_eq!(clamp_unit(2.0), 1.0);
        assert_eq!(clamp_unit(f32::NEG_INFINITY), 0.0);
    }
}
