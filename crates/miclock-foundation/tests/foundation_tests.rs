//! Foundation crate tests
//!
//! Tests cover:
//! - EngineState transition table completeness
//! - GatewayError classification and recovery strategies
//! - Settings sanitization round trips

use miclock_foundation::{
    clamp_unit, is_valid_transition, EngineState, GatewayError, RecoveryStrategy, Settings,
};
use std::time::Duration;

#[test]
fn every_state_trigger_pair_is_defined() {
    // Triggers not listed in the table are rejected, never undefined: the
    // predicate answers for the full state product.
    for from in EngineState::ALL {
        for to in EngineState::ALL {
            let _ = is_valid_transition(from, to);
        }
    }
}

#[test]
fn error_state_is_left_only_by_external_input_paths() {
    // Retry success or a device change re-arms; lock toggle returns to Idle.
    assert!(is_valid_transition(EngineState::Error, EngineState::Monitoring));
    assert!(is_valid_transition(EngineState::Error, EngineState::Unsupported));
    assert!(is_valid_transition(EngineState::Error, EngineState::Idle));
    assert!(!is_valid_transition(EngineState::Error, EngineState::Correcting));
}

#[test]
fn recoverable_errors_get_bounded_retry() {
    for err in [
        GatewayError::DeviceDisconnected,
        GatewayError::Unknown("transient".into()),
    ] {
        match err.recovery_strategy() {
            RecoveryStrategy::Retry { max_attempts, delay } => {
                assert!(max_attempts > 0);
                assert!(delay > Duration::ZERO);
            }
            other => panic!("expected retry strategy, got {other:?}"),
        }
    }
}

#[test]
fn sanitized_settings_are_always_usable() {
    let hostile = Settings {
        target_volume: f32::INFINITY,
        epsilon: f32::NAN,
        poll_interval_secs: -3.0,
        ..Settings::default()
    }
    .sanitized();

    assert!((0.0..=1.0).contains(&hostile.target_volume));
    assert!(hostile.epsilon >= 0.0);
    assert!(hostile.poll_interval() > Duration::ZERO);
    assert_eq!(clamp_unit(hostile.target_volume), hostile.target_volume);
}
