use std::time::Duration;
use thiserror::Error;

/// Classified gateway failure. Every native error is folded into one of
/// these four kinds before it crosses the engine boundary; nothing above
/// the gateway ever sees a raw audio-subsystem error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Device exists but no volume channel is writable. Recoverable only
    /// by a device change, never by retrying.
    #[error("device has no writable volume channel")]
    DeviceNotSupported,

    /// The audio service refused the operation. Recoverable by user
    /// action outside the engine; the engine never escalates privileges.
    #[error("audio service denied the volume operation")]
    PermissionDenied,

    /// The active input device went away. Recovers automatically once a
    /// device reappears.
    #[error("input device disconnected")]
    DeviceDisconnected,

    /// Unclassified native failure, retried with conservative backoff.
    #[error("audio subsystem error: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    AwaitDeviceChange,
    AwaitUserAction,
}

impl GatewayError {
    /// Whether the engine may retry automatically without user input.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::DeviceNotSupported => false,
            GatewayError::PermissionDenied => false,
            GatewayError::DeviceDisconnected => true,
            GatewayError::Unknown(_) => true,
        }
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            GatewayError::DeviceDisconnected => RecoveryStrategy::Retry {
                max_attempts: 5,
                delay: Duration::from_secs(2),
            },
            GatewayError::Unknown(_) => RecoveryStrategy::Retry {
                max_attempts: 5,
                delay: Duration::from_millis(500),
            },
            GatewayError::DeviceNotSupported => RecoveryStrategy::AwaitDeviceChange,
            GatewayError::PermissionDenied => RecoveryStrategy::AwaitUserAction,
        }
    }

    /// Short user-facing vocabulary plus one proposed next action.
    /// Full technical detail goes to the diagnostics sink only.
    pub fn user_hint(&self) -> &'static str {
        match self {
            GatewayError::DeviceNotSupported => {
                "this microphone cannot have its volume locked - choose another device"
            }
            GatewayError::PermissionDenied => {
                "microphone access was denied - check your audio permissions"
            }
            GatewayError::DeviceDisconnected => {
                "the microphone was disconnected - reconnect it or pick another device"
            }
            GatewayError::Unknown(_) => "the audio service misbehaved - retrying automatically",
        }
    }

    /// True when `other` is the same kind of failure, ignoring detail text.
    /// Used to suppress duplicate surfacing of identical errors.
    pub fn same_kind(&self, other: &GatewayError) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::state::EngineState,
        to: crate::state::EngineState,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_matches_taxonomy() {
        assert!(!GatewayError::DeviceNotSupported.is_recoverable());
        assert!(!GatewayError::PermissionDenied.is_recoverable());
        assert!(GatewayError::DeviceDisconnected.is_recoverable());
        assert!(GatewayError::Unknown("boom".into()).is_recoverable());
    }

    #[test]
    fn unknown_errors_share_a_kind_regardless_of_detail() {
        let a = GatewayError::Unknown("read failed".into());
        let b = GatewayError::Unknown("write failed".into());
        assert!(a.same_kind(&b));
        assert!(!a.same_kind(&GatewayError::DeviceDisconnected));
    }

    #[test]
    fn unsupported_waits_for_device_change() {
        assert_eq!(
            GatewayError::DeviceNotSupported.recovery_strategy(),
            RecoveryStrategy::AwaitDeviceChange
        );
        assert_eq!(
            GatewayError::PermissionDenied.recovery_strategy(),
            RecoveryStrategy::AwaitUserAction
        );
    }

    #[test]
    fn every_kind_has_a_user_hint() {
        for err in [
            GatewayError::DeviceNotSupported,
            GatewayError::PermissionDenied,
            GatewayError::DeviceDisconnected,
            GatewayError::Unknown("x".into()),
        ] {
            assert!(!err.user_hint().is_empty());
        }
    }
}
