/// Engine lifecycle states. Closed set; there are no implicit states and
/// no transitions beyond the ones `is_valid_transition` admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Lock disabled or paused; no watchers armed.
    Idle,
    /// Watching the active device for drift.
    Monitoring,
    /// A volume write is in flight; further drift signals are debounced.
    Correcting,
    /// The active device has no writable volume channel.
    Unsupported,
    /// Recoverable-error retry in progress, or terminal after the retry
    /// budget is exhausted.
    Error,
}

impl EngineState {
    pub const ALL: [EngineState; 5] = [
        EngineState::Idle,
        EngineState::Monitoring,
        EngineState::Correcting,
        EngineState::Unsupported,
        EngineState::Error,
    ];
}

/// The transition table. Anything not listed here is a defect, not a
/// feature; callers reject invalid transitions instead of applying them.
pub fn is_valid_transition(from: EngineState, to: EngineState) -> bool {
    use EngineState::*;
    matches!(
        (from, to),
        // lock enabled: device resolution can land anywhere
        (Idle, Monitoring) | (Idle, Unsupported) | (Idle, Error)
            // drift handling and failure classification
            | (Monitoring, Correcting)
            | (Monitoring, Unsupported)
            | (Monitoring, Error)
            | (Monitoring, Idle)
            // correction resolution
            | (Correcting, Monitoring)
            | (Correcting, Error)
            | (Correcting, Idle)
            // device change re-evaluation
            | (Unsupported, Monitoring)
            | (Unsupported, Error)
            | (Unsupported, Idle)
            // retry outcome or re-arm after device change
            | (Error, Monitoring)
            | (Error, Unsupported)
            | (Error, Idle)
    )
}
