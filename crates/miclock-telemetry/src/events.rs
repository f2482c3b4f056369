use miclock_foundation::{EngineState, GatewayError};
use parking_lot::Mutex;
use std::sync::Arc;

/// How a correction attempt resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    Applied,
    Failed(GatewayError),
}

/// Structured diagnostics emitted by the engine. The sink collaborator
/// owns formatting and storage; the engine only classifies and reports.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    Transition {
        from: EngineState,
        to: EngineState,
    },
    Correction {
        device: String,
        before: f32,
        after: f32,
        outcome: CorrectionOutcome,
    },
    Fault {
        error: GatewayError,
        recoverable: bool,
        /// False when duplicate suppression kept this occurrence away
        /// from the user; it is still recorded here either way.
        surfaced: bool,
    },
    DeviceChanged {
        from: Option<String>,
        to: Option<String>,
    },
}

pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// Default sink: structured tracing events.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::Transition { from, to } => {
                tracing::info!(?from, ?to, "engine transition");
            }
            DiagnosticEvent::Correction {
                device,
                before,
                after,
                outcome,
            } => match outcome {
                CorrectionOutcome::Applied => {
                    tracing::info!(%device, before, after, "volume corrected");
                }
                CorrectionOutcome::Failed(err) => {
                    tracing::warn!(%device, before, after, %err, "correction failed");
                }
            },
            DiagnosticEvent::Fault {
                error,
                recoverable,
                surfaced,
            } => {
                tracing::error!(%error, recoverable, surfaced, "classified fault");
            }
            DiagnosticEvent::DeviceChanged { from, to } => {
                tracing::info!(?from, ?to, "default input device changed");
            }
        }
    }
}

/// Buffering sink for tests and UI collaborators that render history.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}
