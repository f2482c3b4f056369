use crossbeam_channel::{Receiver, Sender};
use miclock_foundation::{is_valid_transition, EngineError, EngineState, GatewayError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;

/// Point-in-time view of the engine. Rebuilt on every device change;
/// never persisted. Observers only ever hold clones of it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeStatus {
    pub active_device_id: Option<String>,
    pub active_device_name: Option<String>,
    pub state: EngineState,
    pub last_error: Option<GatewayError>,
    pub last_correction_at: Option<Instant>,
}

impl RuntimeStatus {
    pub fn idle() -> Self {
        Self {
            active_device_id: None,
            active_device_name: None,
            state: EngineState::Idle,
            last_error: None,
            last_correction_at: None,
        }
    }
}

/// Single owner of `RuntimeStatus`, written only by the engine worker.
/// Readers get copy-on-read snapshots plus a publish-on-change channel,
/// so observing status never blocks the signal-handling path.
#[derive(Clone)]
pub struct StatusHub {
    status: Arc<RwLock<RuntimeStatus>>,
    subscribers: Arc<Mutex<Vec<Sender<RuntimeStatus>>>>,
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHub {
    pub fn new() -> Self {
        Self {
            status: Arc::new(RwLock::new(RuntimeStatus::idle())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn snapshot(&self) -> RuntimeStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> EngineState {
        self.status.read().state
    }

    /// Receive a snapshot on every state or error change. Each subscriber
    /// has its own channel, so every update reaches every subscriber and
    /// nothing queues once a receiver is dropped.
    pub fn subscribe(&self) -> Receiver<RuntimeStatus> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, snapshot: RuntimeStatus) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    /// Mutate-and-publish. Worker-only.
    pub(crate) fn update(&self, f: impl FnOnce(&mut RuntimeStatus)) {
        let published = {
            let mut status = self.status.write();
            f(&mut status);
            status.clone()
        };
        self.publish(published);
    }

    /// Validated state transition. Re-entering the current state is a
    /// silent no-op; anything outside the table is rejected.
    pub(crate) fn transition(&self, to: EngineState) -> Result<(), EngineError> {
        let from = {
            let mut status = self.status.write();
            let from = status.state;
            if from == to {
                return Ok(());
            }
            if !is_valid_transition(from, to) {
                return Err(EngineError::InvalidTransition { from, to });
            }
            status.state = to;
            from
        };
        tracing::info!("engine state: {:?} -> {:?}", from, to);
        self.publish(self.snapshot());
        Ok(())
    }
}
