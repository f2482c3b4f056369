use crossbeam_channel::Sender;

/// Payload-free hints feeding the engine's single signal channel. A signal
/// never carries a volume; the engine always re-reads the active device,
/// so a stale watcher can never attribute a value to the wrong device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftSignal {
    /// Hardware notification: the device's volume may have changed.
    Event,
    /// Polling guard tick: re-read as a backstop against missed events.
    Poll,
    /// The default input device may have changed; re-resolve it.
    DeviceChange,
}

/// Subscription to hardware change notifications for the active device.
/// `disarm` must tear the subscription down completely before returning;
/// a subscription outliving its device is a defect.
pub trait ChangeWatcher: Send {
    /// Start delivering signals into `tx`. Re-arming an armed watcher
    /// replaces the previous subscription.
    fn arm(&mut self, tx: Sender<DriftSignal>) -> Result<(), miclock_foundation::GatewayError>;

    /// Stop delivering signals and release the subscription. Idempotent.
    fn disarm(&mut self);
}
