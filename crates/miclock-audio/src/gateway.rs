use miclock_foundation::GatewayError;

/// Identity of an input device as reported by the audio service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Stable identifier used for reads and writes (e.g. a Pulse source name).
    pub id: String,
    /// Human-readable name for status display.
    pub name: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One volume control as the hardware exposes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelControl {
    /// Scalar volume in [0, 1].
    pub volume: f32,
    pub writable: bool,
}

impl ChannelControl {
    pub fn new(volume: f32, writable: bool) -> Self {
        Self { volume, writable }
    }
}

/// Fixed-shape snapshot of a device's volume controls. Variable-length
/// native structures are converted into this at the gateway boundary;
/// nothing above it ever sees raw hardware layouts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeLayout {
    /// The master control, when the device exposes one.
    pub master: Option<ChannelControl>,
    /// Individual channel controls in reported index order.
    pub channels: Vec<ChannelControl>,
}

impl VolumeLayout {
    /// Read precedence: master when writable, else the loudest channel.
    /// Mirrors the write precedence so reads and writes agree.
    pub fn effective_volume(&self) -> Option<f32> {
        if let Some(master) = self.master.filter(|m| m.writable) {
            return Some(master.volume);
        }
        self.channels
            .iter()
            .map(|c| c.volume)
            .fold(None, |best, v| Some(best.map_or(v, |b: f32| b.max(v))))
    }

    /// True iff the master control is writable, or every individual
    /// channel is.
    pub fn settable(&self) -> bool {
        if self.master.is_some_and(|m| m.writable) {
            return true;
        }
        !self.channels.is_empty() && self.channels.iter().all(|c| c.writable)
    }
}

/// Stateless bridge to the native audio subsystem. Implementations own no
/// engine state; they translate the operations below into hardware calls
/// and classify every failure into `GatewayError` before returning.
pub trait InputGateway: Send + Sync {
    /// Resolve the current default input device. Fails with
    /// `DeviceNotSupported` when no input device exists at all.
    fn default_input_device(&self) -> Result<DeviceHandle, GatewayError>;

    /// Fixed-shape view of the device's volume controls.
    fn volume_layout(&self, device: &DeviceHandle) -> Result<VolumeLayout, GatewayError>;

    /// Write `value` to the device: master control first, else every
    /// individual channel in ascending index order. `value` must already
    /// lie in [0, 1]; out-of-range input is rejected, never truncated.
    fn set_volume(&self, device: &DeviceHandle, value: f32) -> Result<(), GatewayError>;

    fn can_set_volume(&self, device: &DeviceHandle) -> Result<bool, GatewayError> {
        Ok(self.volume_layout(device)?.settable())
    }

    fn volume(&self, device: &DeviceHandle) -> Result<f32, GatewayError> {
        self.volume_layout(device)?
            .effective_volume()
            .ok_or(GatewayError::DeviceNotSupported)
    }
}

/// Range check shared by gateway implementations.
pub(crate) fn reject_out_of_range(value: f32) -> Result<(), GatewayError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GatewayError::Unknown(format!(
            "volume out of range: {value}"
        )))
    }
}
