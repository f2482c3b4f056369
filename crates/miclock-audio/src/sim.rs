//! In-memory gateway and watcher for tests and demos. The simulated
//! device's volume can be moved underneath the engine, hardware failures
//! can be scripted, and every write is recorded for inspection.

use crate::gateway::{reject_out_of_range, ChannelControl, DeviceHandle, InputGateway, VolumeLayout};
use crate::watcher::{ChangeWatcher, DriftSignal};
use crossbeam_channel::Sender;
use miclock_foundation::GatewayError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimDevice {
    pub id: String,
    pub name: String,
    pub master: Option<ChannelControl>,
    pub channels: Vec<ChannelControl>,
}

impl SimDevice {
    /// Stereo device with a writable master at `volume`.
    pub fn supported(id: &str, volume: f32) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{id} (sim)"),
            master: Some(ChannelControl::new(volume, true)),
            channels: vec![
                ChannelControl::new(volume, true),
                ChannelControl::new(volume, true),
            ],
        }
    }

    /// Device whose controls all refuse writes.
    pub fn read_only(id: &str, volume: f32) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{id} (sim)"),
            master: Some(ChannelControl::new(volume, false)),
            channels: vec![ChannelControl::new(volume, false)],
        }
    }

    /// No master control; only per-channel writes work.
    pub fn channels_only(id: &str, volumes: &[f32]) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{id} (sim)"),
            master: None,
            channels: volumes
                .iter()
                .map(|&v| ChannelControl::new(v, true))
                .collect(),
        }
    }
}

#[derive(Default)]
struct SimState {
    device: Option<SimDevice>,
    fail_reads: VecDeque<GatewayError>,
    fail_writes: VecDeque<GatewayError>,
    writes: Vec<f32>,
    channel_writes: Vec<(usize, f32)>,
    write_delay: Duration,
}

#[derive(Clone, Default)]
pub struct SimGateway {
    inner: Arc<Mutex<SimState>>,
}

impl SimGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: SimDevice) -> Self {
        let gateway = Self::new();
        gateway.set_device(Some(device));
        gateway
    }

    /// Swap (or unplug, with `None`) the default input device.
    pub fn set_device(&self, device: Option<SimDevice>) {
        self.inner.lock().device = device;
    }

    /// Another "application" moves the volume underneath the engine.
    pub fn drift_to(&self, volume: f32) {
        let mut state = self.inner.lock();
        if let Some(device) = state.device.as_mut() {
            if let Some(master) = device.master.as_mut() {
                master.volume = volume;
            }
            for channel in device.channels.iter_mut() {
                channel.volume = volume;
            }
        }
    }

    /// Queue `count` read failures of the given kind.
    pub fn fail_reads(&self, error: GatewayError, count: usize) {
        let mut state = self.inner.lock();
        for _ in 0..count {
            state.fail_reads.push_back(error.clone());
        }
    }

    /// Queue `count` write failures of the given kind.
    pub fn fail_writes(&self, error: GatewayError, count: usize) {
        let mut state = self.inner.lock();
        for _ in 0..count {
            state.fail_writes.push_back(error.clone());
        }
    }

    /// Make writes block, simulating a slow hardware call.
    pub fn set_write_delay(&self, delay: Duration) {
        self.inner.lock().write_delay = delay;
    }

    /// Every successful master-path write, in order.
    pub fn writes(&self) -> Vec<f32> {
        self.inner.lock().writes.clone()
    }

    /// Per-channel fallback writes as (index, value), in order.
    pub fn channel_writes(&self) -> Vec<(usize, f32)> {
        self.inner.lock().channel_writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().writes.len()
    }
}

impl InputGateway for SimGateway {
    fn default_input_device(&self) -> Result<DeviceHandle, GatewayError> {
        let state = self.inner.lock();
        state
            .device
            .as_ref()
            .map(|d| DeviceHandle::new(&d.id, &d.name))
            .ok_or(GatewayError::DeviceNotSupported)
    }

    fn volume_layout(&self, device: &DeviceHandle) -> Result<VolumeLayout, GatewayError> {
        let mut state = self.inner.lock();
        if let Some(err) = state.fail_reads.pop_front() {
            return Err(err);
        }
        let current = state
            .device
            .as_ref()
            .ok_or(GatewayError::DeviceDisconnected)?;
        if current.id != device.id {
            return Err(GatewayError::DeviceDisconnected);
        }
        Ok(VolumeLayout {
            master: current.master,
            channels: current.channels.clone(),
        })
    }

    fn set_volume(&self, device: &DeviceHandle, value: f32) -> Result<(), GatewayError> {
        reject_out_of_range(value)?;
        let delay = {
            let mut state = self.inner.lock();
            if let Some(err) = state.fail_writes.pop_front() {
                return Err(err);
            }
            state.write_delay
        };
        // Block outside the lock so observers can read while the "hardware
        // call" is outstanding.
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.inner.lock();
        let device_id = device.id.clone();
        let current = state
            .device
            .as_mut()
            .ok_or(GatewayError::DeviceDisconnected)?;
        if current.id != device_id {
            return Err(GatewayError::DeviceDisconnected);
        }

        if current.master.is_some_and(|m| m.writable) {
            if let Some(master) = current.master.as_mut() {
                master.volume = value;
            }
            for channel in current.channels.iter_mut() {
                channel.volume = value;
            }
            state.writes.push(value);
            return Ok(());
        }

        if current.channels.is_empty() || current.channels.iter().any(|c| !c.writable) {
            return Err(GatewayError::DeviceNotSupported);
        }
        let mut per_channel = Vec::new();
        for (index, channel) in current.channels.iter_mut().enumerate() {
            channel.volume = value;
            per_channel.push((index, value));
        }
        state.channel_writes.extend(per_channel);
        state.writes.push(value);
        Ok(())
    }
}

/// Watcher whose signals are injected by the test. Emission after disarm
/// goes nowhere, which is exactly what the teardown tests assert.
#[derive(Clone, Default)]
pub struct SimWatcher {
    tx: Arc<Mutex<Option<Sender<DriftSignal>>>>,
}

impl SimWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a signal if armed; returns whether it was delivered.
    pub fn emit(&self, signal: DriftSignal) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.tx.lock().is_some()
    }
}

impl ChangeWatcher for SimWatcher {
    fn arm(&mut self, tx: Sender<DriftSignal>) -> Result<(), GatewayError> {
        *self.tx.lock() = Some(tx);
        Ok(())
    }

    fn disarm(&mut self) {
        *self.tx.lock() = None;
    }
}
