//! PulseAudio/PipeWire gateway via `pactl`.
//!
//! All variable-shape `pactl` output is parsed here into the fixed
//! `VolumeLayout` contract; raw source blocks never leave this module.
//! `MICLOCK_MOCK_DEFAULT_SOURCE` and `MICLOCK_MOCK_SOURCES` substitute
//! command output for tests on machines without a sound server.

use crate::gateway::{reject_out_of_range, ChannelControl, DeviceHandle, InputGateway, VolumeLayout};
use crate::watcher::{ChangeWatcher, DriftSignal};
use crossbeam_channel::Sender;
use miclock_foundation::GatewayError;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// PA_VOLUME_NORM: raw volume for 100%.
const VOLUME_NORM: f32 = 65536.0;

#[derive(Default)]
pub struct PulseGateway;

impl PulseGateway {
    pub fn new() -> Self {
        Self
    }

    fn list_sources(&self) -> Result<Vec<SourceRecord>, GatewayError> {
        let output = if let Ok(mock) = std::env::var("MICLOCK_MOCK_SOURCES") {
            mock
        } else {
            run_pactl(&["list", "sources"])?
        };
        Ok(parse_source_blocks(&output))
    }

    fn find_source(&self, id: &str) -> Result<SourceRecord, GatewayError> {
        self.list_sources()?
            .into_iter()
            .find(|s| s.name == id)
            .ok_or(GatewayError::DeviceDisconnected)
    }
}

impl InputGateway for PulseGateway {
    fn default_input_device(&self) -> Result<DeviceHandle, GatewayError> {
        let id = if let Ok(mock) = std::env::var("MICLOCK_MOCK_DEFAULT_SOURCE") {
            mock.trim().to_string()
        } else {
            run_pactl(&["get-default-source"])?.trim().to_string()
        };
        if id.is_empty() {
            return Err(GatewayError::DeviceNotSupported);
        }
        let name = self
            .find_source(&id)
            .map(|s| s.description)
            .unwrap_or_else(|_| id.clone());
        Ok(DeviceHandle::new(id, name))
    }

    fn volume_layout(&self, device: &DeviceHandle) -> Result<VolumeLayout, GatewayError> {
        Ok(self.find_source(&device.id)?.layout())
    }

    fn set_volume(&self, device: &DeviceHandle, value: f32) -> Result<(), GatewayError> {
        reject_out_of_range(value)?;
        let layout = self.volume_layout(device)?;
        if !layout.settable() {
            return Err(GatewayError::DeviceNotSupported);
        }
        // Pulse exposes one per-source control, so the master write covers
        // every channel in a single call.
        let raw = (value * VOLUME_NORM).round() as u32;
        if std::env::var("MICLOCK_MOCK_SOURCES").is_ok() {
            return Ok(());
        }
        run_pactl(&["set-source-volume", &device.id, &raw.to_string()]).map(|_| ())
    }
}

fn run_pactl(args: &[&str]) -> Result<String, GatewayError> {
    let output = Command::new("pactl")
        .args(args)
        .output()
        .map_err(|e| GatewayError::Unknown(format!("pactl unavailable: {e}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(classify_pactl_failure(&String::from_utf8_lossy(
            &output.stderr,
        )))
    }
}

/// Fold a pactl failure message into the closed error taxonomy.
fn classify_pactl_failure(stderr: &str) -> GatewayError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such entity") || lower.contains("no such device") {
        GatewayError::DeviceDisconnected
    } else if lower.contains("access denied") || lower.contains("permission") {
        GatewayError::PermissionDenied
    } else {
        GatewayError::Unknown(stderr.trim().to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SourceRecord {
    name: String,
    description: String,
    flags: Option<String>,
    /// Per-channel scalar volumes in reported order.
    channels: Vec<f32>,
}

impl SourceRecord {
    fn writable(&self) -> bool {
        // Sources without a flags line (and software sources) accept
        // volume writes; only flagged sources lacking any volume control
        // are treated as read-only.
        self.flags.as_deref().map_or(true, |f| {
            f.contains("HW_VOLUME_CTRL") || f.contains("DECIBEL_VOLUME")
        })
    }

    fn layout(&self) -> VolumeLayout {
        let writable = self.writable();
        let channels: Vec<ChannelControl> = self
            .channels
            .iter()
            .map(|&v| ChannelControl::new(v, writable))
            .collect();
        // The per-source control acts as the master: one write covers all
        // channels, and its readback is the loudest channel.
        let master = channels
            .iter()
            .map(|c| c.volume)
            .fold(None, |best, v| Some(best.map_or(v, |b: f32| b.max(v))))
            .map(|v| ChannelControl::new(v, writable));
        VolumeLayout { master, channels }
    }
}

fn parse_source_blocks(output: &str) -> Vec<SourceRecord> {
    let mut records = Vec::new();
    let mut current: Option<SourceRecord> = None;

    for line in output.lines() {
        if line.starts_with("Source #") {
            if let Some(record) = current.take() {
                records.push(record);
            }
            current = Some(SourceRecord {
                name: String::new(),
                description: String::new(),
                flags: None,
                channels: Vec::new(),
            });
            continue;
        }
        let Some(record) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("Name: ") {
            record.name = rest.trim().to_string();
        } else if let Some(rest) = trimmed.strip_prefix("Description: ") {
            record.description = rest.trim().to_string();
        } else if let Some(rest) = trimmed.strip_prefix("Flags: ") {
            record.flags = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Volume: ") {
            record.channels = parse_volume_line(rest);
        }
    }
    if let Some(record) = current.take() {
        records.push(record);
    }
    records.retain(|r| !r.name.is_empty());
    records
}

/// Parse `front-left: 42598 /  65% / -11.23 dB, front-right: ...` into
/// per-channel scalars.
fn parse_volume_line(rest: &str) -> Vec<f32> {
    rest.split(',')
        .filter_map(|entry| {
            let after_label = entry.split_once(':')?.1;
            let raw = after_label.split('/').next()?.trim();
            let raw: u32 = raw.parse().ok()?;
            Some(raw as f32 / VOLUME_NORM)
        })
        .collect()
}

/// Event watcher backed by a long-running `pactl subscribe` child process.
/// Source change events become re-read hints; server and source add or
/// remove events become device-change hints.
#[derive(Default)]
pub struct PulseSubscribeWatcher {
    child: Option<Child>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl PulseSubscribeWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

fn classify_subscribe_line(line: &str) -> Option<DriftSignal> {
    if line.contains("on source-output") {
        return None;
    }
    if line.contains("on server") {
        return Some(DriftSignal::DeviceChange);
    }
    if line.contains("on source") {
        if line.contains("'change'") {
            Some(DriftSignal::Event)
        } else if line.contains("'new'") || line.contains("'remove'") {
            Some(DriftSignal::DeviceChange)
        } else {
            None
        }
    } else {
        None
    }
}

impl ChangeWatcher for PulseSubscribeWatcher {
    fn arm(&mut self, tx: Sender<DriftSignal>) -> Result<(), GatewayError> {
        self.disarm();

        let mut child = Command::new("pactl")
            .arg("subscribe")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GatewayError::Unknown(format!("pactl subscribe unavailable: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Unknown("pactl subscribe has no stdout".into()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("volume-events".to_string())
            .spawn(move || {
                tracing::debug!("event watcher armed");
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(line) = line else { break };
                    let Some(signal) = classify_subscribe_line(&line) else {
                        continue;
                    };
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
                tracing::debug!("event watcher stopped");
            })
            .expect("failed to spawn event watcher thread");

        self.child = Some(child);
        self.handle = Some(handle);
        Ok(())
    }

    fn disarm(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Killing the child closes the reader's pipe and unblocks it.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PulseSubscribeWatcher {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SOURCES_FIXTURE: &str = "\
Source #55
\tState: SUSPENDED
\tName: alsa_input.usb-mic.analog-stereo
\tDescription: USB Microphone Analog Stereo
\tMute: no
\tVolume: front-left: 42598 /  65% / -11.23 dB,   front-right: 49152 /  75% / -7.50 dB
\t        balance 0.00
\tBase Volume: 65536 / 100% / 0.00 dB
\tFlags: HARDWARE HW_MUTE_CTRL HW_VOLUME_CTRL DECIBEL_VOLUME LATENCY

Source #56
\tState: RUNNING
\tName: readonly.monitor
\tDescription: Monitor of Built-in Audio
\tMute: no
\tVolume: mono: 65536 / 100% / 0.00 dB
\tFlags: LATENCY
";

    #[test]
    fn parses_channels_and_descriptions() {
        let records = parse_source_blocks(SOURCES_FIXTURE);
        assert_eq!(records.len(), 2);

        let mic = &records[0];
        assert_eq!(mic.name, "alsa_input.usb-mic.analog-stereo");
        assert_eq!(mic.description, "USB Microphone Analog Stereo");
        assert_eq!(mic.channels.len(), 2);
        assert!((mic.channels[0] - 0.65).abs() < 0.005);
        assert!((mic.channels[1] - 0.75).abs() < 0.005);
        assert!(mic.writable());

        let monitor = &records[1];
        assert_eq!(monitor.channels, vec![1.0]);
        assert!(!monitor.writable());
    }

    #[test]
    fn base_volume_line_is_not_mistaken_for_channels() {
        let records = parse_source_blocks(SOURCES_FIXTURE);
        // Base Volume is 100%; the parsed channels stay at 65%/75%.
        assert!(records[0].channels.iter().all(|&v| v < 0.8));
    }

    #[test]
    fn layout_master_reads_the_loudest_channel() {
        let records = parse_source_blocks(SOURCES_FIXTURE);
        let layout = records[0].layout();
        assert!(layout.settable());
        let effective = layout.effective_volume().unwrap();
        assert!((effective - 0.75).abs() < 0.005);

        let readonly = records[1].layout();
        assert!(!readonly.settable());
    }

    #[test]
    fn malformed_output_parses_to_nothing() {
        assert!(parse_source_blocks("").is_empty());
        assert!(parse_source_blocks("garbage\nmore garbage").is_empty());
        // A block with no Name line is dropped rather than half-built.
        assert!(parse_source_blocks("Source #1\n\tMute: no\n").is_empty());
    }

    #[test]
    fn failure_classification_covers_the_taxonomy() {
        assert_eq!(
            classify_pactl_failure("Failure: No such entity"),
            GatewayError::DeviceDisconnected
        );
        assert_eq!(
            classify_pactl_failure("Failure: Access denied"),
            GatewayError::PermissionDenied
        );
        assert!(matches!(
            classify_pactl_failure("Connection refused"),
            GatewayError::Unknown(_)
        ));
    }

    #[test]
    fn subscribe_lines_map_to_signals() {
        assert_eq!(
            classify_subscribe_line("Event 'change' on source #55"),
            Some(DriftSignal::Event)
        );
        assert_eq!(
            classify_subscribe_line("Event 'change' on server #0"),
            Some(DriftSignal::DeviceChange)
        );
        assert_eq!(
            classify_subscribe_line("Event 'new' on source #57"),
            Some(DriftSignal::DeviceChange)
        );
        assert_eq!(
            classify_subscribe_line("Event 'remove' on source #57"),
            Some(DriftSignal::DeviceChange)
        );
        assert_eq!(classify_subscribe_line("Event 'change' on sink #42"), None);
        assert_eq!(
            classify_subscribe_line("Event 'change' on source-output #3"),
            None
        );
    }

    #[test]
    #[serial]
    fn mocked_gateway_resolves_and_reads() {
        std::env::set_var(
            "MICLOCK_MOCK_DEFAULT_SOURCE",
            "alsa_input.usb-mic.analog-stereo",
        );
        std::env::set_var("MICLOCK_MOCK_SOURCES", SOURCES_FIXTURE);

        let gateway = PulseGateway::new();
        let device = gateway.default_input_device().unwrap();
        assert_eq!(device.id, "alsa_input.usb-mic.analog-stereo");
        assert_eq!(device.name, "USB Microphone Analog Stereo");
        assert!(gateway.can_set_volume(&device).unwrap());
        assert!((gateway.volume(&device).unwrap() - 0.75).abs() < 0.005);
        gateway.set_volume(&device, 0.8).unwrap();

        std::env::remove_var("MICLOCK_MOCK_DEFAULT_SOURCE");
        std::env::remove_var("MICLOCK_MOCK_SOURCES");
    }

    #[test]
    #[serial]
    fn mocked_gateway_rejects_readonly_writes() {
        std::env::set_var("MICLOCK_MOCK_DEFAULT_SOURCE", "readonly.monitor");
        std::env::set_var("MICLOCK_MOCK_SOURCES", SOURCES_FIXTURE);

        let gateway = PulseGateway::new();
        let device = gateway.default_input_device().unwrap();
        assert!(!gateway.can_set_volume(&device).unwrap());
        assert_eq!(
            gateway.set_volume(&device, 0.5),
            Err(GatewayError::DeviceNotSupported)
        );

        std::env::remove_var("MICLOCK_MOCK_DEFAULT_SOURCE");
        std::env::remove_var("MICLOCK_MOCK_SOURCES");
    }

    #[test]
    #[serial]
    fn unknown_source_reads_as_disconnected() {
        std::env::set_var("MICLOCK_MOCK_SOURCES", SOURCES_FIXTURE);
        let gateway = PulseGateway::new();
        let ghost = DeviceHandle::new("gone.source", "Gone");
        assert_eq!(
            gateway.volume_layout(&ghost),
            Err(GatewayError::DeviceDisconnected)
        );
        std::env::remove_var("MICLOCK_MOCK_SOURCES");
    }

    #[test]
    #[serial]
    fn out_of_range_write_is_rejected_before_touching_pactl() {
        std::env::set_var("MICLOCK_MOCK_DEFAULT_SOURCE", "alsa_input.usb-mic.analog-stereo");
        std::env::set_var("MICLOCK_MOCK_SOURCES", SOURCES_FIXTURE);
        let gateway = PulseGateway::new();
        let device = gateway.default_input_device().unwrap();
        assert!(gateway.set_volume(&device, 1.5).is_err());
        assert!(gateway.set_volume(&device, -0.1).is_err());
        std::env::remove_var("MICLOCK_MOCK_DEFAULT_SOURCE");
        std::env::remove_var("MICLOCK_MOCK_SOURCES");
    }
}
