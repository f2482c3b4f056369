//! The monitoring engine: owns the lock lifecycle, funnels every drift
//! signal through one worker thread, applies corrections through the
//! gateway, and classifies failures into the retry policy.
//!
//! Both signal sources (event watcher and polling guard) post into a
//! single crossbeam channel with the worker as sole consumer, so no two
//! corrections can ever run concurrently and state transitions are
//! observed atomically.

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Receiver, Sender};
use miclock_audio::{
    should_correct, ChangeWatcher, DeviceHandle, DriftSignal, InputGateway, PollGuard,
};
use miclock_foundation::{clamp_unit, real_clock, EngineState, GatewayError, Settings, SharedClock};
use miclock_telemetry::{
    CorrectionOutcome, DiagnosticEvent, DiagnosticsSink, EngineMetrics, TracingSink,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::retry::{Backoff, RetryPolicy};
use crate::status::{RuntimeStatus, StatusHub};

/// Numeric policy knobs. All of these are deliberate policy choices kept
/// configurable rather than hard-coded; the defaults are conservative.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Post-correction window during which drift signals (including the
    /// echo of the engine's own write) are dropped.
    pub debounce_window: Duration,
    /// Identical faults on the same device within this window surface to
    /// the user only once.
    pub error_dedup_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            debounce_window: Duration::from_millis(100),
            error_dedup_window: Duration::from_secs(5),
        }
    }
}

enum Command {
    Start,
    Stop { ack: Sender<()> },
    Pause { until: DateTime<Utc> },
    UpdateSettings(Settings),
    Shutdown,
}

enum Flow {
    Continue,
    Exit,
}

/// Handle to a running engine worker. Dropping it shuts the worker down
/// and joins the thread.
pub struct MonitorEngine {
    cmd_tx: Sender<Command>,
    status: StatusHub,
    metrics: EngineMetrics,
    handle: Option<JoinHandle<()>>,
}

impl MonitorEngine {
    pub fn start(&self) {
        let _ = self.cmd_tx.send(Command::Start);
    }

    /// Disable the lock. Blocks until the worker has torn down the
    /// watcher and timer, so no background signal outlives this call.
    pub fn stop(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.cmd_tx.send(Command::Stop { ack: ack_tx }).is_ok() {
            let _ = ack_rx.recv_timeout(Duration::from_secs(5));
        }
    }

    /// Behave as Idle until `until`, then resume automatically without
    /// the user re-enabling the lock.
    pub fn pause_until(&self, until: DateTime<Utc>) {
        let _ = self.cmd_tx.send(Command::Pause { until });
    }

    pub fn pause_for(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        self.pause_until(Utc::now() + delta);
    }

    /// Push edited settings to the worker. Epsilon and target apply
    /// immediately; the poll interval is applied to the live guard
    /// without a restart.
    pub fn update_settings(&self, settings: Settings) {
        let _ = self.cmd_tx.send(Command::UpdateSettings(settings));
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> Receiver<RuntimeStatus> {
        self.status.subscribe()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.clone()
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct EngineBuilder {
    gateway: Arc<dyn InputGateway>,
    watcher: Box<dyn ChangeWatcher>,
    settings: Settings,
    config: EngineConfig,
    sink: Arc<dyn DiagnosticsSink>,
    metrics: EngineMetrics,
    clock: SharedClock,
}

impl EngineBuilder {
    pub fn new(gateway: Arc<dyn InputGateway>, watcher: Box<dyn ChangeWatcher>) -> Self {
        Self {
            gateway,
            watcher,
            settings: Settings::default(),
            config: EngineConfig::default(),
            sink: Arc::new(TracingSink),
            metrics: EngineMetrics::new(),
            clock: real_clock(),
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn spawn(self) -> MonitorEngine {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        let status = StatusHub::new();
        let metrics = self.metrics.clone();

        let settings = self.settings.sanitized();
        let poller = PollGuard::new(settings.poll_interval());
        let worker = Worker {
            gateway: self.gateway,
            watcher: self.watcher,
            poller,
            settings,
            config: self.config,
            status: status.clone(),
            metrics: self.metrics,
            sink: self.sink,
            clock: self.clock,
            cmd_rx,
            signal_tx,
            signal_rx,
            device: None,
            armed: false,
            backoff: None,
            next_retry_at: None,
            pause_deadline: None,
            suppress_until: None,
            last_failure: None,
            dedup: ErrorDedup::default(),
        };
        let handle = thread::Builder::new()
            .name("volume-lock-engine".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn engine thread");

        MonitorEngine {
            cmd_tx,
            status,
            metrics,
            handle: Some(handle),
        }
    }
}

/// Suppresses repeat surfacing of identical faults (same kind, same
/// device) within a window. Every fault is still recorded; only the
/// user-visible escalation is throttled.
#[derive(Default)]
struct ErrorDedup {
    last: Option<(GatewayError, String, Instant)>,
}

impl ErrorDedup {
    fn should_surface(
        &mut self,
        error: &GatewayError,
        device_id: &str,
        now: Instant,
        window: Duration,
    ) -> bool {
        let duplicate = self.last.as_ref().is_some_and(|(prev, dev, at)| {
            prev.same_kind(error) && dev == device_id && now.duration_since(*at) < window
        });
        if !duplicate {
            self.last = Some((error.clone(), device_id.to_string(), now));
        }
        !duplicate
    }
}

struct Worker {
    gateway: Arc<dyn InputGateway>,
    watcher: Box<dyn ChangeWatcher>,
    poller: PollGuard,
    settings: Settings,
    config: EngineConfig,
    status: StatusHub,
    metrics: EngineMetrics,
    sink: Arc<dyn DiagnosticsSink>,
    clock: SharedClock,
    cmd_rx: Receiver<Command>,
    signal_tx: Sender<DriftSignal>,
    signal_rx: Receiver<DriftSignal>,
    device: Option<DeviceHandle>,
    armed: bool,
    backoff: Option<Backoff>,
    next_retry_at: Option<Instant>,
    pause_deadline: Option<Instant>,
    suppress_until: Option<Instant>,
    last_failure: Option<GatewayError>,
    dedup: ErrorDedup,
}

impl Worker {
    fn run(mut self) {
        if self.settings.lock_enabled {
            if let Some(remaining) = self.settings.pause_remaining(Utc::now()) {
                tracing::info!(?remaining, "lock starting paused");
                self.pause_deadline = Some(self.clock.now() + remaining);
            } else {
                self.rearm();
            }
        }

        let cmd_rx = self.cmd_rx.clone();
        let signal_rx = self.signal_rx.clone();
        loop {
            let timeout = self.next_timeout();
            crossbeam_channel::select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(command) => {
                        if matches!(self.handle_command(command), Flow::Exit) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(signal_rx) -> msg => {
                    if let Ok(signal) = msg {
                        self.handle_signal(signal);
                    }
                }
                default(timeout) => self.handle_deadlines(),
            }
        }
        self.disarm_all();
    }

    fn next_timeout(&self) -> Duration {
        let now = self.clock.now();
        let mut timeout = Duration::from_secs(60);
        for deadline in [self.next_retry_at, self.pause_deadline].into_iter().flatten() {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }
        timeout
    }

    // ─── commands ───

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Start => {
                self.settings.lock_enabled = true;
                // An explicit start overrides any running pause.
                self.settings.pause_until = None;
                self.pause_deadline = None;
                if !self.armed {
                    self.rearm();
                }
                Flow::Continue
            }
            Command::Stop { ack } => {
                self.settings.lock_enabled = false;
                self.settings.pause_until = None;
                self.do_stop();
                let _ = ack.send(());
                Flow::Continue
            }
            Command::Pause { until } => {
                self.settings.pause_until = Some(until);
                if let Some(remaining) = self.settings.pause_remaining(Utc::now()) {
                    self.do_pause(remaining);
                }
                Flow::Continue
            }
            Command::UpdateSettings(settings) => {
                self.apply_settings(settings.sanitized());
                Flow::Continue
            }
            Command::Shutdown => Flow::Exit,
        }
    }

    fn do_stop(&mut self) {
        self.disarm_all();
        self.backoff = None;
        self.next_retry_at = None;
        self.pause_deadline = None;
        self.suppress_until = None;
        self.set_state(EngineState::Idle);
        self.status.update(|s| *s = RuntimeStatus::idle());
    }

    fn do_pause(&mut self, remaining: Duration) {
        tracing::info!(?remaining, "lock paused");
        self.disarm_all();
        self.backoff = None;
        self.next_retry_at = None;
        self.suppress_until = None;
        self.pause_deadline = Some(self.clock.now() + remaining);
        self.set_state(EngineState::Idle);
    }

    fn apply_settings(&mut self, new: Settings) {
        let old = std::mem::replace(&mut self.settings, new.clone());

        if old.poll_interval_secs != new.poll_interval_secs {
            // Live update; the guard does not restart.
            self.poller.set_interval(new.poll_interval());
        }

        if old.pause_until != new.pause_until {
            match new.pause_remaining(Utc::now()) {
                Some(remaining) if new.lock_enabled => self.do_pause(remaining),
                _ => {
                    self.pause_deadline = None;
                    if new.lock_enabled && !self.armed {
                        self.rearm();
                    }
                }
            }
        }

        if old.lock_enabled != new.lock_enabled {
            if new.lock_enabled {
                if self.pause_deadline.is_none() && !self.armed {
                    self.rearm();
                }
            } else {
                self.do_stop();
            }
        } else if self.armed
            && self.status.state() == EngineState::Monitoring
            && (old.target_volume != new.target_volume || old.epsilon != new.epsilon)
        {
            // Re-evaluate the current volume under the new policy.
            self.check_volume();
        }
    }

    // ─── arming ───

    fn arm_sources(&mut self) {
        if self.armed {
            return;
        }
        if let Err(e) = self.watcher.arm(self.signal_tx.clone()) {
            tracing::warn!(error = %e, "event watcher unavailable; relying on polling guard");
        }
        self.poller.set_interval(self.settings.poll_interval());
        self.poller.start(self.signal_tx.clone());
        self.armed = true;
    }

    fn disarm_all(&mut self) {
        self.watcher.disarm();
        self.poller.stop();
        self.armed = false;
        self.device = None;
        // Drop anything the dead sources already queued.
        while self.signal_rx.try_recv().is_ok() {}
    }

    fn rearm(&mut self) {
        self.arm_sources();
        match self.gateway.default_input_device() {
            Ok(device) => match self.gateway.can_set_volume(&device) {
                Ok(supported) => self.install_device(device, supported),
                Err(err) => self.handle_failure(err),
            },
            Err(err) => self.resolve_failure(err),
        }
    }

    /// Bind a freshly resolved device and rebuild the runtime status
    /// around it. Ends the current recovery episode either way.
    fn install_device(&mut self, device: DeviceHandle, supported: bool) {
        let previous = self.device.as_ref().map(|d| d.name.clone());
        let changed = self.device.as_ref().map(|d| d.id != device.id).unwrap_or(true);
        if changed {
            if previous.is_some() {
                self.metrics.device_changes.fetch_add(1, Ordering::Relaxed);
            }
            self.sink.record(DiagnosticEvent::DeviceChanged {
                from: previous,
                to: Some(device.name.clone()),
            });
        }

        self.device = Some(device.clone());
        self.suppress_until = None;
        self.backoff = None;
        self.next_retry_at = None;
        self.last_failure = None;
        let state = self.status.state();
        self.status.update(|s| {
            *s = RuntimeStatus {
                active_device_id: Some(device.id.clone()),
                active_device_name: Some(device.name.clone()),
                state,
                last_error: None,
                last_correction_at: None,
            };
        });
        self.arm_sources();

        if supported {
            self.set_state(EngineState::Monitoring);
            self.check_volume();
        } else {
            self.surface(&GatewayError::DeviceNotSupported);
            self.set_state(EngineState::Unsupported);
        }
    }

    // ─── signals ───

    fn handle_signal(&mut self, signal: DriftSignal) {
        match signal {
            DriftSignal::Event => {
                self.metrics.signals_event.fetch_add(1, Ordering::Relaxed);
            }
            DriftSignal::Poll => {
                self.metrics.signals_poll.fetch_add(1, Ordering::Relaxed);
            }
            DriftSignal::DeviceChange => {
                self.handle_device_change();
                return;
            }
        }

        match self.status.state() {
            EngineState::Monitoring => {
                if self.suppressed() {
                    self.metrics.signals_debounced.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.check_volume();
            }
            // No correction attempts here; poll ticks only watch for a
            // replacement device.
            EngineState::Unsupported => self.probe_device_identity(),
            EngineState::Error => {
                if self.next_retry_at.is_none() {
                    self.probe_device_identity();
                }
            }
            // Idle and Correcting signals are stale leftovers; dropping
            // them is the defined no-op.
            _ => {}
        }
    }

    fn suppressed(&self) -> bool {
        self.suppress_until
            .is_some_and(|until| self.clock.now() < until)
    }

    fn probe_device_identity(&mut self) {
        let Ok(device) = self.gateway.default_input_device() else {
            return;
        };
        let changed = self.device.as_ref().map(|d| d.id != device.id).unwrap_or(true);
        if changed {
            self.handle_device_change();
        }
    }

    fn handle_device_change(&mut self) {
        match self.gateway.default_input_device() {
            Ok(device) => {
                if self.device.as_ref().is_some_and(|d| d.id == device.id) {
                    // Spurious server event; the default did not move.
                    return;
                }
                // Rebind the subscription before taking on the new device
                // so a stale watcher can never signal for the old one.
                if self.armed {
                    self.watcher.disarm();
                    if let Err(e) = self.watcher.arm(self.signal_tx.clone()) {
                        tracing::warn!(error = %e, "event watcher unavailable; relying on polling guard");
                    }
                }
                match self.gateway.can_set_volume(&device) {
                    Ok(supported) => self.install_device(device, supported),
                    Err(err) => self.handle_failure(err),
                }
            }
            Err(err) => self.resolve_failure(err),
        }
    }

    // ─── correction ───

    fn check_volume(&mut self) {
        let Some(device) = self.device.clone() else {
            return;
        };
        match self.gateway.volume(&device) {
            Ok(current) => {
                if should_correct(current, self.settings.target_volume, self.settings.epsilon) {
                    self.correct(&device, current);
                }
            }
            Err(err) => self.handle_failure(err),
        }
    }

    fn correct(&mut self, device: &DeviceHandle, before: f32) {
        self.set_state(EngineState::Correcting);
        let target = clamp_unit(self.settings.target_volume);
        self.metrics
            .corrections_attempted
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(device = %device.name, before, target, "correcting drift");

        // The write may block; signals queued meanwhile are debounced
        // below rather than turned into a second correction.
        let result = self.gateway.set_volume(device, target);
        let now = self.clock.now();
        self.suppress_until = Some(now + self.config.debounce_window);

        match result {
            Ok(()) => {
                self.metrics.mark_correction_applied(now);
                self.status.update(|s| s.last_correction_at = Some(now));
                self.sink.record(DiagnosticEvent::Correction {
                    device: device.name.clone(),
                    before,
                    after: target,
                    outcome: CorrectionOutcome::Applied,
                });
                self.set_state(EngineState::Monitoring);
                self.backoff = None;
                self.next_retry_at = None;
            }
            Err(err) => {
                self.metrics
                    .corrections_failed
                    .fetch_add(1, Ordering::Relaxed);
                self.sink.record(DiagnosticEvent::Correction {
                    device: device.name.clone(),
                    before,
                    after: target,
                    outcome: CorrectionOutcome::Failed(err.clone()),
                });
                if err.is_recoverable() || matches!(err, GatewayError::DeviceNotSupported) {
                    self.set_state(EngineState::Monitoring);
                    self.handle_failure(err);
                } else {
                    self.enter_terminal(&err);
                }
            }
        }
        self.drain_inflight_signals();
    }

    fn drain_inflight_signals(&mut self) {
        let mut device_change = false;
        while let Ok(signal) = self.signal_rx.try_recv() {
            match signal {
                DriftSignal::DeviceChange => device_change = true,
                _ => {
                    self.metrics.signals_debounced.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if device_change {
            self.handle_device_change();
        }
    }

    // ─── failure classification ───

    /// Failure while resolving the default device: no device at all means
    /// the stale handle must not keep matching a future probe.
    fn resolve_failure(&mut self, error: GatewayError) {
        if matches!(error, GatewayError::DeviceNotSupported) {
            self.device = None;
        }
        self.handle_failure(error);
    }

    fn handle_failure(&mut self, error: GatewayError) {
        match &error {
            GatewayError::DeviceNotSupported => {
                self.backoff = None;
                self.next_retry_at = None;
                self.surface(&error);
                self.set_state(EngineState::Unsupported);
            }
            err if err.is_recoverable() => {
                self.metrics
                    .errors_recoverable
                    .fetch_add(1, Ordering::Relaxed);
                self.record_fault(&error, false);
                self.last_failure = Some(error);
                self.begin_recovery();
            }
            _ => self.enter_terminal(&error),
        }
    }

    fn begin_recovery(&mut self) {
        self.set_state(EngineState::Error);
        if self.backoff.is_none() {
            self.backoff = Some(Backoff::new(self.config.retry.clone()));
        }
        match self.backoff.as_mut().and_then(|b| b.next_delay()) {
            Some(delay) => {
                tracing::warn!(?delay, "recoverable fault; scheduling retry");
                self.next_retry_at = Some(self.clock.now() + delay);
            }
            None => {
                let error = self
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| GatewayError::Unknown("retry budget exhausted".into()));
                self.enter_terminal(&error);
            }
        }
    }

    fn attempt_retry(&mut self) {
        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
        match self.try_recover() {
            Ok(()) => {}
            Err(err) => {
                if err.is_recoverable() {
                    self.metrics
                        .errors_recoverable
                        .fetch_add(1, Ordering::Relaxed);
                    self.record_fault(&err, false);
                    self.last_failure = Some(err);
                    self.begin_recovery();
                } else if matches!(err, GatewayError::DeviceNotSupported) {
                    self.resolve_failure(err);
                } else {
                    self.enter_terminal(&err);
                }
            }
        }
    }

    fn try_recover(&mut self) -> Result<(), GatewayError> {
        let device = self.gateway.default_input_device()?;
        let supported = self.gateway.can_set_volume(&device)?;
        self.install_device(device, supported);
        Ok(())
    }

    /// Terminal error: no further automatic attempts until a device
    /// change or a lock toggle re-arms the engine.
    fn enter_terminal(&mut self, error: &GatewayError) {
        self.metrics.errors_fatal.fetch_add(1, Ordering::Relaxed);
        self.backoff = None;
        self.next_retry_at = None;
        self.surface(error);
        self.set_state(EngineState::Error);
    }

    /// User-visible escalation with duplicate suppression. Every fault
    /// still reaches the diagnostics sink, surfaced or not.
    fn surface(&mut self, error: &GatewayError) {
        let device_id = self
            .device
            .as_ref()
            .map(|d| d.id.as_str())
            .unwrap_or("")
            .to_string();
        let surfaced = self.dedup.should_surface(
            error,
            &device_id,
            self.clock.now(),
            self.config.error_dedup_window,
        );
        if surfaced {
            tracing::error!(error = %error, hint = error.user_hint(), "volume lock fault");
            self.status.update(|s| s.last_error = Some(error.clone()));
        } else {
            self.metrics
                .errors_suppressed
                .fetch_add(1, Ordering::Relaxed);
        }
        self.record_fault(error, surfaced);
    }

    fn record_fault(&self, error: &GatewayError, surfaced: bool) {
        self.sink.record(DiagnosticEvent::Fault {
            error: error.clone(),
            recoverable: error.is_recoverable(),
            surfaced,
        });
    }

    // ─── deadlines ───

    fn handle_deadlines(&mut self) {
        let now = self.clock.now();
        if self.pause_deadline.is_some_and(|deadline| now >= deadline) {
            self.pause_deadline = None;
            self.settings.pause_until = None;
            if self.settings.lock_enabled {
                tracing::info!("pause expired; resuming volume lock");
                self.rearm();
            }
        }
        if self.next_retry_at.is_some_and(|deadline| now >= deadline) {
            self.next_retry_at = None;
            self.attempt_retry();
        }
    }

    fn set_state(&mut self, to: EngineState) {
        let from = self.status.state();
        if from == to {
            return;
        }
        match self.status.transition(to) {
            Ok(()) => self.sink.record(DiagnosticEvent::Transition { from, to }),
            Err(e) => tracing::warn!("{e}"),
        }
    }
}
