use crate::watcher::DriftSignal;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep slice so stop and interval changes take effect promptly.
const NAP: Duration = Duration::from_millis(20);

/// Periodic backstop against missed or coalesced hardware notifications.
/// Restartable; the interval can be changed while running without a
/// restart. `stop` joins the thread before returning, leaving no
/// background activity.
pub struct PollGuard {
    interval_ms: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollGuard {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: Arc::new(AtomicU64::new(interval.as_millis().max(1) as u64)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Applies live; the in-flight wait re-reads the interval each slice.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis().max(1) as u64, Ordering::SeqCst);
    }

    pub fn start(&mut self, tx: Sender<DriftSignal>) {
        if self.is_running() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let interval_ms = Arc::clone(&self.interval_ms);
        let handle = thread::Builder::new()
            .name("volume-poll".to_string())
            .spawn(move || {
                tracing::debug!("polling guard started");
                let mut last_tick = Instant::now();
                while running.load(Ordering::SeqCst) {
                    let interval = Duration::from_millis(interval_ms.load(Ordering::SeqCst));
                    if last_tick.elapsed() >= interval {
                        last_tick = Instant::now();
                        if tx.send(DriftSignal::Poll).is_err() {
                            // Consumer gone; nothing left to feed.
                            break;
                        }
                    }
                    thread::sleep(NAP.min(interval));
                }
                tracing::debug!("polling guard stopped");
            })
            .expect("failed to spawn polling guard thread");

        self.handle = Some(handle);
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.stop();
    }
}
