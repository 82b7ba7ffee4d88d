//! Advertisement lifetime sweeps.
//!
//! Every tick each device's lifetime drops by the tick size. Devices that
//! reach zero are removed; devices that will expire within two ticks get a
//! search scoped to their UDN so they re-advertise in time.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::registry::DeviceRegistry;

/// UDNs touched by one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Devices removed because their lifetime ran out
    pub expired: Vec<String>,
    /// Devices sent a renewal search
    pub renewals: Vec<String>,
}

/// Ages the registry on a fixed tick.
pub struct TimeoutMonitor {
    registry: Arc<DeviceRegistry>,
    tick: Duration,
}

impl TimeoutMonitor {
    pub fn new(registry: Arc<DeviceRegistry>, tick: Duration) -> Self {
        Self { registry, tick }
    }

    fn tick_secs(&self) -> i64 {
        self.tick.as_secs() as i64
    }

    /// Run one tick
    pub fn sweep(&self) -> SweepReport {
        let tick = self.tick_secs();
        let aged = self.registry.age(tick);

        let mut report = SweepReport::default();
        for device in aged.expired {
            info!(udn = %device.udn, "Advertisement expired, removing device");
            report.expired.push(device.udn.clone());
            self.registry.teardown(device);
        }

        let mx = u32::try_from(tick).unwrap_or(u32::MAX);
        for udn in aged.renewals {
            debug!(udn = %udn, "Advertisement about to expire, searching");
            if let Err(e) = self.registry.transport().search(&udn, mx) {
                warn!(udn = %udn, error = %e, "Renewal search failed");
            }
            report.renewals.push(udn);
        }

        report
    }

    /// Sweep on a background thread until the handle is stopped
    pub fn spawn(self) -> std::io::Result<MonitorHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("cms-timeout-monitor".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(self.tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.sweep();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("Timeout monitor stopping");
                        break;
                    }
                }
            })?;

        Ok(MonitorHandle {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Handle to a running [`TimeoutMonitor`] thread
pub struct MonitorHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the monitor and wait for its current sweep to finish
    pub fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Timeout monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
