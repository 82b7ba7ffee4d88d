//! The control point facade.

use std::sync::mpsc;
use std::sync::Arc;

use tracing::{info, warn};

use crate::action::{ActionRequestBuilder, PendingAction};
use crate::config::ControlPointConfig;
use crate::device::DeviceSummary;
use crate::dispatcher::{DispatcherHandle, EventDispatcher};
use crate::error::Result;
use crate::event::{Notification, Notifier, TransportEvent};
use crate::monitor::{MonitorHandle, TimeoutMonitor};
use crate::registry::DeviceRegistry;
use crate::transport::Transport;

/// A running control point: registry, event dispatcher and timeout monitor
/// wired to one transport.
pub struct ControlPoint {
    registry: Arc<DeviceRegistry>,
    actions: ActionRequestBuilder,
    dispatcher: Option<DispatcherHandle>,
    monitor: Option<MonitorHandle>,
}

impl ControlPoint {
    /// Start dispatching `events`, start the timeout monitor and search for
    /// the configured device type.
    ///
    /// Returns the control point and the receiver its notifications go to.
    pub fn start(
        config: ControlPointConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Result<(Self, mpsc::Receiver<Notification>)> {
        config.validate()?;

        let (notifier, notifications) = Notifier::channel();
        let tick = config.tick_interval;
        let registry = Arc::new(DeviceRegistry::new(config, transport, notifier));

        let dispatcher = EventDispatcher::new(Arc::clone(&registry)).spawn(events)?;
        let monitor = TimeoutMonitor::new(Arc::clone(&registry), tick).spawn()?;

        let control_point = Self {
            actions: ActionRequestBuilder::new(Arc::clone(&registry)),
            registry,
            dispatcher: Some(dispatcher),
            monitor: Some(monitor),
        };
        control_point.search()?;

        info!("Control point started");
        Ok((control_point, notifications))
    }

    fn search(&self) -> Result<()> {
        let config = self.registry.config();
        self.registry
            .transport()
            .search(&config.device_type, config.search_mx)?;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Drop every device and search again
    pub fn refresh(&self) -> Result<()> {
        let removed = self.registry.remove_all();
        info!(removed, "Refreshing device list");
        self.search()
    }

    pub fn devices(&self) -> Vec<DeviceSummary> {
        self.registry.list()
    }

    pub fn describe(&self, ordinal: usize) -> Result<String> {
        self.registry.describe(ordinal)
    }

    pub fn query_variable(&self, ordinal: usize, service_index: usize, variable: &str) -> Result<()> {
        self.actions.query_variable(ordinal, service_index, variable)
    }

    pub fn get_values(&self, ordinal: usize, path: &str) -> Result<()> {
        self.actions.submit(PendingAction::get_values(ordinal, path))?;
        Ok(())
    }

    pub fn set_values(&self, ordinal: usize, path: &str, value: &str) -> Result<()> {
        self.actions
            .submit(PendingAction::set_values(ordinal, path, value))?;
        Ok(())
    }

    pub fn set_alarms_enabled(&self, ordinal: usize, enabled: bool) -> Result<()> {
        self.actions
            .submit(PendingAction::set_alarms_enabled(ordinal, enabled))?;
        Ok(())
    }

    /// Stop the monitor and the dispatcher, close the registry (removing
    /// every device) and shut the transport down. Safe to call more than once.
    ///
    /// The event being dispatched when this is called runs to completion
    /// before the registry is closed.
    pub fn stop(&mut self) {
        let Some(mut dispatcher) = self.dispatcher.take() else {
            return;
        };
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        dispatcher.stop();
        let removed = self.registry.close();
        self.registry.transport().shutdown();
        info!(removed, "Control point stopped");
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            warn!("Control point dropped without stop()");
            self.stop();
        }
    }
}
