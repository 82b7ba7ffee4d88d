//! Routing of transport callbacks into the registry.
//!
//! The dispatcher is the only consumer of the transport event channel. Each
//! event is handled to completion before the next one is read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::differencer;
use crate::error::{ControlPointError, DecodeError, Result};
use crate::event::{Advertisement, Notification, SubscriptionUpdate, TransportEvent};
use crate::registry::{DeviceRegistry, UpsertOutcome};
use crate::resolver::DeviceDescription;
use crate::xml::{first_document_item, tree};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Applies transport events to a registry.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<DeviceRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Handle one event.
    ///
    /// Errors are local to the event: callers log them and carry on.
    pub fn dispatch(&self, event: TransportEvent) -> Result<()> {
        trace!(kind = event.kind(), "Dispatching transport event");

        match event {
            TransportEvent::AdvertisementAlive(advertisement)
            | TransportEvent::SearchResult(advertisement) => self.on_advertisement(advertisement),

            TransportEvent::AdvertisementByeBye { device_id } => {
                debug!(udn = %device_id, "Device said byebye");
                if let Err(e) = self.registry.remove(&device_id) {
                    debug!(error = %e, "Byebye ignored");
                }
                Ok(())
            }

            TransportEvent::SearchTimeout => {
                debug!("Search window closed");
                Ok(())
            }

            TransportEvent::ActionComplete {
                control_url,
                action,
                outcome,
            } => self.on_action_complete(control_url, action, outcome),

            TransportEvent::StateVariableComplete {
                control_url,
                variable,
                outcome,
            } => {
                let value = outcome?;
                let udn = self.registry.find_by_control_url(&control_url).unwrap_or_default();
                self.registry.notifier().notify(Notification::VariableQueried {
                    udn,
                    control_url,
                    variable,
                    value,
                });
                Ok(())
            }

            TransportEvent::EventReceived { sid, event_key, body } => {
                self.on_event(&sid, event_key, &body)
            }

            TransportEvent::SubscribeComplete(update) | TransportEvent::RenewalComplete(update) => {
                update.outcome?;
                // A duplicate released after losing an upsert race must not
                // displace the winner's SID
                if !self.registry.transport().holds_subscription(&update.sid) {
                    debug!(sid = %update.sid, "Ignoring completion for released subscription");
                    return Ok(());
                }
                self.registry.update_subscription(&update.publisher_url, &update.sid)?;
                Ok(())
            }

            TransportEvent::UnsubscribeComplete(update) => {
                if self.registry.clear_subscription(&update.publisher_url, &update.sid) {
                    debug!(sid = %update.sid, "Subscription cleared");
                }
                Ok(())
            }

            TransportEvent::AutoRenewalFailed(update) | TransportEvent::SubscriptionExpired(update) => {
                self.resubscribe(update)
            }

            TransportEvent::SubscriptionRequest { sid } => {
                trace!(sid = %sid, "Ignoring inbound subscription request");
                Ok(())
            }
        }
    }

    fn on_advertisement(&self, advertisement: Advertisement) -> Result<()> {
        let Advertisement {
            device_id,
            location,
            expires,
            ..
        } = advertisement;

        if !device_id.is_empty() && self.registry.refresh(&device_id, expires).is_some() {
            return Ok(());
        }

        let xml = self.registry.transport().download_description(&location)?;
        let description = DeviceDescription::parse(&xml)?;

        match self.registry.upsert(&description, &location, expires) {
            UpsertOutcome::Added(handle) => debug!(udn = %description.udn, %handle, "Advertisement registered"),
            UpsertOutcome::Closed => debug!(udn = %description.udn, "Advertisement arrived during shutdown"),
            UpsertOutcome::Refreshed(_) | UpsertOutcome::Ignored => {}
        }
        Ok(())
    }

    fn on_action_complete(
        &self,
        control_url: String,
        action: String,
        outcome: std::result::Result<String, crate::error::TransportError>,
    ) -> Result<()> {
        let body = match outcome {
            Ok(body) => body,
            Err(e) => {
                warn!(control_url = %control_url, action = %action, error = %e, "Action failed");
                self.registry.notifier().notify(Notification::ActionFailed {
                    control_url,
                    action,
                    error: e.to_string(),
                });
                return Ok(());
            }
        };

        let parameters = if body.trim().is_empty() {
            Vec::new()
        } else {
            let response = tree::parse_document(&body).map_err(|e| DecodeError::Xml(e.to_string()))?;
            match first_document_item(&response, "ParameterValueList") {
                // The XML parser already undid the argument-level escaping
                Some(document) => codec::decode_parameter_list(&document)?,
                None => Vec::new(),
            }
        };

        info!(control_url = %control_url, action = %action, count = parameters.len(), "Action completed");
        self.registry.notifier().notify(Notification::ActionCompleted {
            control_url,
            action,
            parameters,
        });
        Ok(())
    }

    fn on_event(&self, sid: &str, event_key: u32, body: &str) -> Result<()> {
        let propertyset = tree::parse_document(body).map_err(|e| DecodeError::Xml(e.to_string()))?;

        let (udn, service, changes) = self
            .registry
            .with_service_by_sid(sid, |udn, state| {
                (udn.to_string(), state.service, differencer::apply(state, &propertyset))
            })
            .ok_or_else(|| ControlPointError::UnknownSubscription(sid.to_string()))?;

        debug!(udn = %udn, sid, event_key, changes = changes.len(), "Event applied");
        for change in changes {
            self.registry.notifier().notify(Notification::StateUpdate {
                udn: udn.clone(),
                service,
                variable: change.variable.to_string(),
                value: change.value,
                parameters: change.parameters,
            });
        }
        Ok(())
    }

    fn resubscribe(&self, update: SubscriptionUpdate) -> Result<()> {
        if !self.registry.owns_event_url(&update.publisher_url) {
            return Err(ControlPointError::UnknownSubscription(update.sid));
        }

        warn!(sid = %update.sid, event_url = %update.publisher_url, "Subscription lapsed, resubscribing");
        let timeout = self.registry.config().subscription_timeout_secs();
        match self.registry.transport().subscribe(&update.publisher_url, timeout) {
            Ok(subscription) => {
                self.registry
                    .update_subscription(&update.publisher_url, &subscription.sid)?;
                info!(sid = %subscription.sid, "Resubscribed");
                Ok(())
            }
            Err(e) => {
                self.registry.clear_subscription(&update.publisher_url, &update.sid);
                Err(e.into())
            }
        }
    }

    /// Consume `events` on a background thread until stopped
    pub fn spawn(self, events: mpsc::Receiver<TransportEvent>) -> std::io::Result<DispatcherHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("cms-event-dispatcher".to_string())
            .spawn(move || self.run(events, &flag))?;

        Ok(DispatcherHandle {
            running,
            thread: Some(thread),
        })
    }

    fn run(&self, events: mpsc::Receiver<TransportEvent>, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    let kind = event.kind();
                    if let Err(e) = self.dispatch(event) {
                        if e.is_not_found() {
                            debug!(kind, error = %e, "Event dropped");
                        } else {
                            warn!(kind, error = %e, "Event handling failed");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Transport event channel closed");
                    break;
                }
            }
        }
    }
}

/// Handle to a running dispatcher thread
pub struct DispatcherHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop after the event in progress; queued events are dropped
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Event dispatcher thread panicked");
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
