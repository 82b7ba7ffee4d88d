//! The device registry.
//!
//! One mutex guards the device list. It is held for list traversal and
//! mutation only: description downloads, subscribes and unsubscribes all
//! happen with the lock released, and every insert re-checks the UDN and the
//! closed flag under the same acquisition that performs it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ControlPointConfig;
use crate::device::{Device, DeviceHandle, DeviceSummary, ServiceState};
use crate::error::{ControlPointError, Result};
use crate::event::{Notification, Notifier};
use crate::resolver::{self, DeviceDescription};
use crate::transport::Transport;

/// What [`DeviceRegistry::upsert`] did with a description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new device was registered
    Added(DeviceHandle),
    /// The UDN was already known; only its lifetime was reset
    Refreshed(DeviceHandle),
    /// The device does not pass the configured filters
    Ignored,
    /// The registry was closed while the device was being prepared; its
    /// subscriptions were released
    Closed,
}

/// Result of one lifetime sweep
#[derive(Debug, Default)]
pub struct AgeReport {
    /// Devices whose lifetime ran out, already detached from the list
    pub expired: Vec<Device>,
    /// UDNs of devices close enough to expiry to warrant a renewal search
    pub renewals: Vec<String>,
}

/// Shared record of known devices and their service subscriptions.
pub struct DeviceRegistry {
    devices: Mutex<Vec<Device>>,
    next_handle: AtomicU64,
    closed: AtomicBool,
    config: ControlPointConfig,
    transport: Arc<dyn Transport>,
    notifier: Notifier,
}

impl DeviceRegistry {
    pub fn new(config: ControlPointConfig, transport: Arc<dyn Transport>, notifier: Notifier) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
            transport,
            notifier,
        }
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Register the device described by `description`, or reset its lifetime
    /// if the UDN is already known.
    ///
    /// Service resolution and subscription failures are logged and leave the
    /// affected service unsubscribed; they never prevent the device from
    /// being added.
    pub fn upsert(&self, description: &DeviceDescription, location: &str, lifetime: i64) -> UpsertOutcome {
        let udn = description.udn.as_str();

        if !self.config.accepts(&description.device_type, &description.friendly_name) {
            let mismatch = ControlPointError::ConfigurationMismatch {
                udn: udn.to_string(),
                device_type: description.device_type.clone(),
                friendly_name: description.friendly_name.clone(),
            };
            debug!("{mismatch}");
            return UpsertOutcome::Ignored;
        }

        if let Some(handle) = self.refresh(udn, lifetime) {
            return UpsertOutcome::Refreshed(handle);
        }

        // Resolve and subscribe with the lock released
        let services: Vec<ServiceState> = self
            .config
            .services
            .iter()
            .map(|service| self.prepare_service(udn, *service, description, location))
            .collect();

        let device = Device {
            handle: DeviceHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed)),
            udn: udn.to_string(),
            description_url: location.to_string(),
            friendly_name: description.friendly_name.clone(),
            presentation_url: description.resolved_presentation_url(location),
            lifetime,
            services,
        };

        let mut devices = self.devices.lock();
        if self.closed.load(Ordering::SeqCst) {
            drop(devices);

            debug!(udn, "Registry closed, releasing subscriptions of late device");
            self.unsubscribe_all(&device);
            return UpsertOutcome::Closed;
        }

        let raced = devices.iter_mut().find(|d| d.udn == device.udn).map(|existing| {
            existing.lifetime = lifetime;
            existing.handle
        });
        if let Some(handle) = raced {
            // Another upsert for this UDN won the race
            drop(devices);

            debug!(udn, "Device registered concurrently, releasing duplicate subscriptions");
            self.unsubscribe_all(&device);
            return UpsertOutcome::Refreshed(handle);
        }

        for (event_url, sid) in device.subscriptions() {
            release_sid(&mut devices, &sid, &event_url);
        }
        let handle = device.handle;
        let friendly_name = device.friendly_name.clone();
        devices.push(device);
        drop(devices);

        info!(udn, friendly_name = %friendly_name, %handle, "Device added");
        self.notifier.notify(Notification::DeviceAdded {
            udn: udn.to_string(),
            friendly_name,
        });
        UpsertOutcome::Added(handle)
    }

    fn prepare_service(
        &self,
        udn: &str,
        service: crate::schema::Service,
        description: &DeviceDescription,
        location: &str,
    ) -> ServiceState {
        let resolved = match resolver::resolve(description, location, service.service_type()) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(udn, %service, error = %e, "Service not resolved");
                return ServiceState::unresolved(service);
            }
        };

        let mut state = ServiceState::new(service, resolved);
        if state.event_url.is_empty() {
            warn!(udn, %service, "Service has no event URL, not subscribing");
            return state;
        }

        debug!(udn, event_url = %state.event_url, "Subscribing");
        match self
            .transport
            .subscribe(&state.event_url, self.config.subscription_timeout_secs())
        {
            Ok(subscription) => {
                info!(udn, %service, sid = %subscription.sid, "Subscribed");
                state.set_sid(subscription.sid);
            }
            Err(e) => {
                warn!(udn, %service, event_url = %state.event_url, error = %e, "Subscribe failed");
            }
        }
        state
    }

    /// Reset the lifetime of a known device
    pub fn refresh(&self, udn: &str, lifetime: i64) -> Option<DeviceHandle> {
        let mut devices = self.devices.lock();
        let device = devices.iter_mut().find(|d| d.udn == udn)?;
        device.lifetime = lifetime;
        debug!(udn, lifetime, "Advertisement lifetime reset");
        Some(device.handle)
    }

    pub fn contains(&self, udn: &str) -> bool {
        self.devices.lock().iter().any(|d| d.udn == udn)
    }

    /// Remove the device with this UDN, unsubscribing its services.
    ///
    /// An unknown UDN leaves the registry untouched and is reported as
    /// [`ControlPointError::UnknownDevice`].
    pub fn remove(&self, udn: &str) -> Result<()> {
        let removed = {
            let mut devices = self.devices.lock();
            devices
                .iter()
                .position(|d| d.udn == udn)
                .map(|index| devices.remove(index))
        };

        let device = removed.ok_or_else(|| ControlPointError::UnknownDevice(udn.to_string()))?;
        self.teardown(device);
        Ok(())
    }

    /// Refuse further inserts and remove every device.
    ///
    /// An upsert still in flight when this runs releases its subscriptions
    /// instead of inserting.
    pub fn close(&self) -> usize {
        {
            let _devices = self.devices.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.remove_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Detach the whole list, then tear each device down with the lock released
    pub fn remove_all(&self) -> usize {
        let devices = std::mem::take(&mut *self.devices.lock());
        let count = devices.len();
        for device in devices {
            self.teardown(device);
        }
        count
    }

    /// Unsubscribe a detached device and report its removal
    pub fn teardown(&self, device: Device) {
        self.unsubscribe_all(&device);
        info!(udn = %device.udn, "Device removed");
        self.notifier.notify(Notification::DeviceRemoved { udn: device.udn });
    }

    fn unsubscribe_all(&self, device: &Device) {
        for (event_url, sid) in device.subscriptions() {
            if let Err(e) = self.transport.unsubscribe(&event_url, &sid) {
                warn!(udn = %device.udn, sid = %sid, error = %e, "Unsubscribe failed");
            }
        }
    }

    /// Copy of the device at a 1-based position
    pub fn get(&self, ordinal: usize) -> Result<Device> {
        let devices = self.devices.lock();
        ordinal
            .checked_sub(1)
            .and_then(|index| devices.get(index))
            .cloned()
            .ok_or(ControlPointError::DeviceNotFound {
                ordinal,
                count: devices.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Ordinal, UDN and name of every device in insertion order
    pub fn list(&self) -> Vec<DeviceSummary> {
        self.devices
            .lock()
            .iter()
            .enumerate()
            .map(|(index, device)| DeviceSummary {
                ordinal: index + 1,
                udn: device.udn.clone(),
                friendly_name: device.friendly_name.clone(),
            })
            .collect()
    }

    /// Multi-line report of the device at a 1-based position
    pub fn describe(&self, ordinal: usize) -> Result<String> {
        self.get(ordinal).map(|device| device.describe(ordinal))
    }

    /// Run `f` on the service holding `sid`, with the lock held.
    ///
    /// The closure receives the owning device's UDN.
    pub fn with_service_by_sid<R>(&self, sid: &str, f: impl FnOnce(&str, &mut ServiceState) -> R) -> Option<R> {
        let mut devices = self.devices.lock();
        devices.iter_mut().find_map(|device| {
            let udn = device.udn.as_str();
            device
                .services
                .iter_mut()
                .find(|state| state.sid() == Some(sid))
                .map(|state| (udn, state))
        })
        .map(|(udn, state)| f(udn, state))
    }

    /// Record `sid` on the service whose event URL is `event_url`.
    ///
    /// Any other service still holding `sid` is cleared first.
    pub fn update_subscription(&self, event_url: &str, sid: &str) -> Result<String> {
        let mut devices = self.devices.lock();
        release_sid(&mut devices, sid, event_url);

        let (udn, state) = find_by_event_url(&mut devices, event_url)
            .ok_or_else(|| ControlPointError::UnknownSubscription(event_url.to_string()))?;
        state.set_sid(sid);
        debug!(udn = %udn, sid, "Subscription ID updated");
        Ok(udn)
    }

    /// Clear the subscription ID of the service whose event URL is
    /// `event_url`, if it still holds `sid`
    pub fn clear_subscription(&self, event_url: &str, sid: &str) -> bool {
        let mut devices = self.devices.lock();
        match find_by_event_url(&mut devices, event_url) {
            Some((_, state)) if state.sid() == Some(sid) => {
                state.take_sid();
                true
            }
            _ => false,
        }
    }

    /// Whether any registered service publishes events at `event_url`
    pub fn owns_event_url(&self, event_url: &str) -> bool {
        find_by_event_url(&mut self.devices.lock(), event_url).is_some()
    }

    /// UDN of the device owning `control_url`
    pub fn find_by_control_url(&self, control_url: &str) -> Option<String> {
        self.devices
            .lock()
            .iter()
            .find(|device| device.services.iter().any(|state| state.control_url == control_url))
            .map(|device| device.udn.clone())
    }

    /// Age every device by `tick` seconds.
    ///
    /// Expired devices are detached and handed back for teardown; the caller
    /// unsubscribes them with the lock released.
    pub fn age(&self, tick: i64) -> AgeReport {
        let mut report = AgeReport::default();
        let mut devices = self.devices.lock();

        let mut index = 0;
        while index < devices.len() {
            let device = &mut devices[index];
            device.lifetime -= tick;

            if device.lifetime <= 0 {
                debug!(udn = %device.udn, "Advertisement expired");
                // The next device shifts into `index`
                report.expired.push(devices.remove(index));
                continue;
            }
            if device.lifetime < 2 * tick {
                report.renewals.push(device.udn.clone());
            }
            index += 1;
        }

        report
    }
}

fn find_by_event_url<'a>(devices: &'a mut [Device], event_url: &str) -> Option<(String, &'a mut ServiceState)> {
    devices.iter_mut().find_map(|device| {
        let udn = &device.udn;
        device
            .services
            .iter_mut()
            .find(|state| !state.event_url.is_empty() && state.event_url == event_url)
            .map(|state| (udn.clone(), state))
    })
}

/// Clear `sid` from every service other than the one at `keep_event_url`
fn release_sid(devices: &mut [Device], sid: &str, keep_event_url: &str) {
    for device in devices.iter_mut() {
        for state in device.services.iter_mut() {
            if state.sid() == Some(sid) && state.event_url != keep_event_url {
                warn!(udn = %device.udn, sid, "Subscription ID reassigned, clearing stale holder");
                state.take_sid();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, Subscription};
    use crate::error::TransportError;
    use mockall::predicate::eq;

    const DESCRIPTION: &str = r#"<root><device>
        <deviceType>urn:schemas-upnp-org:device:ManageableDevice:2</deviceType>
        <friendlyName>B2BUA One</friendlyName>
        <UDN>uuid:1</UDN>
        <serviceList><service>
            <serviceType>urn:schemas-upnp-org:service:ConfigurationManagement:2</serviceType>
            <serviceId>urn:upnp-org:serviceId:CMS</serviceId>
            <controlURL>/control</controlURL>
            <eventSubURL>/event</eventSubURL>
        </service></serviceList>
    </device></root>"#;

    const LOCATION: &str = "http://10.0.0.5:49152/desc.xml";
    const EVENT_URL: &str = "http://10.0.0.5:49152/event";

    fn registry(transport: MockTransport) -> (DeviceRegistry, std::sync::mpsc::Receiver<Notification>) {
        let (notifier, rx) = Notifier::channel();
        (
            DeviceRegistry::new(ControlPointConfig::default(), Arc::new(transport), notifier),
            rx,
        )
    }

    fn description() -> DeviceDescription {
        DeviceDescription::parse(DESCRIPTION).unwrap()
    }

    #[test]
    fn test_upsert_subscribes_once() {
        let mut transport = MockTransport::new();
        transport
            .expect_subscribe()
            .with(eq(EVENT_URL), eq(1801u32))
            .times(1)
            .returning(|_, _| {
                Ok(Subscription {
                    sid: "uuid:sub-1".into(),
                    timeout_secs: 1801,
                })
            });
        let (registry, rx) = registry(transport);

        let first = registry.upsert(&description(), LOCATION, 120);
        let second = registry.upsert(&description(), LOCATION, 300);

        let UpsertOutcome::Added(handle) = first else {
            panic!("expected Added, got {first:?}");
        };
        assert_eq!(second, UpsertOutcome::Refreshed(handle));
        assert_eq!(registry.len(), 1);

        let device = registry.get(1).unwrap();
        assert_eq!(device.lifetime, 300);
        assert_eq!(device.services[0].sid(), Some("uuid:sub-1"));
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![Notification::DeviceAdded {
                udn: "uuid:1".into(),
                friendly_name: "B2BUA One".into()
            }]
        );
    }

    #[test]
    fn test_upsert_keeps_device_when_subscribe_fails() {
        let mut transport = MockTransport::new();
        transport
            .expect_subscribe()
            .returning(|_, _| Err(TransportError::Http(503)));
        let (registry, _rx) = registry(transport);

        assert!(matches!(registry.upsert(&description(), LOCATION, 120), UpsertOutcome::Added(_)));
        assert!(!registry.get(1).unwrap().services[0].is_subscribed());
    }

    #[test]
    fn test_upsert_ignores_filtered_devices() {
        let transport = MockTransport::new();
        let (registry, rx) = registry(transport);
        let other = DeviceDescription::parse(&DESCRIPTION.replace("B2BUA One", "Media Server")).unwrap();

        assert_eq!(registry.upsert(&other, LOCATION, 120), UpsertOutcome::Ignored);
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_unsubscribes_and_notifies() {
        let mut transport = MockTransport::new();
        transport.expect_subscribe().returning(|_, _| {
            Ok(Subscription {
                sid: "uuid:sub-1".into(),
                timeout_secs: 1801,
            })
        });
        transport
            .expect_unsubscribe()
            .with(eq(EVENT_URL), eq("uuid:sub-1"))
            .times(1)
            .returning(|_, _| Err(TransportError::Http(412)));
        let (registry, rx) = registry(transport);

        registry.upsert(&description(), LOCATION, 120);
        registry.remove("uuid:1").unwrap();
        assert!(matches!(
            registry.remove("uuid:1"),
            Err(ControlPointError::UnknownDevice(udn)) if udn == "uuid:1"
        ));
        assert!(registry.is_empty());
        assert!(rx
            .try_iter()
            .any(|n| n == Notification::DeviceRemoved { udn: "uuid:1".into() }));
    }

    #[test]
    fn test_get_out_of_range() {
        let (registry, _rx) = registry(MockTransport::new());
        let error = registry.get(1).unwrap_err();
        assert!(matches!(error, ControlPointError::DeviceNotFound { ordinal: 1, count: 0 }));
        assert!(registry.get(0).is_err());
        assert!(registry.describe(3).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_subscription_by_event_url() {
        let mut transport = MockTransport::new();
        transport
            .expect_subscribe()
            .returning(|_, _| Err(TransportError::Network("down".into())));
        let (registry, _rx) = registry(transport);
        registry.upsert(&description(), LOCATION, 120);

        assert_eq!(registry.update_subscription(EVENT_URL, "uuid:sub-9").unwrap(), "uuid:1");
        assert_eq!(
            registry.with_service_by_sid("uuid:sub-9", |udn, state| (udn.to_string(), state.event_url.clone())),
            Some(("uuid:1".to_string(), EVENT_URL.to_string()))
        );
        assert!(registry.update_subscription("http://elsewhere/event", "uuid:x").is_err());

        assert!(!registry.clear_subscription(EVENT_URL, "uuid:other"));
        assert!(registry.clear_subscription(EVENT_URL, "uuid:sub-9"));
        assert!(registry.with_service_by_sid("uuid:sub-9", |_, _| ()).is_none());
    }
}
