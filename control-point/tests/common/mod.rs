//! Shared test support: a recording transport and description fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use cms_control_point::{
    ActionRequest, Advertisement, ControlPointConfig, DeviceRegistry, Notification, Notifier, Subscription,
    Transport, TransportError,
};

pub const CMS_DEVICE_XML: &str = include_str!("../fixtures/cms_device.xml");

/// Description document for a device with this UDN and friendly name
pub fn description_xml(udn: &str, friendly_name: &str) -> String {
    CMS_DEVICE_XML
        .replace("<UDN>uuid:1</UDN>", &format!("<UDN>{udn}</UDN>"))
        .replace("B2BUA Edge", friendly_name)
}

/// Host a fixture device answers on; each UDN gets its own
fn host(udn: &str) -> String {
    format!("{}.lan:49152", udn.trim_start_matches("uuid:"))
}

/// Description URL a fixture device is served from
pub fn location(udn: &str) -> String {
    format!("http://{}/desc.xml", host(udn))
}

/// Event URL the fixture resolves to for `udn`
pub fn event_url(udn: &str) -> String {
    format!("http://{}/upnp/event/cms", host(udn))
}

/// Control URL the fixture resolves to for `udn`
pub fn control_url(udn: &str) -> String {
    format!("http://{}/upnp/control/cms", host(udn))
}

pub fn advertisement(udn: &str, expires: i64) -> Advertisement {
    Advertisement {
        device_id: udn.to_string(),
        location: location(udn),
        expires,
        target: "urn:schemas-upnp-org:device:ManageableDevice:2".to_string(),
    }
}

/// Transport double that records every call and serves fixture descriptions.
///
/// Subscribe hands out `uuid:sub-N` with a process-unique counter.
#[derive(Default)]
pub struct RecordingTransport {
    descriptions: Mutex<HashMap<String, String>>,
    next_sid: AtomicU32,
    fail_subscribe: AtomicBool,
    download_delay: Mutex<Option<Duration>>,
    subscribe_gate: Mutex<Option<Arc<Barrier>>>,
    pub searches: Mutex<Vec<(String, u32)>>,
    pub downloads: Mutex<Vec<String>>,
    pub subscribes: Mutex<Vec<(String, u32)>>,
    pub unsubscribes: Mutex<Vec<(String, String)>>,
    pub actions: Mutex<Vec<ActionRequest>>,
    pub queries: Mutex<Vec<(String, String)>>,
    pub shutdowns: AtomicU32,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve the fixture for `udn` at its location
    pub fn serve(&self, udn: &str, friendly_name: &str) {
        self.descriptions
            .lock()
            .unwrap()
            .insert(location(udn), description_xml(udn, friendly_name));
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make every description download take `delay`
    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = Some(delay);
    }

    /// Hold every subscribe until `gate` is released
    pub fn set_subscribe_gate(&self, gate: Arc<Barrier>) {
        *self.subscribe_gate.lock().unwrap() = Some(gate);
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.lock().unwrap().len()
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.lock().unwrap().len()
    }
}

impl Transport for RecordingTransport {
    fn search(&self, target: &str, mx: u32) -> Result<(), TransportError> {
        self.searches.lock().unwrap().push((target.to_string(), mx));
        Ok(())
    }

    fn download_description(&self, location: &str) -> Result<String, TransportError> {
        self.downloads.lock().unwrap().push(location.to_string());
        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.descriptions
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or(TransportError::Http(404))
    }

    fn subscribe(&self, event_url: &str, timeout_secs: u32) -> Result<Subscription, TransportError> {
        self.subscribes
            .lock()
            .unwrap()
            .push((event_url.to_string(), timeout_secs));
        let gate = self.subscribe_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait();
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Http(503));
        }
        let n = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Subscription {
            sid: format!("uuid:sub-{n}"),
            timeout_secs,
        })
    }

    fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), TransportError> {
        self.unsubscribes
            .lock()
            .unwrap()
            .push((event_url.to_string(), sid.to_string()));
        Ok(())
    }

    fn holds_subscription(&self, sid: &str) -> bool {
        !self.unsubscribes.lock().unwrap().iter().any(|(_, released)| released == sid)
    }

    fn send_action(&self, request: ActionRequest) -> Result<(), TransportError> {
        self.actions.lock().unwrap().push(request);
        Ok(())
    }

    fn query_variable(&self, control_url: &str, variable: &str) -> Result<(), TransportError> {
        self.queries
            .lock()
            .unwrap()
            .push((control_url.to_string(), variable.to_string()));
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry over a recording transport, with its notification receiver
pub fn registry_with(
    config: ControlPointConfig,
    transport: Arc<RecordingTransport>,
) -> (Arc<DeviceRegistry>, std::sync::mpsc::Receiver<Notification>) {
    let (notifier, rx) = Notifier::channel();
    (Arc::new(DeviceRegistry::new(config, transport, notifier)), rx)
}
