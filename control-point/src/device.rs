//! Device and service state records held by the registry.

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::resolver::ResolvedService;
use crate::schema::Service;

/// Stable identifier of a registry entry.
///
/// Ordinals shift as devices come and go; handles do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

/// One service endpoint on a device and its last-known variable values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub service: Service,
    pub service_id: String,
    pub service_type: String,
    pub control_url: String,
    pub event_url: String,
    sid: Option<String>,
    variables: HashMap<&'static str, String>,
}

impl ServiceState {
    /// A service with every schema variable set to the empty string
    pub fn new(service: Service, resolved: ResolvedService) -> Self {
        let variables = service
            .schema()
            .variables
            .iter()
            .map(|name| (*name, String::new()))
            .collect();

        Self {
            service,
            service_id: resolved.service_id,
            service_type: service.service_type().to_string(),
            control_url: resolved.control_url,
            event_url: resolved.event_url,
            sid: None,
            variables,
        }
    }

    /// A service the description document did not list
    pub fn unresolved(service: Service) -> Self {
        Self::new(service, ResolvedService::default())
    }

    /// Current subscription ID, `None` while unsubscribed
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.sid.is_some()
    }

    /// Replace the subscription ID; an empty string unsubscribes
    pub fn set_sid(&mut self, sid: impl Into<String>) {
        let sid = sid.into();
        self.sid = if sid.is_empty() { None } else { Some(sid) };
    }

    /// Forget the subscription, returning the old ID
    pub fn take_sid(&mut self) -> Option<String> {
        self.sid.take()
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Store a value for a schema variable; unknown names are refused
    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.service.variable(name).and_then(|key| self.variables.get_mut(key)) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Variables in schema order
    pub fn variables(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.service.schema().variables.iter().map(move |name| {
            (
                *name,
                self.variables.get(name).map(String::as_str).unwrap_or_default(),
            )
        })
    }
}

/// One advertised device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub handle: DeviceHandle,
    pub udn: String,
    pub description_url: String,
    pub friendly_name: String,
    pub presentation_url: String,
    /// Remaining advertisement lifetime in seconds
    pub lifetime: i64,
    /// One entry per configured service, in configuration order
    pub services: Vec<ServiceState>,
}

impl Device {
    pub fn service(&self, service: Service) -> Option<&ServiceState> {
        self.services.iter().find(|state| state.service == service)
    }

    /// Subscribed services as `(event_url, sid)` pairs
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.services
            .iter()
            .filter_map(|state| state.sid().map(|sid| (state.event_url.clone(), sid.to_string())))
            .collect()
    }

    /// Multi-line report of the device at `ordinal`
    pub fn describe(&self, ordinal: usize) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_report(ordinal, &mut out);
        out
    }

    fn write_report(&self, ordinal: usize, out: &mut String) -> fmt::Result {
        writeln!(out, "CMS Device {ordinal}:")?;
        writeln!(out, "  UDN              = {}", self.udn)?;
        writeln!(out, "  DescDocURL       = {}", self.description_url)?;
        writeln!(out, "  FriendlyName     = {}", self.friendly_name)?;
        writeln!(out, "  PresURL          = {}", self.presentation_url)?;
        writeln!(out, "  Adver. TimeOut   = {}", self.lifetime)?;

        for state in &self.services {
            writeln!(out, "  {}:", state.service)?;
            writeln!(out, "    ServiceId      = {}", state.service_id)?;
            writeln!(out, "    ServiceType    = {}", state.service_type)?;
            writeln!(out, "    EventURL       = {}", state.event_url)?;
            writeln!(out, "    ControlURL     = {}", state.control_url)?;
            writeln!(out, "    SID            = {}", state.sid().unwrap_or_default())?;
            writeln!(out, "    ServiceStateTable")?;
            for (name, value) in state.variables() {
                writeln!(out, "      {name} = {value}")?;
            }
        }
        Ok(())
    }
}

/// Ordinal, UDN and name of one listed device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub ordinal: usize,
    pub udn: String,
    pub friendly_name: String,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3} -- {} ({})", self.ordinal, self.friendly_name, self.udn)
    }
}
