//! Static schema of the services a control point tracks.

use std::fmt;

/// Device type the control point searches for by default
pub const DEFAULT_DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:ManageableDevice:2";

/// Friendly-name prefix the control point accepts by default
pub const DEFAULT_FRIENDLY_NAME: &str = "B2BUA";

/// UPnP services a control point can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// ConfigurationManagement:2 - parameter tree reads, writes and change events
    ConfigurationManagement,
}

/// Static description of one service type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSchema {
    /// Service type URI, matched exactly against the description document
    pub service_type: &'static str,

    /// Evented state variables, in display order
    pub variables: &'static [&'static str],
}

const CMS_SCHEMA: ServiceSchema = ServiceSchema {
    service_type: "urn:schemas-upnp-org:service:ConfigurationManagement:2",
    variables: &[
        "ConfigurationUpdate",
        "SupportedDataModelsUpdate",
        "SupportedParametersUpdate",
        "AttributeValuesUpdate",
        "InconsistentStatus",
        "AlarmsEnabled",
    ],
};

impl Service {
    /// All known services
    pub const ALL: [Service; 1] = [Service::ConfigurationManagement];

    /// Get the name of this service as a string
    pub fn name(&self) -> &'static str {
        match self {
            Service::ConfigurationManagement => "ConfigurationManagement",
        }
    }

    pub fn schema(&self) -> &'static ServiceSchema {
        match self {
            Service::ConfigurationManagement => &CMS_SCHEMA,
        }
    }

    /// Service type URI
    pub fn service_type(&self) -> &'static str {
        self.schema().service_type
    }

    /// Resolve a variable name to its static spelling, if the service has it
    pub fn variable(&self, name: &str) -> Option<&'static str> {
        self.schema().variables.iter().copied().find(|v| *v == name)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
