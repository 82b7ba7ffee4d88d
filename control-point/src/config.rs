//! Configuration for the control point.

use std::time::Duration;

use crate::error::ControlPointError;
use crate::schema::{Service, DEFAULT_DEVICE_TYPE, DEFAULT_FRIENDLY_NAME};

/// Configuration for a [`ControlPoint`](crate::ControlPoint)
#[derive(Debug, Clone)]
pub struct ControlPointConfig {
    /// Device type searched for and accepted, compared as a
    /// case-insensitive prefix.
    /// Default: `urn:schemas-upnp-org:device:ManageableDevice:2`
    pub device_type: String,

    /// Friendly-name prefix a device must carry (case-insensitive);
    /// `None` accepts any name.
    /// Default: `Some("B2BUA")`
    pub friendly_name: Option<String>,

    /// Services resolved and subscribed on every accepted device
    /// Default: ConfigurationManagement
    pub services: Vec<Service>,

    /// Requested GENA subscription timeout
    /// Default: 1801 seconds
    pub subscription_timeout: Duration,

    /// Interval between advertisement-lifetime sweeps
    /// Default: 30 seconds
    pub tick_interval: Duration,

    /// MX used by the search issued on start and refresh
    /// Default: 5 seconds
    pub search_mx: u32,

    /// Reject actions on services without an active subscription
    /// Default: false
    pub require_subscription: bool,

    /// Port range for the GENA callback server
    /// Default: (3400, 3500)
    pub callback_port_range: (u16, u16),

    /// Path appended to the callback server's base URL
    /// Default: `/notify`
    pub callback_path: String,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            friendly_name: Some(DEFAULT_FRIENDLY_NAME.to_string()),
            services: vec![Service::ConfigurationManagement],
            subscription_timeout: Duration::from_secs(1801),
            tick_interval: Duration::from_secs(30),
            search_mx: 5,
            require_subscription: false,
            callback_port_range: (3400, 3500),
            callback_path: "/notify".to_string(),
        }
    }
}

impl ControlPointConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept every device of the configured type, whatever its name
    pub fn any_device_name() -> Self {
        Self {
            friendly_name: None,
            ..Default::default()
        }
    }

    /// Only issue actions over live subscriptions
    pub fn strict() -> Self {
        Self {
            require_subscription: true,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ControlPointError> {
        if self.device_type.trim().is_empty() {
            return Err(ControlPointError::Configuration(
                "Device type must not be empty".to_string(),
            ));
        }

        if self.services.is_empty() {
            return Err(ControlPointError::Configuration(
                "At least one service must be configured".to_string(),
            ));
        }

        if self.tick_interval.as_secs() == 0 {
            return Err(ControlPointError::Configuration(
                "Tick interval must be at least one second".to_string(),
            ));
        }

        if self.subscription_timeout < self.tick_interval {
            return Err(ControlPointError::Configuration(
                "Subscription timeout must not be shorter than the tick interval".to_string(),
            ));
        }

        if self.search_mx == 0 {
            return Err(ControlPointError::Configuration(
                "Search MX must be greater than 0".to_string(),
            ));
        }

        if self.callback_port_range.0 > self.callback_port_range.1 {
            return Err(ControlPointError::Configuration(
                "Invalid callback port range: start must not exceed end".to_string(),
            ));
        }

        if !self.callback_path.starts_with('/') {
            return Err(ControlPointError::Configuration(
                "Callback path must start with '/'".to_string(),
            ));
        }

        Ok(())
    }

    /// Tick size in whole seconds, the unit advertisement lifetimes use
    pub fn tick_seconds(&self) -> i64 {
        self.tick_interval.as_secs() as i64
    }

    /// Subscription timeout in whole seconds, as sent in the GENA header
    pub fn subscription_timeout_secs(&self) -> u32 {
        u32::try_from(self.subscription_timeout.as_secs()).unwrap_or(u32::MAX)
    }

    /// Whether a device with this type and friendly name is one we manage
    pub fn accepts(&self, device_type: &str, friendly_name: &str) -> bool {
        starts_with_ignore_case(device_type, &self.device_type)
            && self
                .friendly_name
                .as_deref()
                .map_or(true, |prefix| starts_with_ignore_case(friendly_name, prefix))
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_friendly_name(mut self, friendly_name: Option<String>) -> Self {
        self.friendly_name = friendly_name;
        self
    }

    pub fn with_services(mut self, services: Vec<Service>) -> Self {
        self.services = services;
        self
    }

    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    pub fn with_search_mx(mut self, mx: u32) -> Self {
        self.search_mx = mx;
        self
    }

    pub fn with_require_subscription(mut self, required: bool) -> Self {
        self.require_subscription = required;
        self
    }

    pub fn with_callback_ports(mut self, start: u16, end: u16) -> Self {
        self.callback_port_range = (start, end);
        self
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}
