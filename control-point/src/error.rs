//! Error types for the control point.

use crate::schema::Service;

/// Errors surfaced by registry, dispatcher and action operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlPointError {
    /// No device at this 1-based position
    #[error("Device {ordinal} not found ({count} known)")]
    DeviceNotFound {
        /// Requested ordinal
        ordinal: usize,
        /// Number of devices currently registered
        count: usize,
    },

    /// No device with this UDN
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// No service state holds this subscription ID
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// The description document has no block for this service, or the
    /// service has no usable control URL
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The device's type or friendly name does not pass the configured filters
    #[error("Device {udn} ignored: type {device_type:?}, name {friendly_name:?}")]
    ConfigurationMismatch {
        udn: String,
        device_type: String,
        friendly_name: String,
    },

    /// An action was addressed to a service without an active subscription
    #[error("{service} on device {ordinal} has no active subscription")]
    NotSubscribed { ordinal: usize, service: Service },

    /// A command argument is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A worker thread could not be started
    #[error("Failed to start worker thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl ControlPointError {
    /// Whether this is one of the "lookup came up empty" variants
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::UnknownDevice(_)
                | Self::UnknownSubscription(_)
                | Self::ServiceNotFound(_)
        )
    }
}

/// Failures reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Socket or HTTP failure
    #[error("Network error: {0}")]
    Network(String),

    /// The device answered with an error status
    #[error("HTTP status {0}")]
    Http(u16),

    /// The device answered with a SOAP fault
    #[error("UPnP error code {0}")]
    Fault(u16),

    /// The device's response could not be interpreted
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The transport has been shut down
    #[error("Transport is shut down")]
    Closed,
}

impl From<soap_client::SoapError> for TransportError {
    fn from(error: soap_client::SoapError) -> Self {
        match error {
            soap_client::SoapError::Network(msg) => Self::Network(msg),
            soap_client::SoapError::Status { status, .. } => Self::Http(status),
            soap_client::SoapError::Parse(msg) => Self::Malformed(msg),
            soap_client::SoapError::Fault(code) => Self::Fault(code),
        }
    }
}

impl From<upnp_discovery::DiscoveryError> for TransportError {
    fn from(error: upnp_discovery::DiscoveryError) -> Self {
        match error {
            upnp_discovery::DiscoveryError::Status { status, .. } => Self::Http(status),
            upnp_discovery::DiscoveryError::ParseError(msg) => Self::Malformed(msg),
            other => Self::Network(other.to_string()),
        }
    }
}

/// Failures decoding an aggregated value or an embedded parameter document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The value is not `version,timestamp,document`
    #[error("Not an aggregated value: {0}")]
    NotAggregated(String),

    /// The version field is not an unsigned integer
    #[error("Invalid version field: {0:?}")]
    InvalidVersion(String),

    /// The timestamp field is not ISO-8601
    #[error("Invalid timestamp field: {0:?}")]
    InvalidTimestamp(String),

    /// The XML could not be parsed
    #[error("Invalid XML: {0}")]
    Xml(String),

    /// A required element is absent
    #[error("Missing <{0}> element")]
    MissingField(&'static str),
}

/// Convenience type alias for Results using ControlPointError.
pub type Result<T> = std::result::Result<T, ControlPointError>;
