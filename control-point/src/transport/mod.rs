//! The transport seam.
//!
//! The core never touches sockets. Everything it needs from the network goes
//! through [`Transport`]; asynchronous outcomes come back as
//! [`TransportEvent`](crate::TransportEvent)s on the channel the dispatcher
//! consumes.

mod renewal;
mod upnp;

pub use upnp::{UpnpTransport, UpnpTransportConfig};

use crate::error::TransportError;

/// A granted GENA subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub sid: String,
    /// Timeout granted by the publisher, in seconds
    pub timeout_secs: u32,
}

/// One outbound SOAP action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub control_url: String,
    pub service_type: String,
    pub action: String,
    /// Argument name and raw (unescaped) value, in call order
    pub arguments: Vec<(String, String)>,
}

/// Network operations consumed by the control point.
///
/// `search`, `send_action` and `query_variable` return once the request is
/// accepted; their results arrive later as transport events. The other calls
/// are synchronous handshakes.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Multicast an M-SEARCH for `target`
    fn search(&self, target: &str, mx: u32) -> Result<(), TransportError>;

    /// Fetch a device description document
    fn download_description(&self, location: &str) -> Result<String, TransportError>;

    /// Subscribe to a service's event URL
    fn subscribe(&self, event_url: &str, timeout_secs: u32) -> Result<Subscription, TransportError>;

    fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), TransportError>;

    /// Whether `sid` is a subscription the transport still holds.
    ///
    /// Transports that do not track subscriptions report every SID as held.
    fn holds_subscription(&self, _sid: &str) -> bool {
        true
    }

    /// Invoke a SOAP action
    fn send_action(&self, request: ActionRequest) -> Result<(), TransportError>;

    /// Issue a `QueryStateVariable` against a control URL
    fn query_variable(&self, control_url: &str, variable: &str) -> Result<(), TransportError>;

    /// Release sockets and background workers
    fn shutdown(&self) {}
}
