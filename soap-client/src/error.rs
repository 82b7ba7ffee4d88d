use thiserror::Error;

/// Failure of a SOAP action or GENA subscription request
#[derive(Debug, Error)]
pub enum SoapError {
    /// Connection, timeout or body read failure
    #[error("request failed: {0}")]
    Network(String),

    /// GENA request rejected with an HTTP status
    #[error("{method} rejected with HTTP {status}")]
    Status { method: &'static str, status: u16 },

    /// Reply was not the XML we expected
    #[error("malformed reply: {0}")]
    Parse(String),

    /// SOAP fault with its UPnP error code
    #[error("UPnP error code {0}")]
    Fault(u16),
}
