use thiserror::Error;

/// Failure of an SSDP exchange or a description download
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket setup, multicast membership or send/receive failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Description request could not be completed
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Description server answered with a non-success status
    #[error("{location} returned HTTP {status}")]
    Status { location: String, status: u16 },

    /// SSDP message or header that could not be understood
    #[error("parse error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
