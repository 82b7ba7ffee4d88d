//! Error types for the callback server

use thiserror::Error;

/// Errors raised while starting the callback server
#[derive(Debug, Error)]
pub enum CallbackServerError {
    /// Every port in the configured range is taken
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// The outbound interface address could not be determined
    #[error("Failed to detect local IP address")]
    LocalIpUnavailable,

    /// The HTTP server task exited before signalling readiness
    #[error("Server failed to start")]
    StartFailed,
}
