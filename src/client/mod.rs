use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod coap;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open socket: {0}")]
    Open(#[source] std::io::Error),

    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CoAP encoding error: {0}")]
    Codec(String),

    #[error("No response from {target} after {attempts} transmissions")]
    Timeout { target: String, attempts: u32 },

    #[error("Message rejected with reset by {0}")]
    Reset(String),

    #[error("Transport already closed")]
    Closed,
}

/// Reply from the telemetry platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: String,
    pub payload: Vec<u8>,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, String::from_utf8_lossy(&self.payload))
        }
    }
}

/// Connection to the telemetry platform
#[async_trait]
pub trait Transport: Send {
    /// Send `payload` to `path` and wait for the reply
    async fn publish(&mut self, path: &str, payload: &[u8]) -> Result<Response, TransportError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self);
}
