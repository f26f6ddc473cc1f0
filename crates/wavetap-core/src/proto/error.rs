use thiserror::Error;

use crate::framing::FrameError;

/// Errors raised while running the external-tool protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame stream itself was violated; the transport must close.
    #[error("framing violation: {0}")]
    Framing(#[from] FrameError),
    #[error("failed to encode payload: {0}")]
    PayloadEncode(String),
    #[error("failed to decode payload: {0}")]
    PayloadDecode(String),
    #[error("peer timed out: no ping or pong within {0:.1}s")]
    PingTimeout(f64),
    #[error("session is closed")]
    Closed,
}

impl ProtocolError {
    /// True when the error requires the transport to be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Framing(_) | ProtocolError::PingTimeout(_) | ProtocolError::Closed
        )
    }
}
