use thiserror::Error;

use wavetap_core::ProtocolError;
use wavetap_core::sourcedef::SourceDefError;

/// Errors surfaced by capture adapters and the runtime.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("bad source definition: {0}")]
    SourceDef(#[from] SourceDefError),
    /// Opening the device failed; the message goes back to the server in
    /// the failed response.
    #[error("{0}")]
    OpenFailed(String),
    #[error("channel control failed: {0}")]
    ChannelFailed(String),
    #[error("operation not supported by this capture source")]
    Unsupported,
    #[error("capture source terminated: {0}")]
    Terminated(String),
}

/// Why the runtime exited; mapped to the process exit codes.
#[derive(Debug, Error)]
pub enum RunError {
    /// Exit code 1: the runtime never got going.
    #[error("startup failed: {0}")]
    Startup(String),
    /// Exit code 2: the peer violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
