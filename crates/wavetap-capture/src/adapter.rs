//! The capability object a capture binary implements for its radio.
//!
//! The runtime owns the transport, ring buffers, and protocol; the adapter
//! owns the hardware handle.  `run_capture` executes on a dedicated capture
//! thread while the channel-control methods are invoked from the protocol
//! loop, so adapters use interior mutability for any state both sides
//! touch.

use crate::error::CaptureError;
use crate::sink::{CaptureControl, FrameSink};
use wavetap_core::sourcedef::SourceDefinition;

/// One interface reported by `list_interfaces`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceEntry {
    pub interface: String,
    pub flags: String,
    pub hardware: String,
}

/// Result of probing a definition this adapter might be able to serve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOutcome {
    pub channels: Vec<String>,
    pub channel: Option<String>,
    pub hardware: String,
    pub uuid: Option<String>,
}

/// Result of a successful open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOutcome {
    pub dlt: u32,
    pub uuid: String,
    pub channels: Vec<String>,
    pub channel: Option<String>,
    pub hardware: String,
    pub capture_interface: Option<String>,
}

/// Driver-opaque channel token produced by `translate_channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelToken(pub String);

/// A radio driver adapter.  Every method except `open` and `run_capture`
/// has a default "not supported" implementation, matching sources that
/// cannot enumerate or tune.
pub trait CaptureAdapter: Send + Sync {
    /// Human-readable source type, used in messages and reports.
    fn source_type(&self) -> &str;

    /// Enumerate local interfaces this adapter could open.
    fn list_interfaces(&self) -> Result<Vec<InterfaceEntry>, CaptureError> {
        Ok(Vec::new())
    }

    /// Decide whether `definition` is ours and report capabilities.
    /// `Ok(None)` means "not ours", which is not an error.
    fn probe(&self, definition: &SourceDefinition) -> Result<Option<ProbeOutcome>, CaptureError> {
        let _ = definition;
        Ok(None)
    }

    /// Open the source.  Called once before the capture thread spawns.
    fn open(&self, definition: &SourceDefinition) -> Result<OpenOutcome, CaptureError>;

    /// Translate a channel string into a driver token.
    fn translate_channel(&self, channel: &str) -> Result<ChannelToken, CaptureError> {
        Ok(ChannelToken(channel.to_string()))
    }

    /// Tune to a previously translated channel.
    fn set_channel(&self, token: &ChannelToken) -> Result<(), CaptureError> {
        let _ = token;
        Err(CaptureError::Unsupported)
    }

    /// Whether the runtime should confine the process once the device is
    /// open: chroot into a scratch directory and drop every capability
    /// except `NET_RAW`/`NET_ADMIN`.  Sources that keep reading from the
    /// filesystem (file replay) must leave this off.
    fn sandbox_after_open(&self) -> bool {
        false
    }

    /// Produce packets until `ctl` signals spindown.  Runs on the capture
    /// thread; only the documented thread-safe sink methods may be used.
    fn run_capture(&self, ctl: CaptureControl, sink: FrameSink) -> Result<(), CaptureError>;
}
