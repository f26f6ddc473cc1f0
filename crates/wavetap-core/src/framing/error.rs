use thiserror::Error;

/// Irrecoverable framing violations.  Any of these requires the transport to
/// be closed; there is no way to resynchronize a corrupt frame stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid signature on frame: 0x{found:08x}")]
    BadSignature { found: u32 },
    #[error("frame matched neither the v2 nor the v3 sentinel")]
    BadSentinel,
    #[error("frame of {frame_sz} bytes exceeds the {max} byte limit")]
    Oversized { frame_sz: usize, max: usize },
}
