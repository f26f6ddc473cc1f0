//! Wire layout constants for the external-tool frame header.
//!
//! Both header variants open with the same 32-bit signature; the variant is
//! decided by the 16-bit sentinel that follows (V3) or that sits after the
//! payload length (V2).  All header integers are network byte order.

/// Start-of-frame signature shared by both header variants.
pub const PROTO_SIG: u32 = 0xDECA_FBAD;

/// Sentinel marking a V2 header, stored at byte offset 8.
pub const V2_SIG: u16 = 0xABCD;
/// Sentinel marking a V3 header, stored at byte offset 4.
pub const V3_SIG: u16 = 0xA9A9;

pub const V2_VERSION: u16 = 2;
pub const V3_VERSION: u16 = 3;

/// V2: signature(4) data_sz(4) sentinel(2) version(2) command(32) seqno(4).
pub const V2_HEADER_LEN: usize = 48;
/// V3: signature(4) sentinel(2) version(2) length(4) type(2) code(2) seqno(4).
pub const V3_HEADER_LEN: usize = 20;

/// NUL-padded ASCII command field width in a V2 header.
pub const V2_COMMAND_LEN: usize = 32;

/// Largest accepted frame, header included.  Anything larger is a protocol
/// violation and the transport must be closed.
pub const MAX_FRAME_SZ: usize = 16384;

/// Bytes needed before the header variant can be decided.
pub const MIN_DETECT_LEN: usize = 12;

pub const V2_DATA_SZ_RANGE: std::ops::Range<usize> = 4..8;
pub const V2_SENTINEL_RANGE: std::ops::Range<usize> = 8..10;
pub const V2_VERSION_RANGE: std::ops::Range<usize> = 10..12;
pub const V2_COMMAND_RANGE: std::ops::Range<usize> = 12..44;
pub const V2_SEQNO_RANGE: std::ops::Range<usize> = 44..48;

pub const V3_SENTINEL_RANGE: std::ops::Range<usize> = 4..6;
pub const V3_VERSION_RANGE: std::ops::Range<usize> = 6..8;
pub const V3_LENGTH_RANGE: std::ops::Range<usize> = 8..12;
pub const V3_PKT_TYPE_RANGE: std::ops::Range<usize> = 12..14;
pub const V3_CODE_RANGE: std::ops::Range<usize> = 14..16;
pub const V3_SEQNO_RANGE: std::ops::Range<usize> = 16..20;
