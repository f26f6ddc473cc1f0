//! Length-delimited frame codec for the external-tool protocol.
//!
//! Two header variants coexist on the same stream: the legacy V2 header
//! carries a 32-byte string command, the V3 header a numeric packet type and
//! a status code.  A receiver accepts either; new senders emit V3 only,
//! falling back to V2 when the peer has latched `protocol_version = 2`.
//!
//! [`parse_next`] is incremental: it returns `Ok(None)` while the buffer
//! holds only a prefix of a frame, a decoded frame plus its consumed size
//! once one is complete, and an error on any protocol violation.

pub mod error;
pub mod layout;

pub use error::FrameError;

/// A decoded frame from either header variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    V2 {
        command: String,
        seqno: u32,
        payload: Vec<u8>,
    },
    V3 {
        pkt_type: u16,
        code: u16,
        seqno: u32,
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Sequence number carried by the frame, either variant.
    pub fn seqno(&self) -> u32 {
        match self {
            Frame::V2 { seqno, .. } => *seqno,
            Frame::V3 { seqno, .. } => *seqno,
        }
    }

    /// Payload bytes, either variant.
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::V2 { payload, .. } => payload,
            Frame::V3 { payload, .. } => payload,
        }
    }
}

/// Try to decode one frame from the head of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a complete frame is present,
/// `Ok(None)` when more bytes are needed, and an error on a protocol
/// violation (bad signature, unknown sentinel, oversized length).
pub fn parse_next(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < layout::MIN_DETECT_LEN {
        return Ok(None);
    }

    let signature = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    if signature != layout::PROTO_SIG {
        return Err(FrameError::BadSignature { found: signature });
    }

    let v3_sentinel = read_u16(buf, layout::V3_SENTINEL_RANGE);
    let v3_version = read_u16(buf, layout::V3_VERSION_RANGE);
    if v3_sentinel == layout::V3_SIG && v3_version == layout::V3_VERSION {
        return parse_v3(buf);
    }

    let v2_sentinel = read_u16(buf, layout::V2_SENTINEL_RANGE);
    let v2_version = read_u16(buf, layout::V2_VERSION_RANGE);
    if v2_sentinel == layout::V2_SIG && v2_version == layout::V2_VERSION {
        return parse_v2(buf);
    }

    Err(FrameError::BadSentinel)
}

fn parse_v3(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let data_sz = read_u32(buf, layout::V3_LENGTH_RANGE) as usize;
    let frame_sz = layout::V3_HEADER_LEN + data_sz;

    if frame_sz > layout::MAX_FRAME_SZ {
        return Err(FrameError::Oversized {
            frame_sz,
            max: layout::MAX_FRAME_SZ,
        });
    }

    if buf.len() < frame_sz {
        return Ok(None);
    }

    let frame = Frame::V3 {
        pkt_type: read_u16(buf, layout::V3_PKT_TYPE_RANGE),
        code: read_u16(buf, layout::V3_CODE_RANGE),
        seqno: read_u32(buf, layout::V3_SEQNO_RANGE),
        payload: buf[layout::V3_HEADER_LEN..frame_sz].to_vec(),
    };

    Ok(Some((frame, frame_sz)))
}

fn parse_v2(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let data_sz = read_u32(buf, layout::V2_DATA_SZ_RANGE) as usize;
    let frame_sz = layout::V2_HEADER_LEN + data_sz;

    if frame_sz > layout::MAX_FRAME_SZ {
        return Err(FrameError::Oversized {
            frame_sz,
            max: layout::MAX_FRAME_SZ,
        });
    }

    if buf.len() < frame_sz {
        return Ok(None);
    }

    let raw_command = &buf[layout::V2_COMMAND_RANGE];
    let command_len = raw_command
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(raw_command.len());
    let command = String::from_utf8_lossy(&raw_command[..command_len]).into_owned();

    let frame = Frame::V2 {
        command,
        seqno: read_u32(buf, layout::V2_SEQNO_RANGE),
        payload: buf[layout::V2_HEADER_LEN..frame_sz].to_vec(),
    };

    Ok(Some((frame, frame_sz)))
}

/// Encode a V3 frame.
pub fn encode_v3(pkt_type: u16, code: u16, seqno: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(layout::V3_HEADER_LEN + payload.len());
    out.extend_from_slice(&layout::PROTO_SIG.to_be_bytes());
    out.extend_from_slice(&layout::V3_SIG.to_be_bytes());
    out.extend_from_slice(&layout::V3_VERSION.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&pkt_type.to_be_bytes());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(&seqno.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encode a V2 frame with the legacy NUL-padded string command.  Only used
/// toward peers that announced `protocol_version = 2`.
pub fn encode_v2(command: &str, seqno: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(layout::V2_HEADER_LEN + payload.len());
    out.extend_from_slice(&layout::PROTO_SIG.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&layout::V2_SIG.to_be_bytes());
    out.extend_from_slice(&layout::V2_VERSION.to_be_bytes());

    let mut cmd = [0u8; layout::V2_COMMAND_LEN];
    let cmd_len = command.len().min(layout::V2_COMMAND_LEN - 1);
    cmd[..cmd_len].copy_from_slice(&command.as_bytes()[..cmd_len]);
    out.extend_from_slice(&cmd);

    out.extend_from_slice(&seqno.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encode a frame in its own variant.
pub fn encode(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::V2 {
            command,
            seqno,
            payload,
        } => encode_v2(command, *seqno, payload),
        Frame::V3 {
            pkt_type,
            code,
            seqno,
            payload,
        } => encode_v3(*pkt_type, *code, *seqno, payload),
    }
}

fn read_u16(buf: &[u8], range: std::ops::Range<usize>) -> u16 {
    u16::from_be_bytes(buf[range].try_into().unwrap())
}

fn read_u32(buf: &[u8], range: std::ops::Range<usize>) -> u32 {
    u32::from_be_bytes(buf[range].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_round_trip() {
        let frame = Frame::V3 {
            pkt_type: 3,
            code: 17,
            seqno: 42,
            payload: b"ping".to_vec(),
        };

        let bytes = encode(&frame);
        let (decoded, consumed) = parse_next(&bytes).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn v2_round_trip() {
        let frame = Frame::V2 {
            command: "PROBEDEVICE".to_string(),
            seqno: 9,
            payload: vec![1, 2, 3],
        };

        let bytes = encode(&frame);
        assert_eq!(bytes.len(), layout::V2_HEADER_LEN + 3);
        let (decoded, consumed) = parse_next(&bytes).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn partial_frames_need_more_bytes() {
        let bytes = encode_v3(1, 0, 1, &[0u8; 64]);

        for cut in 0..bytes.len() {
            assert!(
                parse_next(&bytes[..cut]).unwrap().is_none(),
                "prefix of {cut} bytes must not decode"
            );
        }
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut stream = encode_v3(3, 0, 1, b"a");
        stream.extend_from_slice(&encode_v3(4, 0, 2, b"b"));

        let (first, used) = parse_next(&stream).unwrap().expect("first frame");
        assert_eq!(first.seqno(), 1);
        let (second, used2) = parse_next(&stream[used..]).unwrap().expect("second frame");
        assert_eq!(second.seqno(), 2);
        assert_eq!(used + used2, stream.len());
    }

    #[test]
    fn bad_signature_is_fatal() {
        let mut bytes = encode_v3(1, 0, 1, b"");
        bytes[0] = 0xFF;
        assert!(matches!(
            parse_next(&bytes),
            Err(FrameError::BadSignature { .. })
        ));
    }

    #[test]
    fn unknown_sentinel_is_fatal() {
        let mut bytes = encode_v3(1, 0, 1, b"");
        // Break both sentinel positions.
        bytes[4] = 0;
        bytes[5] = 0;
        assert!(matches!(parse_next(&bytes), Err(FrameError::BadSentinel)));
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut bytes = encode_v3(1, 0, 1, b"");
        bytes[layout::V3_LENGTH_RANGE].copy_from_slice(&(1u32 << 20).to_be_bytes());
        assert!(matches!(
            parse_next(&bytes),
            Err(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn v2_command_is_nul_trimmed() {
        let bytes = encode_v2("OPENDEVICE", 5, b"");
        let (frame, _) = parse_next(&bytes).unwrap().expect("complete frame");
        match frame {
            Frame::V2 { command, .. } => assert_eq!(command, "OPENDEVICE"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
