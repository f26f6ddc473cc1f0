//! Protocol-loop integration: a fake server drives a real handler over a
//! socketpair, walking the probe/open/data/shutdown lifecycle.

use std::io::{Read, Write};
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use wavetap_capture::pcapfile::PcapReplayAdapter;
use wavetap_capture::{CaptureHandler, TransportConfig};
use wavetap_core::framing::{self, Frame};
use wavetap_core::proto::payloads::{self, DataReport, OpenReport, OpenRequest, ShutdownRequest};
use wavetap_core::proto::PacketType;

/// The server side of the conversation.
struct TestServer {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl TestServer {
    fn new(stream: UnixStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    fn send(&mut self, frame: &[u8]) {
        self.stream.write_all(frame).unwrap();
    }

    /// Next decoded frame, waiting up to `deadline`.
    fn next_frame(&mut self, deadline: Duration) -> Option<Frame> {
        let start = Instant::now();
        loop {
            if let Some((frame, consumed)) = framing::parse_next(&self.buf).unwrap() {
                self.buf.drain(..consumed);
                return Some(frame);
            }

            if start.elapsed() > deadline {
                return None;
            }

            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => panic!("server read failed: {err}"),
            }
        }
    }

    /// Wait for a frame of one packet type, skipping the others.
    fn wait_for(&mut self, pkt_type: PacketType, deadline: Duration) -> Option<Frame> {
        let start = Instant::now();
        while start.elapsed() < deadline {
            let remaining = deadline.saturating_sub(start.elapsed());
            match self.next_frame(remaining) {
                Some(frame @ Frame::V3 { pkt_type: ty, .. }) if ty == pkt_type as u16 => {
                    return Some(frame);
                }
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }
}

fn spawn_handler(source: Option<String>) -> (TestServer, std::thread::JoinHandle<bool>) {
    let (server_side, client_side) = UnixStream::pair().unwrap();
    let fd = client_side.into_raw_fd();

    let handle = std::thread::spawn(move || {
        let handler = CaptureHandler::new(
            TransportConfig::Ipc { in_fd: fd, out_fd: fd },
            PcapReplayAdapter::new(),
            source,
        )
        .expect("handler setup");
        handler.run().is_ok()
    });

    (TestServer::new(server_side), handle)
}

fn write_test_pcap(path: &Path, count: u32) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xA1B2_C3D4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&105u32.to_le_bytes());
    for i in 0..count {
        out.extend_from_slice(&(1_600_000_000u32 + i).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&[i as u8; 8]);
    }
    std::fs::write(path, out).unwrap();
}

#[test]
fn ping_yields_a_prompt_pong() {
    let (mut server, handle) = spawn_handler(None);

    server.send(&framing::encode_v3(PacketType::Ping as u16, 0, 17, &[]));

    let pong = server
        .wait_for(PacketType::Pong, Duration::from_millis(100))
        .expect("pong within 100ms");

    match pong {
        Frame::V3 { code, .. } => assert_eq!(code, 17),
        other => panic!("unexpected frame {other:?}"),
    }

    // Clean shutdown.
    let body = payloads::encode(&ShutdownRequest {
        reason: "test complete".to_string(),
    })
    .unwrap();
    server.send(&framing::encode_v3(PacketType::Shutdown as u16, 0, 2, &body));
    assert!(handle.join().unwrap());
}

#[test]
fn open_replays_the_file_and_spins_down() {
    let dir = tempfile::TempDir::new().unwrap();
    let pcap = dir.path().join("replay.pcap");
    write_test_pcap(&pcap, 3);

    let (mut server, handle) = spawn_handler(None);

    let body = payloads::encode(&OpenRequest {
        definition: pcap.to_str().unwrap().to_string(),
    })
    .unwrap();
    server.send(&framing::encode_v3(PacketType::OpenRequest as u16, 0, 5, &body));

    let report_frame = server
        .wait_for(PacketType::OpenReport, Duration::from_secs(2))
        .expect("open report");
    let report: OpenReport = match &report_frame {
        Frame::V3 { payload, code, .. } => {
            assert_eq!(*code, 0);
            payloads::decode(payload).unwrap()
        }
        other => panic!("unexpected frame {other:?}"),
    };
    assert!(report.success);
    assert_eq!(report.seqno, 5);
    assert_eq!(report.dlt, 105);
    assert_eq!(report.hardware, "pcapfile");

    // All three packets arrive in order with monotonic sequence numbers.
    let mut last_seqno = 0u32;
    for i in 0..3u8 {
        let frame = server
            .wait_for(PacketType::Data, Duration::from_secs(2))
            .expect("data frame");
        match frame {
            Frame::V3 { seqno, payload, .. } => {
                assert!(seqno > last_seqno);
                last_seqno = seqno;
                let report: DataReport = payloads::decode(&payload).unwrap();
                assert_eq!(report.packet, vec![i; 8]);
                assert_eq!(report.ts_sec, 1_600_000_000 + u64::from(i));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    // Replay exhausted: the helper spins down and the stream ends cleanly.
    assert!(handle.join().unwrap());
}

#[test]
fn failed_open_reports_and_spins_down() {
    let (mut server, handle) = spawn_handler(None);

    let body = payloads::encode(&OpenRequest {
        definition: "/nonexistent/file.pcap".to_string(),
    })
    .unwrap();
    server.send(&framing::encode_v3(PacketType::OpenRequest as u16, 0, 9, &body));

    let report_frame = server
        .wait_for(PacketType::OpenReport, Duration::from_secs(2))
        .expect("open report");
    match report_frame {
        Frame::V3 { code, payload, .. } => {
            assert_eq!(code, 1);
            let report: OpenReport = payloads::decode(&payload).unwrap();
            assert!(!report.success);
            assert!(report.msg.contains("unable to find"));
        }
        other => panic!("unexpected frame {other:?}"),
    }

    assert!(handle.join().unwrap());
}

#[test]
fn source_override_takes_precedence() {
    let dir = tempfile::TempDir::new().unwrap();
    let pcap = dir.path().join("override.pcap");
    write_test_pcap(&pcap, 1);

    let (mut server, handle) =
        spawn_handler(Some(pcap.to_str().unwrap().to_string()));

    // The server asks for a different file; the helper's --source wins.
    let body = payloads::encode(&OpenRequest {
        definition: "/ignored/by/override.pcap".to_string(),
    })
    .unwrap();
    server.send(&framing::encode_v3(PacketType::OpenRequest as u16, 0, 2, &body));

    let report_frame = server
        .wait_for(PacketType::OpenReport, Duration::from_secs(2))
        .expect("open report");
    match report_frame {
        Frame::V3 { code, .. } => assert_eq!(code, 0),
        other => panic!("unexpected frame {other:?}"),
    }

    assert!(handle.join().unwrap());
}

#[test]
fn garbage_on_the_stream_is_a_protocol_violation() {
    let (mut server, handle) = spawn_handler(None);

    server.send(&[0xFF; 32]);

    // The handler closes the transport and reports a protocol error.
    assert!(!handle.join().unwrap());
    // Our side of the stream sees EOF.
    let frame = server.next_frame(Duration::from_millis(500));
    let _ = frame; // A fatal MESSAGE may or may not arrive before the close.
}
