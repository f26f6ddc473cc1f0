//! The write side shared between the protocol loop and the capture thread.
//!
//! The output ring buffer is the single contended resource: the capture
//! thread frames `DATA` reports into it and the protocol loop drains it to
//! the descriptor.  A mutex guards the ring; a condition variable wakes
//! writers blocked on a full ring once the loop has flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use wavetap_core::proto::payloads::{self, DataReport, MessageReport};
use wavetap_core::proto::{MessageSeverity, PacketType, SeqCounter};
use wavetap_core::{RingBuf, framing};

use crate::error::CaptureError;

/// Default output ring: large enough for a burst of full-size frames.
pub const OUT_RINGBUF_SZ: usize = 1 << 18;

/// Two-phase cancellation state shared with the capture thread.
#[derive(Clone, Default)]
pub struct CaptureControl {
    spindown: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl CaptureControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Polite cancel: pending writes drain, then the loop exits.  The
    /// capture thread checks this at the top of every read loop.
    pub fn spindown(&self) {
        self.spindown.store(true, Ordering::SeqCst);
    }

    pub fn spindown_requested(&self) -> bool {
        self.spindown.load(Ordering::SeqCst)
    }

    /// Immediate cancel: the loop exits at its next pass, dropping pending
    /// writes.
    pub fn shutdown(&self) {
        self.spindown.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

struct OutputState {
    ring: RingBuf,
}

/// The guarded output ring plus its space condvar.
pub struct OutputRing {
    state: Mutex<OutputState>,
    space_cv: Condvar,
    ctl: CaptureControl,
}

impl OutputRing {
    pub fn new(size: usize, ctl: CaptureControl) -> Self {
        Self {
            state: Mutex::new(OutputState {
                ring: RingBuf::new(size),
            }),
            space_cv: Condvar::new(),
            ctl,
        }
    }

    /// Queue a frame.  With `block` set, waits on the ring-space condvar
    /// until the loop has flushed enough; otherwise fails fast when full.
    pub fn send(&self, frame: &[u8], block: bool) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap();

        loop {
            if self.ctl.shutdown_requested() {
                return Err(CaptureError::Terminated("output closed".to_string()));
            }

            if state.ring.available() >= frame.len() {
                state.ring.write(frame);
                return Ok(());
            }

            if !block {
                return Err(CaptureError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "insufficient room in write buffer",
                )));
            }

            let (next, _timeout) = self
                .space_cv
                .wait_timeout(state, Duration::from_millis(500))
                .unwrap();
            state = next;
        }
    }

    /// Copy up to `max` pending bytes out for the IO loop to write.
    pub fn pending(&self, max: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let take = state.ring.used().min(max);
        let mut out = vec![0u8; take];
        state.ring.peek(&mut out);
        out
    }

    /// Discard `n` flushed bytes and wake blocked writers.
    pub fn consume(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.ring.read(None, n);
        drop(state);
        self.space_cv.notify_all();
    }

    pub fn used(&self) -> usize {
        self.state.lock().unwrap().ring.used()
    }

    /// Wake all blocked writers, for cancellation paths.
    pub fn wake(&self) {
        self.space_cv.notify_all();
    }
}

/// The thread-safe send surface handed to the capture thread.
///
/// `send_data`, `send_message`, `send_error`, `send_warning`, `send_json`,
/// and `spindown` (via [`CaptureControl`]) are the documented thread-safe
/// set; everything else on the handler belongs to the protocol loop.
#[derive(Clone)]
pub struct FrameSink {
    out: Arc<OutputRing>,
    seq: Arc<SeqCounter>,
}

impl FrameSink {
    pub fn new(out: Arc<OutputRing>, seq: Arc<SeqCounter>) -> Self {
        Self { out, seq }
    }

    fn send_payload(
        &self,
        pkt_type: PacketType,
        code: u16,
        payload: &[u8],
        block: bool,
    ) -> Result<u32, CaptureError> {
        let seqno = self.seq.next();
        let frame = framing::encode_v3(pkt_type as u16, code, seqno, payload);
        self.out.send(&frame, block)?;
        Ok(seqno)
    }

    /// Publish a captured frame.  Blocks while the output ring is full.
    pub fn send_data(&self, report: &DataReport) -> Result<u32, CaptureError> {
        let payload = payloads::encode(report)?;
        self.send_payload(PacketType::Data, 0, &payload, true)
    }

    /// Publish out-of-band JSON telemetry (sensor readings and the like).
    pub fn send_json(&self, ts_sec: u64, ts_usec: u32, json: &str) -> Result<u32, CaptureError> {
        let report = DataReport {
            ts_sec,
            ts_usec,
            dlt: 0,
            packet: Vec::new(),
            json: Some(json.to_string()),
            ..DataReport::default()
        };
        self.send_data(&report)
    }

    pub fn send_message(
        &self,
        severity: MessageSeverity,
        text: &str,
    ) -> Result<u32, CaptureError> {
        let payload = payloads::encode(&MessageReport {
            msg: text.to_string(),
        })?;
        self.send_payload(PacketType::Message, severity as u16, &payload, true)
    }

    pub fn send_warning(&self, text: &str) -> Result<u32, CaptureError> {
        self.send_message(MessageSeverity::Alert, text)
    }

    pub fn send_error(&self, text: &str) -> Result<u32, CaptureError> {
        self.send_message(MessageSeverity::Error, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use wavetap_core::framing::parse_next;

    #[test]
    fn send_data_frames_a_v3_data_packet() {
        let ctl = CaptureControl::new();
        let out = Arc::new(OutputRing::new(OUT_RINGBUF_SZ, ctl));
        let sink = FrameSink::new(Arc::clone(&out), Arc::new(SeqCounter::new()));

        let report = DataReport {
            ts_sec: 9,
            ts_usec: 100,
            dlt: 127,
            packet: vec![0xAB; 32],
            ..DataReport::default()
        };
        let seqno = sink.send_data(&report).unwrap();
        assert_eq!(seqno, 1);

        let bytes = out.pending(usize::MAX);
        let (frame, consumed) = parse_next(&bytes).unwrap().expect("complete frame");
        assert_eq!(consumed, bytes.len());

        match frame {
            wavetap_core::Frame::V3 {
                pkt_type,
                seqno,
                payload,
                ..
            } => {
                assert_eq!(pkt_type, PacketType::Data as u16);
                assert_eq!(seqno, 1);
                let decoded: DataReport = payloads::decode(&payload).unwrap();
                assert_eq!(decoded, report);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn full_ring_blocks_until_the_loop_flushes() {
        let report = DataReport {
            ts_sec: 1,
            ts_usec: 0,
            dlt: 105,
            packet: vec![0u8; 48],
            ..DataReport::default()
        };

        // Size the ring so exactly one encoded frame fits.
        let frame_len = wavetap_core::framing::encode_v3(
            PacketType::Data as u16,
            0,
            1,
            &payloads::encode(&report).unwrap(),
        )
        .len();

        let ctl = CaptureControl::new();
        let out = Arc::new(OutputRing::new(frame_len + frame_len / 2, ctl));
        let sink = FrameSink::new(Arc::clone(&out), Arc::new(SeqCounter::new()));

        sink.send_data(&report).unwrap();

        let writer = {
            let sink = sink.clone();
            let report = report.clone();
            thread::spawn(move || sink.send_data(&report).is_ok())
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished(), "writer must block on a full ring");

        // The IO loop flushes, waking the writer.
        let flushed = out.pending(usize::MAX);
        out.consume(flushed.len());

        assert!(writer.join().unwrap());
    }

    #[test]
    fn shutdown_fails_blocked_writers() {
        let ctl = CaptureControl::new();
        let out = Arc::new(OutputRing::new(64, ctl.clone()));
        let sink = FrameSink::new(Arc::clone(&out), Arc::new(SeqCounter::new()));

        // Fill the ring directly.
        out.send(&vec![0u8; 64], false).unwrap();

        let writer = {
            let sink = sink.clone();
            thread::spawn(move || {
                sink.send_message(MessageSeverity::Info, "stuck message")
                    .is_err()
            })
        };

        thread::sleep(Duration::from_millis(20));
        ctl.shutdown();
        out.wake();

        assert!(writer.join().unwrap());
    }

    #[test]
    fn sequence_numbers_are_shared_across_sinks() {
        let ctl = CaptureControl::new();
        let out = Arc::new(OutputRing::new(OUT_RINGBUF_SZ, ctl));
        let seq = Arc::new(SeqCounter::new());
        let sink_a = FrameSink::new(Arc::clone(&out), Arc::clone(&seq));
        let sink_b = FrameSink::new(Arc::clone(&out), Arc::clone(&seq));

        let s1 = sink_a.send_message(MessageSeverity::Info, "one").unwrap();
        let s2 = sink_b.send_message(MessageSeverity::Info, "two").unwrap();
        let s3 = sink_a.send_message(MessageSeverity::Info, "three").unwrap();
        assert!(s1 < s2 && s2 < s3);
    }
}
