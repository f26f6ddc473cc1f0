//! Per-connection protocol session state.
//!
//! A [`Session`] is transport-agnostic: the owner feeds it decoded frames
//! and writes whatever encoded bytes it hands back.  It owns the outgoing
//! sequence counter, the latched protocol version, the ping/pong liveness
//! clock, and the shared handling of the session-level packet types; the
//! source-specific commands pass through to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::{debug, log};

use crate::framing::{self, Frame};
use crate::proto::payloads::{self, MessageReport, ShutdownRequest};
use crate::proto::{MessageSeverity, PacketType, ProtocolError};

/// Default ping cadence; a peer is dead after twice this with no traffic.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream open, no frame seen yet.
    Init,
    /// Protocol version latched, traffic flowing.
    Running,
    /// A fatal error occurred; only shutdown traffic may be emitted.
    Error,
    Closed,
}

/// What a received frame turned into.
#[derive(Debug)]
pub enum Absorbed {
    /// Write these bytes back to the peer immediately (ping replies).
    Reply(Vec<u8>),
    /// A peer message for the local message bus.
    Message {
        severity: MessageSeverity,
        text: String,
    },
    /// The peer requested a graceful shutdown.
    Shutdown { reason: String },
    /// A source-specific command for the caller to dispatch.
    Command {
        pkt_type: PacketType,
        code: u16,
        seqno: u32,
        payload: Vec<u8>,
    },
    /// Nothing to do (pongs, unknown packet types).
    Ignored,
}

/// Shared outgoing sequence counter: strictly increasing, wrapping back to
/// 1 and never producing 0.  Shared between the protocol loop and the
/// capture thread so one sender keeps one sequence space.
#[derive(Debug, Default)]
pub struct SeqCounter(AtomicU32);

impl SeqCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(value: u32) -> Self {
        Self(AtomicU32::new(value))
    }

    pub fn next(&self) -> u32 {
        loop {
            let value = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if value != 0 {
                return value;
            }
        }
    }
}

pub struct Session {
    seqno: Arc<SeqCounter>,
    /// 0 until the first frame latches 2 or 3.
    protocol_version: u16,
    state: SessionState,
    ping_interval: Duration,
    /// Last PING or PONG observed from the peer.
    last_pingpong: Option<Instant>,
    opened: Instant,
}

impl Session {
    pub fn new(now: Instant) -> Self {
        Self {
            seqno: Arc::new(SeqCounter::new()),
            protocol_version: 0,
            state: SessionState::Init,
            ping_interval: DEFAULT_PING_INTERVAL,
            last_pingpong: None,
            opened: now,
        }
    }

    /// The sequence counter, for capture threads that frame data outside
    /// the session.
    pub fn seq_counter(&self) -> Arc<SeqCounter> {
        Arc::clone(&self.seqno)
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Next outgoing sequence number.
    pub fn next_seqno(&mut self) -> u32 {
        self.seqno.next()
    }

    /// Absorb one decoded frame.  Session-level types are handled here;
    /// everything else comes back as [`Absorbed::Command`].
    pub fn absorb(&mut self, frame: Frame, now: Instant) -> Result<Absorbed, ProtocolError> {
        if self.state == SessionState::Closed {
            return Err(ProtocolError::Closed);
        }

        let (pkt_type, code, seqno, payload) = match frame {
            Frame::V3 {
                pkt_type,
                code,
                seqno,
                payload,
            } => {
                self.latch_version(3);
                let Some(pkt_type) = PacketType::from_u16(pkt_type) else {
                    debug!("ignoring unknown v3 packet type {pkt_type}");
                    return Ok(Absorbed::Ignored);
                };
                (pkt_type, code, seqno, payload)
            }
            Frame::V2 {
                command,
                seqno,
                payload,
            } => {
                self.latch_version(2);
                let Some(pkt_type) = v2_command_type(&command) else {
                    debug!("ignoring unknown v2 command {command:?}");
                    return Ok(Absorbed::Ignored);
                };
                (pkt_type, 0, seqno, payload)
            }
        };

        match pkt_type {
            PacketType::Ping => {
                self.last_pingpong = Some(now);
                let pong = self.encode_frame(PacketType::Pong, seqno as u16, &[])?;
                Ok(Absorbed::Reply(pong))
            }
            PacketType::Pong => {
                self.last_pingpong = Some(now);
                Ok(Absorbed::Ignored)
            }
            PacketType::Message => {
                let report: MessageReport = payloads::decode(&payload)?;
                let severity = MessageSeverity::from_u16(code).unwrap_or(MessageSeverity::Info);
                log!(severity.as_log_level(), "peer message: {}", report.msg);
                if severity == MessageSeverity::Fatal {
                    self.state = SessionState::Error;
                    return Ok(Absorbed::Shutdown { reason: report.msg });
                }
                Ok(Absorbed::Message {
                    severity,
                    text: report.msg,
                })
            }
            PacketType::Shutdown => {
                let request: ShutdownRequest = payloads::decode(&payload).unwrap_or_default();
                Ok(Absorbed::Shutdown {
                    reason: request.reason,
                })
            }
            _ => Ok(Absorbed::Command {
                pkt_type,
                code,
                seqno,
                payload,
            }),
        }
    }

    /// Encode a frame in the session's latched protocol version, assigning
    /// the next sequence number.
    pub fn encode_frame(
        &mut self,
        pkt_type: PacketType,
        code: u16,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        if self.state == SessionState::Closed {
            return Err(ProtocolError::Closed);
        }

        let seqno = self.next_seqno();
        if self.protocol_version == 2 {
            Ok(framing::encode_v2(pkt_type.v2_command(), seqno, payload))
        } else {
            Ok(framing::encode_v3(pkt_type as u16, code, seqno, payload))
        }
    }

    pub fn encode_ping(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.encode_frame(PacketType::Ping, 0, &[])
    }

    pub fn encode_message(
        &mut self,
        severity: MessageSeverity,
        text: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = payloads::encode(&MessageReport {
            msg: text.to_string(),
        })?;
        self.encode_frame(PacketType::Message, severity as u16, &body)
    }

    pub fn encode_shutdown(&mut self, reason: &str) -> Result<Vec<u8>, ProtocolError> {
        let body = payloads::encode(&ShutdownRequest {
            reason: reason.to_string(),
        })?;
        self.encode_frame(PacketType::Shutdown, 0, &body)
    }

    /// True when it is time to emit a keepalive ping.
    pub fn ping_due(&self, last_sent: Option<Instant>, now: Instant) -> bool {
        match last_sent {
            None => true,
            Some(sent) => now.duration_since(sent) >= self.ping_interval,
        }
    }

    /// Liveness check: errors out when neither a PING nor a PONG arrived
    /// within twice the ping interval.
    pub fn check_timeout(&mut self, now: Instant) -> Result<(), ProtocolError> {
        let reference = self.last_pingpong.unwrap_or(self.opened);
        let deadline = self.ping_interval * 2;
        if now.duration_since(reference) > deadline {
            self.state = SessionState::Error;
            return Err(ProtocolError::PingTimeout(deadline.as_secs_f64()));
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn latch_version(&mut self, version: u16) {
        self.protocol_version = version;
        if self.state == SessionState::Init {
            self.state = SessionState::Running;
        }
    }
}

fn v2_command_type(command: &str) -> Option<PacketType> {
    const TYPES: [PacketType; 21] = [
        PacketType::Data,
        PacketType::Message,
        PacketType::Ping,
        PacketType::Pong,
        PacketType::Shutdown,
        PacketType::EventRegister,
        PacketType::EventPublish,
        PacketType::HttpRegister,
        PacketType::HttpRequest,
        PacketType::HttpResponse,
        PacketType::HttpAuthRequest,
        PacketType::HttpAuth,
        PacketType::ListRequest,
        PacketType::ListReport,
        PacketType::ProbeRequest,
        PacketType::ProbeReport,
        PacketType::OpenRequest,
        PacketType::OpenReport,
        PacketType::Configure,
        PacketType::ConfigureReport,
        PacketType::NewSource,
    ];
    TYPES.into_iter().find(|t| t.v2_command() == command)
}

/// Additive event-bus topic registration for one subscriber stream.
/// Unsubscribe only happens by closing the stream.
#[derive(Debug, Default)]
pub struct EventSubscriptions {
    topics: HashSet<String>,
}

impl EventSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: &str) {
        self.topics.insert(topic.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Whether a published topic should be forwarded to this subscriber.
    /// The `*` topic subscribes to everything.
    pub fn matches(&self, topic: &str) -> bool {
        self.topics.contains("*") || self.topics.contains(topic)
    }
}

/// Server-side bookkeeping for webserver-proxied endpoints published by a
/// helper.  Session ids are allocated here and invalidated when the helper
/// sends its final response.
#[derive(Debug, Default)]
pub struct HttpProxy {
    next_session: u32,
    registered: Vec<(String, String)>,
    active: HashMap<u32, String>,
}

impl HttpProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an endpoint published via `HTTP_REGISTER`.
    pub fn register_uri(&mut self, uri: &str, method: &str) {
        self.registered.push((uri.to_string(), method.to_string()));
    }

    pub fn handles(&self, uri: &str, method: &str) -> bool {
        self.registered
            .iter()
            .any(|(u, m)| u == uri && m.eq_ignore_ascii_case(method))
    }

    /// Allocate a session id for a proxied request.
    pub fn open_session(&mut self, uri: &str) -> u32 {
        self.next_session = self.next_session.wrapping_add(1);
        if self.next_session == 0 {
            self.next_session = 1;
        }
        self.active.insert(self.next_session, uri.to_string());
        self.next_session
    }

    pub fn is_active(&self, session_id: u32) -> bool {
        self.active.contains_key(&session_id)
    }

    /// Absorb a helper response.  Returns false when the session id is
    /// unknown (stale or already finished).
    pub fn absorb_response(&mut self, session_id: u32, last: bool) -> bool {
        if !self.active.contains_key(&session_id) {
            return false;
        }
        if last {
            self.active.remove(&session_id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::parse_next;

    fn frame_of(bytes: &[u8]) -> Frame {
        parse_next(bytes).unwrap().expect("complete frame").0
    }

    #[test]
    fn seqno_is_monotonic_and_skips_zero() {
        let counter = SeqCounter::starting_at(u32::MAX - 1);

        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn ping_yields_pong_echoing_the_sequence() {
        let mut session = Session::new(Instant::now());
        let ping = framing::encode_v3(PacketType::Ping as u16, 0, 17, &[]);

        let absorbed = session.absorb(frame_of(&ping), Instant::now()).unwrap();
        let Absorbed::Reply(reply) = absorbed else {
            panic!("ping must produce a reply");
        };

        match frame_of(&reply) {
            Frame::V3 {
                pkt_type, code, ..
            } => {
                assert_eq!(pkt_type, PacketType::Pong as u16);
                assert_eq!(code, 17);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.protocol_version(), 3);
    }

    #[test]
    fn v2_frames_latch_the_legacy_version_for_sends() {
        let mut session = Session::new(Instant::now());
        let ping = framing::encode_v2("PING", 1, &[]);
        session.absorb(frame_of(&ping), Instant::now()).unwrap();
        assert_eq!(session.protocol_version(), 2);

        // Subsequent sends fall back to the v2 header.
        let out = session.encode_ping().unwrap();
        assert!(matches!(frame_of(&out), Frame::V2 { .. }));
    }

    #[test]
    fn fatal_message_requests_shutdown() {
        let mut session = Session::new(Instant::now());
        let body = payloads::encode(&MessageReport {
            msg: "driver gone".to_string(),
        })
        .unwrap();
        let frame = framing::encode_v3(
            PacketType::Message as u16,
            MessageSeverity::Fatal as u16,
            1,
            &body,
        );

        let absorbed = session.absorb(frame_of(&frame), Instant::now()).unwrap();
        assert!(matches!(absorbed, Absorbed::Shutdown { reason } if reason == "driver gone"));
    }

    #[test]
    fn unknown_types_are_ignored_not_fatal() {
        let mut session = Session::new(Instant::now());
        let frame = framing::encode_v3(0x7FFF, 0, 1, &[]);
        let absorbed = session.absorb(frame_of(&frame), Instant::now()).unwrap();
        assert!(matches!(absorbed, Absorbed::Ignored));
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn source_commands_pass_through() {
        let mut session = Session::new(Instant::now());
        let body = payloads::encode(&payloads::OpenRequest {
            definition: "pcapfile:file.pcap".to_string(),
        })
        .unwrap();
        let frame = framing::encode_v3(PacketType::OpenRequest as u16, 0, 5, &body);

        match session.absorb(frame_of(&frame), Instant::now()).unwrap() {
            Absorbed::Command {
                pkt_type, seqno, ..
            } => {
                assert_eq!(pkt_type, PacketType::OpenRequest);
                assert_eq!(seqno, 5);
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn missing_pong_times_out_after_twice_the_interval() {
        let start = Instant::now();
        let mut session =
            Session::new(start).with_ping_interval(Duration::from_millis(10));

        assert!(session.check_timeout(start + Duration::from_millis(15)).is_ok());
        let err = session
            .check_timeout(start + Duration::from_millis(25))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn pong_resets_the_liveness_clock() {
        let start = Instant::now();
        let mut session =
            Session::new(start).with_ping_interval(Duration::from_millis(10));

        let pong = framing::encode_v3(PacketType::Pong as u16, 0, 2, &[]);
        session
            .absorb(frame_of(&pong), start + Duration::from_millis(18))
            .unwrap();

        assert!(
            session
                .check_timeout(start + Duration::from_millis(30))
                .is_ok()
        );
    }

    #[test]
    fn event_subscriptions_are_additive() {
        let mut subs = EventSubscriptions::new();
        assert!(!subs.matches("datasource.open"));

        subs.register("datasource.open");
        assert!(subs.matches("datasource.open"));
        assert!(!subs.matches("gps.location"));

        subs.register("*");
        assert!(subs.matches("gps.location"));
    }

    #[test]
    fn http_sessions_die_on_last_response() {
        let mut proxy = HttpProxy::new();
        proxy.register_uri("/sensor/status", "GET");
        assert!(proxy.handles("/sensor/status", "get"));
        assert!(!proxy.handles("/sensor/status", "POST"));

        let id = proxy.open_session("/sensor/status");
        assert!(proxy.is_active(id));
        assert!(proxy.absorb_response(id, false));
        assert!(proxy.is_active(id));
        assert!(proxy.absorb_response(id, true));
        assert!(!proxy.is_active(id));
        assert!(!proxy.absorb_response(id, true));
    }
}
