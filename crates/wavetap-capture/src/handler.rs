//! The per-binary capture handler: transport, protocol loop, command
//! dispatch, capture thread, and spindown.
//!
//! The protocol loop is single-threaded: poll the descriptors, drain reads
//! into the input ring, decode frames lazily, dispatch commands
//! synchronously, and flush the output ring.  The capture thread, spawned
//! by the `OPEN` command, is the only other thread; it reaches the loop
//! only through the thread-safe [`FrameSink`] surface and the
//! [`CaptureControl`] flags.

use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, RawFd};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use log::{debug, info, warn};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use wavetap_core::proto::payloads::{
    self, ConfigureReport, ConfigureRequest, ListReport, NewSource, OpenReport, OpenRequest,
    ProbeReport, ProbeRequest,
};
use wavetap_core::proto::{Absorbed, MessageSeverity, PacketType, Session};
use wavetap_core::sourcedef::SourceDefinition;
use wavetap_core::{RingBuf, framing};

use crate::adapter::CaptureAdapter;
use crate::error::{CaptureError, RunError};
use crate::hop::ChannelHopper;
use crate::options::TransportConfig;
use crate::sink::{CaptureControl, FrameSink, OUT_RINGBUF_SZ, OutputRing};

/// Input ring: must hold at least one maximum-size frame.
const IN_RINGBUF_SZ: usize = 1 << 16;
const IO_CHUNK: usize = 4096;
const POLL_INTERVAL_MS: u16 = 150;

enum Transport {
    Ipc { input: File, output: File },
    Tcp(TcpStream),
}

impl Transport {
    fn read_fd(&self) -> RawFd {
        match self {
            Transport::Ipc { input, .. } => input.as_raw_fd(),
            Transport::Tcp(stream) => stream.as_raw_fd(),
        }
    }

    fn write_fd(&self) -> RawFd {
        match self {
            Transport::Ipc { output, .. } => output.as_raw_fd(),
            Transport::Tcp(stream) => stream.as_raw_fd(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Ipc { input, .. } => input.read(buf),
            Transport::Tcp(stream) => stream.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Ipc { output, .. } => output.write(buf),
            Transport::Tcp(stream) => stream.write(buf),
        }
    }
}

fn dup_file(fd: i32) -> Result<File, RunError> {
    let new_fd = unsafe { libc::dup(fd) };
    if new_fd < 0 {
        return Err(RunError::Startup(format!(
            "cannot dup descriptor {fd}: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(unsafe { File::from_raw_fd(new_fd) })
}

/// The per-process capture runtime.
pub struct CaptureHandler<A: CaptureAdapter + 'static> {
    adapter: Arc<A>,
    transport: Transport,
    session: Session,
    in_ring: RingBuf,
    out: Arc<OutputRing>,
    ctl: CaptureControl,
    sink: FrameSink,
    hopper: Option<ChannelHopper>,
    capture_thread: Option<JoinHandle<()>>,
    last_ping_sent: Option<Instant>,
    /// Definition override from `--source`.
    source_override: Option<String>,
}

impl<A: CaptureAdapter + 'static> CaptureHandler<A> {
    pub fn new(
        config: TransportConfig,
        adapter: A,
        source_override: Option<String>,
    ) -> Result<Self, RunError> {
        let transport = match &config {
            TransportConfig::Ipc { in_fd, out_fd } => Transport::Ipc {
                input: dup_file(*in_fd)?,
                output: dup_file(*out_fd)?,
            },
            TransportConfig::Tcp { host, port, .. } => {
                let stream = TcpStream::connect((host.as_str(), *port)).map_err(|err| {
                    RunError::Startup(format!("cannot connect to {host}:{port}: {err}"))
                })?;
                stream.set_nodelay(true).ok();
                stream
                    .set_nonblocking(true)
                    .map_err(|err| RunError::Startup(err.to_string()))?;
                Transport::Tcp(stream)
            }
        };

        let session = Session::new(Instant::now());
        let ctl = CaptureControl::new();
        let out = Arc::new(OutputRing::new(OUT_RINGBUF_SZ, ctl.clone()));
        let sink = FrameSink::new(Arc::clone(&out), session.seq_counter());

        let mut handler = Self {
            adapter: Arc::new(adapter),
            transport,
            session,
            in_ring: RingBuf::new(IN_RINGBUF_SZ),
            out,
            ctl,
            sink,
            hopper: None,
            capture_thread: None,
            last_ping_sent: None,
            source_override,
        };

        // Remote mode announces itself with a NEW_SOURCE carrying the
        // definition and the auth secret; the server closes the stream on
        // a mismatch.
        if let TransportConfig::Tcp { secret, .. } = config {
            handler.announce_remote(secret)?;
        }

        Ok(handler)
    }

    /// A clone of the thread-safe sink, for pre-loop messages.
    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    pub fn control(&self) -> CaptureControl {
        self.ctl.clone()
    }

    fn announce_remote(&mut self, secret: Option<String>) -> Result<(), RunError> {
        let announce = NewSource {
            definition: self.source_override.clone().unwrap_or_default(),
            source_type: self.adapter.source_type().to_string(),
            uuid: String::new(),
            auth_token: secret,
        };
        let payload = payloads::encode(&announce)
            .map_err(|err| RunError::Startup(err.to_string()))?;
        let frame = self
            .session
            .encode_frame(PacketType::NewSource, 0, &payload)
            .map_err(|err| RunError::Startup(err.to_string()))?;
        self.out
            .send(&frame, false)
            .map_err(|err| RunError::Startup(err.to_string()))?;
        Ok(())
    }

    /// Run the protocol loop until spindown or a fatal error.
    pub fn run(mut self) -> Result<(), RunError> {
        let result = self.io_loop();

        // Let the capture thread observe the flags and exit, then join it.
        self.ctl.spindown();
        self.out.wake();
        if let Some(thread) = self.capture_thread.take() {
            if thread.join().is_err() {
                warn!("capture thread panicked during spindown");
            }
        }

        if result.is_ok() {
            info!("capture handler exited cleanly");
        }
        result
    }

    fn io_loop(&mut self) -> Result<(), RunError> {
        loop {
            if self.ctl.shutdown_requested() {
                debug!("shutdown requested, dropping pending writes");
                return Ok(());
            }

            let capture_done = self
                .capture_thread
                .as_ref()
                .map(|t| t.is_finished())
                .unwrap_or(true);
            if self.ctl.spindown_requested() && self.out.used() == 0 && capture_done {
                return Ok(());
            }

            let (readable, writable) = self.poll_transport()?;

            if readable {
                self.drain_input()?;
                self.dispatch_frames()?;
            }

            if writable {
                self.flush_output()?;
            }

            self.run_timers()?;
        }
    }

    fn poll_transport(&mut self) -> Result<(bool, bool), RunError> {
        let read_raw = self.transport.read_fd();
        let write_raw = self.transport.write_fd();
        let read_fd = unsafe { BorrowedFd::borrow_raw(read_raw) };
        let write_fd = unsafe { BorrowedFd::borrow_raw(write_raw) };

        let want_write = self.out.used() > 0;

        let mut fds = Vec::with_capacity(2);
        fds.push(PollFd::new(read_fd, PollFlags::POLLIN));
        if want_write {
            fds.push(PollFd::new(write_fd, PollFlags::POLLOUT));
        }

        match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok((false, false)),
            Err(err) => return Err(RunError::Protocol(format!("poll failed: {err}"))),
        }

        let read_events = fds[0].revents().unwrap_or(PollFlags::empty());
        let readable =
            read_events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR);

        let writable = want_write
            && fds[1]
                .revents()
                .unwrap_or(PollFlags::empty())
                .intersects(PollFlags::POLLOUT | PollFlags::POLLERR);

        Ok((readable, writable))
    }

    fn drain_input(&mut self) -> Result<(), RunError> {
        let mut buf = [0u8; IO_CHUNK];
        let want = buf.len().min(self.in_ring.available());
        if want == 0 {
            return Err(RunError::Protocol(
                "input ring buffer full of undecodable data".to_string(),
            ));
        }

        match self.transport.read(&mut buf[..want]) {
            Ok(0) => {
                if self.ctl.spindown_requested() {
                    self.ctl.shutdown();
                    Ok(())
                } else {
                    Err(RunError::Protocol("remote side closed the stream".to_string()))
                }
            }
            Ok(n) => {
                // Space was checked above, the write cannot fail.
                self.in_ring.write(&buf[..n]);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(()),
            Err(err) => Err(RunError::Protocol(format!("transport read failed: {err}"))),
        }
    }

    fn dispatch_frames(&mut self) -> Result<(), RunError> {
        loop {
            let parsed = {
                let window = self.in_ring.peek_zc(0);
                framing::parse_next(&window)
            };

            match parsed {
                Ok(Some((frame, consumed))) => {
                    self.in_ring.read(None, consumed);
                    self.handle_frame(frame)?;
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    // Irrecoverable: emit a best-effort fatal message and
                    // close the transport.
                    let _ = self
                        .sink
                        .send_message(MessageSeverity::Fatal, &err.to_string());
                    let _ = self.flush_output();
                    return Err(RunError::Protocol(err.to_string()));
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: framing::Frame) -> Result<(), RunError> {
        let absorbed = self
            .session
            .absorb(frame, Instant::now())
            .map_err(|err| RunError::Protocol(err.to_string()))?;

        match absorbed {
            Absorbed::Reply(bytes) => {
                if let Err(err) = self.out.send(&bytes, false) {
                    warn!("could not queue protocol reply: {err}");
                }
            }
            Absorbed::Message { .. } => {}
            Absorbed::Shutdown { reason } => {
                info!(
                    "peer requested shutdown{}",
                    if reason.is_empty() {
                        String::new()
                    } else {
                        format!(": {reason}")
                    }
                );
                self.ctl.spindown();
            }
            Absorbed::Command {
                pkt_type,
                seqno,
                payload,
                ..
            } => self.dispatch_command(pkt_type, seqno, &payload),
            Absorbed::Ignored => {}
        }

        Ok(())
    }

    fn dispatch_command(&mut self, pkt_type: PacketType, seqno: u32, payload: &[u8]) {
        match pkt_type {
            PacketType::ListRequest => self.cmd_list(seqno),
            PacketType::ProbeRequest => self.cmd_probe(seqno, payload),
            PacketType::OpenRequest => self.cmd_open(seqno, payload),
            PacketType::Configure => self.cmd_configure(seqno, payload),
            other => {
                debug!("ignoring unexpected command {other:?}");
            }
        }
    }

    fn send_report<T: serde::Serialize>(&mut self, pkt_type: PacketType, code: u16, report: &T) {
        let payload = match payloads::encode(report) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("could not encode {pkt_type:?} report: {err}");
                return;
            }
        };
        match self.session.encode_frame(pkt_type, code, &payload) {
            Ok(frame) => {
                if let Err(err) = self.out.send(&frame, false) {
                    warn!("could not queue {pkt_type:?} report: {err}");
                }
            }
            Err(err) => warn!("could not frame {pkt_type:?} report: {err}"),
        }
    }

    fn cmd_list(&mut self, seqno: u32) {
        let report = match self.adapter.list_interfaces() {
            Ok(interfaces) => ListReport {
                seqno,
                success: true,
                msg: String::new(),
                interfaces: interfaces
                    .into_iter()
                    .map(|i| payloads::InterfaceReport {
                        interface: i.interface,
                        flags: i.flags,
                        hardware: i.hardware,
                    })
                    .collect(),
            },
            Err(err) => ListReport {
                seqno,
                success: false,
                msg: err.to_string(),
                interfaces: Vec::new(),
            },
        };

        let code = if report.success { 0 } else { 1 };
        self.send_report(PacketType::ListReport, code, &report);
    }

    fn effective_definition(&self, requested: &str) -> String {
        self.source_override
            .clone()
            .unwrap_or_else(|| requested.to_string())
    }

    fn cmd_probe(&mut self, seqno: u32, payload: &[u8]) {
        let outcome = payloads::decode::<ProbeRequest>(payload)
            .map_err(CaptureError::from)
            .and_then(|request| {
                let definition =
                    SourceDefinition::parse(&self.effective_definition(&request.definition))?;
                self.adapter.probe(&definition)
            });

        let report = match outcome {
            Ok(Some(probe)) => ProbeReport {
                seqno,
                success: true,
                msg: String::new(),
                channels: probe.channels,
                channel: probe.channel,
                hardware: probe.hardware,
                uuid: probe.uuid,
            },
            Ok(None) => ProbeReport {
                seqno,
                success: false,
                msg: "source not supported by this capture tool".to_string(),
                ..ProbeReport::default()
            },
            Err(err) => ProbeReport {
                seqno,
                success: false,
                msg: err.to_string(),
                ..ProbeReport::default()
            },
        };

        let code = if report.success { 0 } else { 1 };
        self.send_report(PacketType::ProbeReport, code, &report);
    }

    fn cmd_open(&mut self, seqno: u32, payload: &[u8]) {
        let outcome = payloads::decode::<OpenRequest>(payload)
            .map_err(CaptureError::from)
            .and_then(|request| {
                let definition =
                    SourceDefinition::parse(&self.effective_definition(&request.definition))?;
                self.adapter.open(&definition)
            });

        match outcome {
            Ok(open) => {
                let report = OpenReport {
                    seqno,
                    success: true,
                    msg: String::new(),
                    dlt: open.dlt,
                    uuid: open.uuid,
                    channels: open.channels,
                    channel: open.channel,
                    hardware: open.hardware,
                    capture_interface: open.capture_interface,
                };
                self.send_report(PacketType::OpenReport, 0, &report);

                // Both hooks are best effort; a refusal is logged, not
                // fatal.
                if self.adapter.sandbox_after_open() {
                    crate::sandbox::jail_filesystem("/tmp/wavetap-capture-jail");
                    crate::sandbox::drop_most_caps();
                }

                self.spawn_capture_thread();
            }
            Err(err) => {
                let report = OpenReport {
                    seqno,
                    success: false,
                    msg: err.to_string(),
                    ..OpenReport::default()
                };
                self.send_report(PacketType::OpenReport, 1, &report);
                // A failed open is fatal for this helper instance.
                self.ctl.spindown();
            }
        }
    }

    fn spawn_capture_thread(&mut self) {
        if self.capture_thread.is_some() {
            return;
        }

        let adapter = Arc::clone(&self.adapter);
        let ctl = self.ctl.clone();
        let sink = self.sink.clone();

        self.capture_thread = Some(std::thread::spawn(move || {
            if let Err(err) = adapter.run_capture(ctl.clone(), sink.clone()) {
                let _ = sink.send_error(&format!("capture terminated: {err}"));
            }
            ctl.spindown();
        }));
    }

    fn cmd_configure(&mut self, seqno: u32, payload: &[u8]) {
        let request = match payloads::decode::<ConfigureRequest>(payload) {
            Ok(request) => request,
            Err(err) => {
                self.send_report(
                    PacketType::ConfigureReport,
                    1,
                    &ConfigureReport {
                        seqno,
                        success: false,
                        msg: err.to_string(),
                        channel: None,
                    },
                );
                return;
            }
        };

        if let Some(channel) = request.channel {
            let result = self
                .adapter
                .translate_channel(&channel)
                .and_then(|token| self.adapter.set_channel(&token));

            let report = match result {
                Ok(()) => {
                    self.hopper = None;
                    ConfigureReport {
                        seqno,
                        success: true,
                        msg: String::new(),
                        channel: Some(channel),
                    }
                }
                Err(err) => ConfigureReport {
                    seqno,
                    success: false,
                    msg: err.to_string(),
                    channel: None,
                },
            };
            let code = if report.success { 0 } else { 1 };
            self.send_report(PacketType::ConfigureReport, code, &report);
            return;
        }

        if let Some(hop) = request.hop {
            match ChannelHopper::from_config(&hop) {
                Some(hopper) => {
                    info!(
                        "channel hopping over {} channels at {:.1} hops/sec",
                        hop.channels.len(),
                        hop.rate
                    );
                    self.hopper = Some(hopper);
                    self.send_report(
                        PacketType::ConfigureReport,
                        0,
                        &ConfigureReport {
                            seqno,
                            success: true,
                            msg: String::new(),
                            channel: None,
                        },
                    );
                }
                None => self.send_report(
                    PacketType::ConfigureReport,
                    1,
                    &ConfigureReport {
                        seqno,
                        success: false,
                        msg: "unusable hop configuration".to_string(),
                        channel: None,
                    },
                ),
            }
            return;
        }

        // An empty configure is a no-op success.
        self.send_report(
            PacketType::ConfigureReport,
            0,
            &ConfigureReport {
                seqno,
                success: true,
                msg: String::new(),
                channel: None,
            },
        );
    }

    fn flush_output(&mut self) -> Result<(), RunError> {
        let chunk = self.out.pending(IO_CHUNK);
        if chunk.is_empty() {
            return Ok(());
        }

        match self.transport.write(&chunk) {
            Ok(n) => {
                self.out.consume(n);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(()),
            Err(err) => Err(RunError::Protocol(format!("transport write failed: {err}"))),
        }
    }

    fn run_timers(&mut self) -> Result<(), RunError> {
        let now = Instant::now();

        if self.session.ping_due(self.last_ping_sent, now) {
            match self.session.encode_ping() {
                Ok(frame) => {
                    if self.out.send(&frame, false).is_ok() {
                        self.last_ping_sent = Some(now);
                    }
                }
                Err(err) => warn!("could not encode keepalive ping: {err}"),
            }
        }

        if let Err(err) = self.session.check_timeout(now) {
            if let Ok(frame) = self.session.encode_shutdown("timeout") {
                let _ = self.out.send(&frame, false);
                let _ = self.flush_output();
            }
            return Err(RunError::Protocol(err.to_string()));
        }

        self.hop_tick(now);
        Ok(())
    }

    fn hop_tick(&mut self, now: Instant) {
        let Some(hopper) = self.hopper.as_mut() else {
            return;
        };
        if !hopper.due(now) {
            return;
        }

        let channel = hopper.advance(now).to_string();
        let result = self
            .adapter
            .translate_channel(&channel)
            .and_then(|token| self.adapter.set_channel(&token));

        match result {
            Ok(()) => hopper.record_success(),
            Err(err) => {
                warn!("channel hop to {channel} failed: {err}");
                if hopper.record_failure() {
                    let _ = self
                        .sink
                        .send_error(&format!("channel control failed repeatedly on {channel}"));
                    self.hopper = None;
                    self.ctl.spindown();
                }
            }
        }
    }
}
