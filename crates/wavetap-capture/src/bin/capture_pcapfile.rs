//! Capture binary replaying pcap/pcapng files through the data-source
//! protocol.
//!
//! The simplest possible capture source: no channels, no hardware, just a
//! recorded file.  Useful for importing old captures and for exercising
//! the full protocol path without a radio.
//!
//! The communications channel is a descriptor pair passed as `--in-fd` and
//! `--out-fd`, or a remote server via `--connect`.  Source options such as
//! `pps=` and `realtime=true` are parsed from the definition once the
//! server opens the source.

use std::process::ExitCode;

use wavetap_capture::pcapfile::PcapReplayAdapter;

fn main() -> ExitCode {
    wavetap_capture::run_capture_binary(PcapReplayAdapter::new())
}
