//! Capture-framework runtime for wavetap capture binaries.
//!
//! Every capture binary links this crate and follows the same shape: parse
//! the command line, build a [`CaptureHandler`] over IPC descriptors or a
//! remote TCP connection, hand it a [`CaptureAdapter`] for the radio, and
//! run the protocol loop until the server spins the source down.
//!
//! ```no_run
//! use std::process::ExitCode;
//! use wavetap_capture::pcapfile::PcapReplayAdapter;
//!
//! fn main() -> ExitCode {
//!     wavetap_capture::run_capture_binary(PcapReplayAdapter::new())
//! }
//! ```

pub mod adapter;
pub mod error;
pub mod handler;
pub mod hop;
pub mod options;
pub mod pcapfile;
pub mod sandbox;
pub mod sink;

pub use adapter::{CaptureAdapter, ChannelToken, InterfaceEntry, OpenOutcome, ProbeOutcome};
pub use error::{CaptureError, RunError};
pub use handler::CaptureHandler;
pub use options::{CaptureArgs, TransportConfig};
pub use sink::{CaptureControl, FrameSink};

use std::process::ExitCode;

use clap::Parser;

/// Standard `main` body for a capture binary: logging, argument parsing,
/// `--list` handling, and the protocol loop, mapped onto the documented
/// exit codes (0 clean, 1 startup failure, 2 protocol violation).
pub fn run_capture_binary<A: CaptureAdapter + 'static>(adapter: A) -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CaptureArgs::parse();

    if args.list {
        return match adapter.list_interfaces() {
            Ok(interfaces) => {
                for entry in interfaces {
                    println!("{}\t{}\t{}", entry.interface, entry.flags, entry.hardware);
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let transport = match args.transport() {
        Ok(transport) => transport,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let handler = match CaptureHandler::new(transport, adapter, args.source.clone()) {
        Ok(handler) => handler,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match handler.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Startup(err)) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
        Err(RunError::Protocol(err)) => {
            eprintln!("protocol error: {err}");
            ExitCode::from(2)
        }
    }
}
