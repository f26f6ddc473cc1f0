//! Command line shared by every capture binary.

use clap::Parser;

use crate::error::RunError;

/// Arguments every capture binary accepts.  Either the IPC descriptor pair
/// or a remote `--connect` destination must be supplied.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct CaptureArgs {
    /// File descriptor to read frames from (IPC mode).
    #[arg(long = "in-fd")]
    pub in_fd: Option<i32>,

    /// File descriptor to write frames to (IPC mode).
    #[arg(long = "out-fd")]
    pub out_fd: Option<i32>,

    /// Remote-capture TCP destination, HOST:PORT with an optional :SECRET.
    #[arg(long)]
    pub connect: Option<String>,

    /// Source definition string, interface:key=value,...
    #[arg(long)]
    pub source: Option<String>,

    /// List the interfaces this binary can capture from, then exit.
    #[arg(long)]
    pub list: bool,
}

/// Resolved transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Ipc { in_fd: i32, out_fd: i32 },
    Tcp {
        host: String,
        port: u16,
        secret: Option<String>,
    },
}

impl CaptureArgs {
    /// Decide the transport.  IPC descriptors and `--connect` are mutually
    /// exclusive; one of them is required.
    pub fn transport(&self) -> Result<TransportConfig, RunError> {
        match (&self.in_fd, &self.out_fd, &self.connect) {
            (Some(_), Some(_), Some(_)) => Err(RunError::Startup(
                "--connect cannot be combined with --in-fd/--out-fd".to_string(),
            )),
            (Some(in_fd), Some(out_fd), None) => Ok(TransportConfig::Ipc {
                in_fd: *in_fd,
                out_fd: *out_fd,
            }),
            (None, None, Some(connect)) => parse_connect(connect),
            _ => Err(RunError::Startup(
                "either --in-fd and --out-fd, or --connect, must be supplied".to_string(),
            )),
        }
    }
}

fn parse_connect(connect: &str) -> Result<TransportConfig, RunError> {
    let mut parts = connect.splitn(3, ':');

    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RunError::Startup(format!("malformed --connect {connect:?}")))?;
    let port = parts
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| RunError::Startup(format!("malformed --connect {connect:?}")))?;
    let secret = parts.next().map(|s| s.to_string());

    Ok(TransportConfig::Tcp {
        host: host.to_string(),
        port,
        secret,
    })
}
