//! V3 packet types and message severities.

/// Numeric packet types carried in the V3 header.  Unknown types are logged
/// and ignored so the protocol stays forward compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    Data = 1,
    Message = 2,
    Ping = 3,
    Pong = 4,
    Shutdown = 5,
    EventRegister = 6,
    EventPublish = 7,
    HttpRegister = 8,
    HttpRequest = 9,
    HttpResponse = 10,
    HttpAuthRequest = 11,
    HttpAuth = 12,
    ListRequest = 16,
    ListReport = 17,
    ProbeRequest = 18,
    ProbeReport = 19,
    OpenRequest = 20,
    OpenReport = 21,
    Configure = 22,
    ConfigureReport = 23,
    NewSource = 24,
}

impl PacketType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => Self::Data,
            2 => Self::Message,
            3 => Self::Ping,
            4 => Self::Pong,
            5 => Self::Shutdown,
            6 => Self::EventRegister,
            7 => Self::EventPublish,
            8 => Self::HttpRegister,
            9 => Self::HttpRequest,
            10 => Self::HttpResponse,
            11 => Self::HttpAuthRequest,
            12 => Self::HttpAuth,
            16 => Self::ListRequest,
            17 => Self::ListReport,
            18 => Self::ProbeRequest,
            19 => Self::ProbeReport,
            20 => Self::OpenRequest,
            21 => Self::OpenReport,
            22 => Self::Configure,
            23 => Self::ConfigureReport,
            24 => Self::NewSource,
            _ => return None,
        })
    }

    /// Legacy V2 string command for this type, used when a peer announced
    /// protocol version 2.
    pub fn v2_command(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Message => "MESSAGE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Shutdown => "SHUTDOWN",
            Self::EventRegister => "EVENTREGISTER",
            Self::EventPublish => "EVENT",
            Self::HttpRegister => "HTTPREGISTERURI",
            Self::HttpRequest => "HTTPREQUEST",
            Self::HttpResponse => "HTTPRESPONSE",
            Self::HttpAuthRequest => "HTTPAUTHREQ",
            Self::HttpAuth => "HTTPAUTH",
            Self::ListRequest => "LISTINTERFACES",
            Self::ListReport => "LISTRESP",
            Self::ProbeRequest => "PROBEDEVICE",
            Self::ProbeReport => "PROBERESP",
            Self::OpenRequest => "OPENDEVICE",
            Self::OpenReport => "OPENRESP",
            Self::Configure => "CONFIGURE",
            Self::ConfigureReport => "CONFIGRESP",
            Self::NewSource => "NEWSOURCE",
        }
    }
}

/// Message severity bitmask values carried in the V3 `code` field of a
/// `MESSAGE` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum MessageSeverity {
    Debug = 1,
    Info = 2,
    Error = 4,
    Alert = 8,
    Fatal = 16,
}

impl MessageSeverity {
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => Self::Debug,
            2 => Self::Info,
            4 => Self::Error,
            8 => Self::Alert,
            16 => Self::Fatal,
            _ => return None,
        })
    }

    pub fn as_log_level(&self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Error | Self::Alert => log::Level::Warn,
            Self::Fatal => log::Level::Error,
        }
    }
}
