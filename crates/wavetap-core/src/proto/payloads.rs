//! Msgpack payload bodies for the V3 protocol.
//!
//! Every payload is a msgpack map with string keys, so fields can be added
//! without breaking older peers.  Optional fields are omitted when absent.

use serde::{Deserialize, Serialize};

use crate::proto::ProtocolError;

/// Encode a payload as a msgpack map with string keys.
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut out).with_struct_map();
    payload
        .serialize(&mut serializer)
        .map_err(|e| ProtocolError::PayloadEncode(e.to_string()))?;
    Ok(out)
}

/// Decode a msgpack payload body.
pub fn decode<'a, T: Deserialize<'a>>(raw: &'a [u8]) -> Result<T, ProtocolError> {
    rmp_serde::from_slice(raw).map_err(|e| ProtocolError::PayloadDecode(e.to_string()))
}

/// Signal data accompanying a packet when the DLT does not embed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    #[serde(default)]
    pub signal_dbm: i32,
    #[serde(default)]
    pub noise_dbm: i32,
    #[serde(default)]
    pub signal_rssi: u32,
    #[serde(default)]
    pub noise_rssi: u32,
    #[serde(default)]
    pub freq_khz: f64,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub datarate: f64,
}

/// GPS data accompanying a packet, for sources with independent GPS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsReport {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub precision: f64,
    #[serde(default)]
    pub fix: u8,
    #[serde(default)]
    pub ts_sec: u64,
    #[serde(default)]
    pub gps_type: String,
    #[serde(default)]
    pub gps_name: String,
}

/// A captured frame published by the capture thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataReport {
    pub ts_sec: u64,
    pub ts_usec: u32,
    pub dlt: u32,
    pub packet: Vec<u8>,
    /// On-air length when the capture was truncated; 0 means untruncated.
    #[serde(default)]
    pub original_len: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsReport>,
    /// Out-of-band JSON telemetry keyed by type, for non-packet sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
}

/// `MESSAGE` body; the severity rides in the frame `code`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageReport {
    pub msg: String,
}

/// `SHUTDOWN` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub reason: String,
}

/// One interface in a `LIST_REPORT`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceReport {
    pub interface: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub hardware: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListReport {
    pub seqno: u32,
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub interfaces: Vec<InterfaceReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub definition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub seqno: u32,
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub hardware: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub definition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenReport {
    pub seqno: u32,
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub dlt: u32,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub hardware: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_interface: Option<String>,
}

/// Channel-hop parameters inside a `CONFIGURE`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HopConfig {
    pub rate: f64,
    pub channels: Vec<String>,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub shuffle_spacing: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop: Option<HopConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureReport {
    pub seqno: u32,
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// First frame from a remote (`--connect`) capture helper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSource {
    pub definition: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRegister {
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPublish {
    pub topic: String,
    /// JSON-encoded event body.
    pub event: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpRegister {
    pub uri: String,
    pub method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub session_id: u32,
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub variables: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub session_id: u32,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
    /// Final response for the session; the session id dies with it.
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpAuth {
    pub token: String,
}
