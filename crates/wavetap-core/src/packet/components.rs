//! Typed packet components attached by dissectors along the chain.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Capture timestamp with microsecond precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketTime {
    pub sec: u64,
    pub usec: u32,
}

impl PacketTime {
    pub fn new(sec: u64, usec: u32) -> Self {
        Self { sec, usec }
    }

    /// Microseconds since the epoch, as packed into pcap-ng timestamps.
    pub fn as_micros(&self) -> u64 {
        self.sec * 1_000_000 + u64::from(self.usec)
    }
}

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr(pub [u8; 6]);

#[derive(Debug, Error)]
#[error("invalid MAC address: {0}")]
pub struct MacAddrError(String);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.get(0..6)?.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }

    /// True when this address equals `other` under `mask`, used for
    /// fingerprinting vendor-prefix matches.
    pub fn matches_masked(&self, other: &MacAddr, mask: &MacAddr) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .zip(mask.0.iter())
            .all(|((a, b), m)| a & m == b & m)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MacAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for slot in &mut out {
            let part = parts.next().ok_or_else(|| MacAddrError(s.to_string()))?;
            *slot = u8::from_str_radix(part, 16).map_err(|_| MacAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacAddrError(s.to_string()));
        }
        Ok(Self(out))
    }
}

/// Raw captured bytes plus the DLT identifying their link-layer encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub dlt: u32,
    pub data: Vec<u8>,
}

impl DataChunk {
    pub fn new(dlt: u32, data: Vec<u8>) -> Self {
        Self { dlt, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalType {
    #[default]
    Unknown,
    Dbm,
    Rssi,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhyCarrier {
    #[default]
    Unknown,
    Ieee80211A,
    Ieee80211B,
    Ieee80211BPlus,
    Ieee80211G,
    Ieee80211Fhss,
    Ieee80211Dsss,
    Ieee80211N20,
    Ieee80211N40,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhyEncoding {
    #[default]
    Unknown,
    Cck,
    Ofdm,
    DynamicCck,
    Gfsk,
}

/// L1 radio metadata extracted from a capture pseudo-header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioInfo {
    pub signal_type: SignalType,
    pub signal_dbm: i32,
    pub noise_dbm: i32,
    pub signal_rssi: i32,
    pub noise_rssi: i32,
    pub freq_khz: f64,
    pub channel: String,
    pub carrier: PhyCarrier,
    pub encoding: PhyEncoding,
    /// Data rate in hundreds of kilobits per second.
    pub datarate: f64,
    /// Per-antenna signal readings, keyed by antenna index.
    pub antenna_signals: BTreeMap<u8, i32>,
}

/// GPS fix attached to a packet, from a PPI tag or a capture report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsInfo {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub heading: f64,
    /// 0/1 no fix, 2 = 2d, 3 = 3d.
    pub fix: u8,
    pub ts: PacketTime,
    pub name: String,
}

/// Trailing FCS bytes plus the validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumInfo {
    pub fcs: [u8; 4],
    pub valid: bool,
}

/// Non-packet telemetry carried alongside the packet stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaBlob {
    pub meta_type: String,
    pub meta_data: serde_json::Value,
}

/// Back-reference to the capture source a packet arrived from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    pub source_id: u32,
    pub name: String,
    pub interface: String,
    pub capture_interface: String,
    pub uuid: String,
    /// Source asks the server to validate trailing FCS bytes.
    pub validate_fcs: bool,
    /// Trailing FCS bytes the source appends to each frame.
    pub fcs_bytes: u32,
}

/// Normalized endpoint summary produced by the classifier stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonInfo {
    pub source: MacAddr,
    pub dest: MacAddr,
    pub network: MacAddr,
    pub channel: String,
    pub freq_khz: f64,
}

/// Opaque plugin payload, keyed by a plugin-chosen name.
#[derive(Clone)]
pub struct PluginBlob {
    pub name: &'static str,
    pub data: Arc<dyn std::any::Any + Send + Sync>,
}

impl fmt::Debug for PluginBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBlob")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::MacAddr;

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        assert_eq!(mac.0, [0x02, 0, 0, 0, 0, 1]);
        assert_eq!(mac.to_string(), "02:00:00:00:00:01");

        assert!("02:00:00".parse::<MacAddr>().is_err());
        assert!("02:00:00:00:00:zz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn mac_masked_match() {
        let mac: MacAddr = "90:E9:75:12:34:56".parse().unwrap();
        let prefix: MacAddr = "90:E9:75:00:00:00".parse().unwrap();
        let mask: MacAddr = "FF:FF:FF:00:00:00".parse().unwrap();

        assert!(mac.matches_masked(&prefix, &mask));
        assert!(!MacAddr::BROADCAST.matches_masked(&prefix, &mask));
    }
}
