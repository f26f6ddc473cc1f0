//! Server-side ingest: turn `DATA` reports from a capture source into
//! packets and push them through the chain.

use std::sync::Arc;

use crate::chain::PacketChain;
use crate::packet::{
    DataChunk, GpsInfo, MetaBlob, Packet, PacketComponent, PacketTime, RadioInfo, SignalType,
    SourceRecord,
};
use crate::proto::payloads::DataReport;

/// Ingest for one capture source: owns the source record handed to every
/// packet and the chain the packets run through.
pub struct PacketIngest {
    chain: Arc<PacketChain>,
    source: Arc<SourceRecord>,
}

impl PacketIngest {
    pub fn new(chain: Arc<PacketChain>, source: Arc<SourceRecord>) -> Self {
        Self { chain, source }
    }

    pub fn source(&self) -> &Arc<SourceRecord> {
        &self.source
    }

    /// Build a packet from a capture report.  Every component the report
    /// carries is attached before the packet enters the chain.
    pub fn packet_from_report(&self, report: &DataReport) -> Packet {
        let mut packet = Packet::new(PacketTime::new(report.ts_sec, report.ts_usec));

        packet.original_len = if report.original_len != 0 {
            report.original_len
        } else {
            report.packet.len() as u32
        };

        packet.insert(PacketComponent::DataSrc(Arc::clone(&self.source)));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            report.dlt,
            report.packet.clone(),
        )));

        if let Some(signal) = &report.signal {
            let mut radio = RadioInfo {
                signal_dbm: signal.signal_dbm,
                noise_dbm: signal.noise_dbm,
                signal_rssi: signal.signal_rssi as i32,
                noise_rssi: signal.noise_rssi as i32,
                freq_khz: signal.freq_khz,
                channel: signal.channel.clone(),
                datarate: signal.datarate,
                ..RadioInfo::default()
            };
            radio.signal_type = if signal.signal_rssi != 0 {
                SignalType::Rssi
            } else {
                SignalType::Dbm
            };
            packet.insert(PacketComponent::Radio(radio));
        }

        if let Some(gps) = &report.gps {
            packet.insert(PacketComponent::Gps(GpsInfo {
                lat: gps.lat,
                lon: gps.lon,
                alt: gps.alt,
                speed: gps.speed,
                heading: gps.heading,
                fix: gps.fix,
                ts: PacketTime::new(gps.ts_sec, 0),
                name: gps.gps_name.clone(),
            }));
        }

        if let Some(json) = &report.json {
            match serde_json::from_str::<serde_json::Value>(json) {
                Ok(value) => {
                    let meta_type = value
                        .get("meta_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("json")
                        .to_string();
                    packet.insert(PacketComponent::Meta(MetaBlob {
                        meta_type,
                        meta_data: value,
                    }));
                }
                Err(err) => {
                    log::debug!("discarding malformed json report from {}: {err}", self.source.name);
                }
            }
        }

        packet
    }

    /// Ingest one report end to end.  Returns the processed packet so the
    /// caller can inspect flags.
    pub fn ingest(&self, report: &DataReport) -> Packet {
        let mut packet = self.packet_from_report(report);
        self.chain.process(&mut packet);
        packet
    }
}
