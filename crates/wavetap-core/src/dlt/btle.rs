//! BTLE-RF monitor-header dissection.
//!
//! The pseudo-header carries the monitor channel, signal/noise readings, a
//! reference access address, and a flag word describing what the capture
//! hardware verified.  The residual bytes are a Bluetooth LE link-layer
//! frame.

use crate::chain::PacketHandler;
use crate::dlt::{DLT_BLUETOOTH_LE_LL, DLT_BTLE_RADIO};
use crate::packet::{
    ComponentKind, DataChunk, Packet, PacketComponent, RadioInfo, SignalType,
};

/// monitor_channel(1) signal(1) noise(1) access_offenses(1)
/// reference_access_address(4) flags(2)
const BTLE_RF_HEADER_LEN: usize = 10;
/// Smallest useful payload past the header: advertising address plus a
/// packet header.
const BTLE_RF_MIN_PAYLOAD: usize = 6;

const BTLE_RF_FLAG_SIGNALVALID: u16 = 1 << 1;
const BTLE_RF_FLAG_NOISEVALID: u16 = 1 << 2;
const BTLE_RF_CRC_CHECKED: u16 = 1 << 10;
const BTLE_RF_CRC_VALID: u16 = 1 << 11;

fn monitor_channel_to_khz(channel: u8) -> (String, f64) {
    match channel {
        37 => ("37".to_string(), 2_402_000.0),
        38 => ("38".to_string(), 2_426_000.0),
        39 => ("39".to_string(), 2_480_000.0),
        0..=10 => (
            channel.to_string(),
            f64::from(2404 + u32::from(channel) * 2) * 1000.0,
        ),
        11..=36 => (
            channel.to_string(),
            f64::from(2428 + (u32::from(channel) - 11) * 2) * 1000.0,
        ),
        _ => ("0".to_string(), 0.0),
    }
}

/// Post-capture handler converting BTLE-RF link frames.
#[derive(Default)]
pub struct BtleRadioDissector;

impl BtleRadioDissector {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for BtleRadioDissector {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.has(ComponentKind::Decap) {
            return 1;
        }

        let parsed = {
            let Some(link) = packet.link_frame() else {
                return 1;
            };
            if link.dlt != DLT_BTLE_RADIO {
                return 1;
            }
            if link.len() < BTLE_RF_HEADER_LEN + BTLE_RF_MIN_PAYLOAD {
                return 1;
            }

            let data = &link.data;
            let flags = u16::from_le_bytes([data[8], data[9]]);

            if flags & BTLE_RF_CRC_CHECKED != 0 && flags & BTLE_RF_CRC_VALID == 0 {
                // The capture source validated the CRC and it failed.
                None
            } else {
                let mut radio = RadioInfo::default();
                radio.signal_type = SignalType::Dbm;
                if flags & BTLE_RF_FLAG_SIGNALVALID != 0 {
                    radio.signal_dbm = i32::from(data[1] as i8);
                }
                if flags & BTLE_RF_FLAG_NOISEVALID != 0 {
                    radio.noise_dbm = i32::from(data[2] as i8);
                }

                let (channel, freq_khz) = monitor_channel_to_khz(data[0]);
                radio.channel = channel;
                radio.freq_khz = freq_khz;

                Some((
                    radio,
                    flags & BTLE_RF_CRC_CHECKED != 0,
                    data[BTLE_RF_HEADER_LEN..].to_vec(),
                ))
            }
        };

        let Some((radio, crc_checked_ok, decap)) = parsed else {
            packet.error = true;
            return 1;
        };

        if crc_checked_ok {
            packet.crc_ok = true;
        }

        packet.insert(PacketComponent::Radio(radio));
        packet.insert(PacketComponent::Decap(DataChunk::new(
            DLT_BLUETOOTH_LE_LL,
            decap,
        )));

        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketTime;

    fn btle_link(channel: u8, signal: i8, flags: u16, payload: &[u8]) -> Vec<u8> {
        let mut link = vec![channel, signal as u8, 0, 0];
        link.extend_from_slice(&0xAABB_CCDDu32.to_le_bytes()); // reference AA
        link.extend_from_slice(&flags.to_le_bytes());
        link.extend_from_slice(payload);
        link
    }

    fn packet_of(link: Vec<u8>) -> Packet {
        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_BTLE_RADIO,
            link,
        )));
        packet
    }

    #[test]
    fn advertising_channel_maps_to_frequency() {
        let payload = [0u8; 8];
        let mut packet = packet_of(btle_link(37, -50, BTLE_RF_FLAG_SIGNALVALID, &payload));

        assert_eq!(BtleRadioDissector::new().handle(&mut packet), 1);

        let radio = packet.radio().expect("radio");
        assert_eq!(radio.channel, "37");
        assert_eq!(radio.freq_khz, 2_402_000.0);
        assert_eq!(radio.signal_dbm, -50);

        let decap = packet.decap().expect("decap");
        assert_eq!(decap.dlt, DLT_BLUETOOTH_LE_LL);
        assert_eq!(decap.data, payload);
    }

    #[test]
    fn data_channel_frequency_mapping() {
        let payload = [0u8; 8];
        let mut packet = packet_of(btle_link(4, 0, 0, &payload));
        assert_eq!(BtleRadioDissector::new().handle(&mut packet), 1);
        assert_eq!(packet.radio().unwrap().freq_khz, 2_412_000.0);

        let mut packet = packet_of(btle_link(12, 0, 0, &payload));
        assert_eq!(BtleRadioDissector::new().handle(&mut packet), 1);
        assert_eq!(packet.radio().unwrap().freq_khz, 2_430_000.0);
    }

    #[test]
    fn checked_and_valid_crc_marks_crc_ok() {
        let payload = [0u8; 8];
        let mut packet = packet_of(btle_link(
            38,
            0,
            BTLE_RF_CRC_CHECKED | BTLE_RF_CRC_VALID,
            &payload,
        ));
        assert_eq!(BtleRadioDissector::new().handle(&mut packet), 1);
        assert!(packet.crc_ok);
        assert!(!packet.error);
    }

    #[test]
    fn checked_but_invalid_crc_errors_the_packet() {
        let payload = [0u8; 8];
        let mut packet = packet_of(btle_link(38, 0, BTLE_RF_CRC_CHECKED, &payload));
        assert_eq!(BtleRadioDissector::new().handle(&mut packet), 1);
        assert!(packet.error);
        assert!(packet.decap().is_none());
    }

    #[test]
    fn runt_frames_pass_through() {
        let mut packet = packet_of(vec![37, 0, 0, 0]);
        assert_eq!(BtleRadioDissector::new().handle(&mut packet), 1);
        assert!(packet.decap().is_none());
    }
}
