//! Prism2 / AVS monitor-header dissection.
//!
//! Two fixed layouts share this DLT: the AVS header, recognized by its
//! big-endian version magic, and the older wlan-ng prism2 header.  Both
//! carry RSSI-typed signal readings and the hardware channel.

use crate::chain::PacketHandler;
use crate::dlt::{DLT_IEEE802_11, DLT_PRISM_HEADER};
use crate::packet::{
    ChecksumInfo, ComponentKind, DataChunk, Packet, PacketComponent, PhyCarrier, PhyEncoding,
    RadioInfo, SignalType,
};
use crate::units::ieee80211_channel_to_freq;

const AVS_MAGIC: u32 = 0x8021_1001;
const AVS_HEADER_LEN: usize = 64;

const PRISM2_HEADER_LEN: usize = 144;
/// Offset of the p80211 item array past msgcode, msglen and devname.
const PRISM2_ITEMS_OFFSET: usize = 24;
const PRISM2_ITEM_LEN: usize = 12;
/// Offset of the 32-bit data word inside a p80211 item.
const PRISM2_ITEM_DATA: usize = 8;

const PRISM2_ITEM_CHANNEL: usize = 2;
const PRISM2_ITEM_SIGNAL: usize = 5;
const PRISM2_ITEM_NOISE: usize = 6;

fn avs_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn prism2_item_data(data: &[u8], item: usize) -> u32 {
    let offset = PRISM2_ITEMS_OFFSET + item * PRISM2_ITEM_LEN + PRISM2_ITEM_DATA;
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Post-capture handler converting prism2/AVS link frames.
#[derive(Default)]
pub struct Prism2Dissector;

impl Prism2Dissector {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for Prism2Dissector {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.has(ComponentKind::Decap) {
            return 1;
        }

        let fcs_bytes = packet
            .datasrc()
            .map(|src| src.fcs_bytes as usize)
            .unwrap_or(0);

        let (radio, header_len) = {
            let Some(link) = packet.link_frame() else {
                return 1;
            };
            if link.dlt != DLT_PRISM_HEADER || link.is_empty() {
                return 1;
            }
            let data = &link.data;

            if data.len() >= AVS_HEADER_LEN && avs_u32(data, 0) == AVS_MAGIC {
                let avs_len = avs_u32(data, 4) as usize;
                if avs_len > data.len() || data.len() < avs_len + fcs_bytes {
                    log::debug!("prism2 converter got corrupt AVS header length");
                    return 0;
                }

                let mut radio = RadioInfo::default();
                radio.signal_type = SignalType::Rssi;
                radio.signal_rssi = avs_u32(data, 44) as i32;
                radio.noise_rssi = avs_u32(data, 48) as i32;

                if let Some(freq) = ieee80211_channel_to_freq(avs_u32(data, 28)) {
                    radio.freq_khz = f64::from(freq) * 1000.0;
                }

                radio.carrier = match avs_u32(data, 24) {
                    1 => PhyCarrier::Ieee80211Fhss,
                    2 => PhyCarrier::Ieee80211Dsss,
                    4 | 5 => PhyCarrier::Ieee80211B,
                    6 | 7 => PhyCarrier::Ieee80211G,
                    8 => PhyCarrier::Ieee80211A,
                    _ => PhyCarrier::Unknown,
                };

                radio.encoding = match avs_u32(data, 56) {
                    1 => PhyEncoding::Cck,
                    2 => PhyEncoding::Ofdm,
                    3 => PhyEncoding::DynamicCck,
                    4 => PhyEncoding::Gfsk,
                    _ => PhyEncoding::Unknown,
                };

                radio.datarate = f64::from(avs_u32(data, 32));

                (radio, avs_len)
            } else if data.len() >= PRISM2_HEADER_LEN + fcs_bytes {
                let mut radio = RadioInfo::default();
                radio.signal_type = SignalType::Rssi;
                radio.signal_rssi = prism2_item_data(data, PRISM2_ITEM_SIGNAL) as i32;
                radio.noise_rssi = prism2_item_data(data, PRISM2_ITEM_NOISE) as i32;

                if let Some(freq) =
                    ieee80211_channel_to_freq(prism2_item_data(data, PRISM2_ITEM_CHANNEL))
                {
                    radio.freq_khz = f64::from(freq) * 1000.0;
                }

                (radio, PRISM2_HEADER_LEN)
            } else {
                log::debug!("prism2 converter saw a frame without usable prism headers");
                return 0;
            }
        };

        let link = packet.link_frame().unwrap();
        let total = link.len();
        if header_len + fcs_bytes > total {
            return 0;
        }
        let decap = link.data[header_len..total - fcs_bytes].to_vec();

        let mut fcs = None;
        if fcs_bytes > 0 && total > 4 {
            let raw: [u8; 4] = link.data[total - 4..].try_into().unwrap();
            fcs = Some(ChecksumInfo { fcs: raw, valid: true });
        }

        if let (Some(check), Some(datasrc)) = (fcs.as_mut(), packet.datasrc()) {
            if datasrc.validate_fcs {
                let crc = crc32fast::hash(&decap);
                check.valid = check.fcs == crc.to_le_bytes() || check.fcs == crc.to_be_bytes();
            }
        }

        packet.insert(PacketComponent::Radio(radio));
        packet.insert(PacketComponent::Decap(DataChunk::new(DLT_IEEE802_11, decap)));

        if let Some(check) = fcs {
            if !check.valid {
                packet.error = true;
            }
            packet.insert(PacketComponent::Checksum(check));
        }

        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketTime;

    fn avs_header(channel: u32, phytype: u32, signal: u32, noise: u32) -> Vec<u8> {
        let mut hdr = vec![0u8; AVS_HEADER_LEN];
        hdr[0..4].copy_from_slice(&AVS_MAGIC.to_be_bytes());
        hdr[4..8].copy_from_slice(&(AVS_HEADER_LEN as u32).to_be_bytes());
        hdr[24..28].copy_from_slice(&phytype.to_be_bytes());
        hdr[28..32].copy_from_slice(&channel.to_be_bytes());
        hdr[32..36].copy_from_slice(&110u32.to_be_bytes()); // datarate
        hdr[44..48].copy_from_slice(&signal.to_be_bytes());
        hdr[48..52].copy_from_slice(&noise.to_be_bytes());
        hdr
    }

    #[test]
    fn avs_header_is_recognized_and_stripped() {
        let mut link = avs_header(6, 6, 180, 40);
        link.extend_from_slice(&[0x80, 0x00, 0x00, 0x00]);

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_PRISM_HEADER,
            link,
        )));

        assert_eq!(Prism2Dissector::new().handle(&mut packet), 1);

        let radio = packet.radio().expect("radio");
        assert_eq!(radio.signal_type, SignalType::Rssi);
        assert_eq!(radio.signal_rssi, 180);
        assert_eq!(radio.noise_rssi, 40);
        assert_eq!(radio.freq_khz, 2_437_000.0);
        assert_eq!(radio.carrier, PhyCarrier::Ieee80211G);
        assert_eq!(radio.datarate, 110.0);

        let decap = packet.decap().expect("decap");
        assert_eq!(decap.dlt, DLT_IEEE802_11);
        assert_eq!(decap.data, vec![0x80, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn wlan_ng_header_is_recognized() {
        let mut link = vec![0u8; PRISM2_HEADER_LEN];
        let signal_offset =
            PRISM2_ITEMS_OFFSET + PRISM2_ITEM_SIGNAL * PRISM2_ITEM_LEN + PRISM2_ITEM_DATA;
        link[signal_offset..signal_offset + 4].copy_from_slice(&200u32.to_le_bytes());
        let chan_offset =
            PRISM2_ITEMS_OFFSET + PRISM2_ITEM_CHANNEL * PRISM2_ITEM_LEN + PRISM2_ITEM_DATA;
        link[chan_offset..chan_offset + 4].copy_from_slice(&1u32.to_le_bytes());
        link.extend_from_slice(&[0x08, 0x00, 0x00, 0x00]);

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_PRISM_HEADER,
            link,
        )));

        assert_eq!(Prism2Dissector::new().handle(&mut packet), 1);
        let radio = packet.radio().expect("radio");
        assert_eq!(radio.signal_rssi, 200);
        assert_eq!(radio.freq_khz, 2_412_000.0);
        assert_eq!(packet.decap().unwrap().data, vec![0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn runt_prism_frame_is_rejected() {
        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_PRISM_HEADER,
            vec![0u8; 32],
        )));
        assert_eq!(Prism2Dissector::new().handle(&mut packet), 0);
        assert!(packet.decap().is_none());
    }
}
