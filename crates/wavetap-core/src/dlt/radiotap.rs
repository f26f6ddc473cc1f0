//! Radiotap pseudo-header dissection.
//!
//! Walks the `present` bitmap across extension words, consuming each
//! recognized fixed-size field in order.  Field alignment is computed from
//! the start of the radiotap header, not from the previous field.  The
//! residual 802.11 frame (FCS trimmed when flagged) becomes the decap
//! component; the radiotap prefix becomes the L1 component.

use thiserror::Error;

use crate::chain::PacketHandler;
use crate::dlt::{DLT_IEEE802_11, DLT_IEEE802_11_RADIO};
use crate::packet::{
    ChecksumInfo, ComponentKind, DataChunk, Packet, PacketComponent, PhyCarrier, PhyEncoding,
    RadioInfo, SignalType,
};
use crate::units::ieee80211_freq_to_channel;

// Present-bitmap field indices.
const RT_TSFT: u32 = 0;
const RT_FLAGS: u32 = 1;
const RT_RATE: u32 = 2;
const RT_CHANNEL: u32 = 3;
const RT_FHSS: u32 = 4;
const RT_DBM_ANTSIGNAL: u32 = 5;
const RT_DBM_ANTNOISE: u32 = 6;
const RT_LOCK_QUALITY: u32 = 7;
const RT_TX_ATTENUATION: u32 = 8;
const RT_DB_TX_ATTENUATION: u32 = 9;
const RT_DBM_TX_POWER: u32 = 10;
const RT_ANTENNA: u32 = 11;
const RT_RX_FLAGS: u32 = 14;
const RT_MCS: u32 = 19;
const RT_VHT: u32 = 21;
const RT_RADIOTAP_NAMESPACE: u32 = 29;
const RT_EXT: u32 = 31;

/// FLAGS: frame includes a trailing FCS.
const RT_F_FCS: u8 = 0x10;
/// FLAGS: frame has a known-bad FCS, which may not be included.
const RT_F_BADFCS: u8 = 0x40;

// CHANNEL field flags.
const CHAN_TURBO: u16 = 0x0010;
const CHAN_CCK: u16 = 0x0020;
const CHAN_OFDM: u16 = 0x0040;
const CHAN_2GHZ: u16 = 0x0080;
const CHAN_5GHZ: u16 = 0x0100;
const CHAN_DYN: u16 = 0x0400;
const CHAN_GFSK: u16 = 0x0800;

const CHAN_FHSS: u16 = CHAN_2GHZ | CHAN_GFSK;
const CHAN_A: u16 = CHAN_5GHZ | CHAN_OFDM;
const CHAN_BPLUS: u16 = CHAN_2GHZ | CHAN_CCK | CHAN_TURBO;
const CHAN_B: u16 = CHAN_2GHZ | CHAN_CCK;
const CHAN_PUREG: u16 = CHAN_2GHZ | CHAN_OFDM;
const CHAN_G: u16 = CHAN_2GHZ | CHAN_DYN;
const CHAN_T: u16 = CHAN_5GHZ | CHAN_OFDM | CHAN_TURBO;

const HEADER_MIN: usize = 8;

#[derive(Debug, Error)]
pub enum RadiotapError {
    #[error("runt radiotap frame: {0} bytes")]
    Runt(usize),
    #[error("radiotap bitmap extends past the declared header length")]
    CorruptBitmap,
    #[error("radiotap field extends past the captured frame")]
    Truncated,
}

pub(crate) struct ParsedRadiotap {
    pub radio: RadioInfo,
    pub header_len: usize,
    pub fcs_present: bool,
    pub fcs_known_bad: bool,
}

/// Walk the radiotap header of `data`, returning the extracted radio
/// metadata and the slicing decisions for the caller.
pub(crate) fn parse_radiotap(data: &[u8]) -> Result<ParsedRadiotap, RadiotapError> {
    if data.len() < HEADER_MIN {
        return Err(RadiotapError::Runt(data.len()));
    }

    let it_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if it_len < HEADER_MIN || data.len() < it_len {
        return Err(RadiotapError::Runt(data.len()));
    }

    // Collect the present words; bit 31 chains another word.
    let mut present_words = Vec::new();
    let mut offset = 4usize;
    loop {
        if offset + 4 > it_len {
            return Err(RadiotapError::CorruptBitmap);
        }
        let word = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        present_words.push(word);
        offset += 4;
        if word & (1 << RT_EXT) == 0 {
            break;
        }
    }

    let mut radio = RadioInfo::default();
    let mut cursor = offset;
    let mut fcs_present = false;
    let mut fcs_known_bad = false;
    let mut assigned_signal = false;

    for word in &present_words {
        let mut record_antenna: Option<u8> = None;
        let mut record_signal: i32 = 0;
        let mut signal_present = false;

        'fields: for bit in 0..32u32 {
            if word & (1 << bit) == 0 {
                continue;
            }

            match bit {
                RT_FLAGS => {
                    let flags = take_u8(data, &mut cursor, it_len)?;
                    if flags & RT_F_FCS != 0 {
                        fcs_present = true;
                    }
                    if flags & RT_F_BADFCS != 0 {
                        fcs_known_bad = true;
                    }
                }
                RT_RATE => {
                    // Strip the basic-rate bit; units of 500 kb/s scaled to
                    // hundreds of kb/s.
                    let rate = take_u8(data, &mut cursor, it_len)?;
                    radio.datarate = (f64::from(rate & 0x7F) / 2.0) * 10.0;
                }
                RT_CHANNEL => {
                    align(&mut cursor, 2);
                    let freq = take_u16_le(data, &mut cursor, it_len)?;
                    let flags = take_u16_le(data, &mut cursor, it_len)?;

                    radio.freq_khz = f64::from(freq) * 1000.0;
                    if let Some(channel) = ieee80211_freq_to_channel(u32::from(freq)) {
                        radio.channel = channel.to_string();
                    }

                    radio.carrier = if flags & CHAN_FHSS == CHAN_FHSS {
                        PhyCarrier::Ieee80211Fhss
                    } else if flags & CHAN_A == CHAN_A {
                        PhyCarrier::Ieee80211A
                    } else if flags & CHAN_BPLUS == CHAN_BPLUS {
                        PhyCarrier::Ieee80211BPlus
                    } else if flags & CHAN_B == CHAN_B {
                        PhyCarrier::Ieee80211B
                    } else if flags & CHAN_PUREG == CHAN_PUREG || flags & CHAN_G == CHAN_G {
                        PhyCarrier::Ieee80211G
                    } else if flags & CHAN_T == CHAN_T {
                        PhyCarrier::Ieee80211A
                    } else {
                        PhyCarrier::Unknown
                    };

                    radio.encoding = if flags & CHAN_CCK != 0 {
                        PhyEncoding::Cck
                    } else if flags & CHAN_OFDM != 0 {
                        PhyEncoding::Ofdm
                    } else if flags & CHAN_DYN != 0 {
                        PhyEncoding::DynamicCck
                    } else if flags & CHAN_GFSK != 0 {
                        PhyEncoding::Gfsk
                    } else {
                        PhyEncoding::Unknown
                    };
                }
                RT_DBM_ANTSIGNAL => {
                    record_signal = i32::from(take_u8(data, &mut cursor, it_len)? as i8);
                    signal_present = true;
                }
                RT_DBM_ANTNOISE => {
                    radio.signal_type = SignalType::Dbm;
                    radio.noise_dbm = i32::from(take_u8(data, &mut cursor, it_len)? as i8);
                }
                RT_ANTENNA => {
                    record_antenna = Some(take_u8(data, &mut cursor, it_len)?);
                }
                RT_DBM_TX_POWER => {
                    let _ = take_u8(data, &mut cursor, it_len)?;
                }
                RT_TSFT => {
                    align(&mut cursor, 8);
                    skip(&mut cursor, 8, it_len)?;
                }
                RT_FHSS | RT_LOCK_QUALITY | RT_TX_ATTENUATION | RT_DB_TX_ATTENUATION
                | RT_RX_FLAGS => {
                    align(&mut cursor, 2);
                    skip(&mut cursor, 2, it_len)?;
                }
                RT_MCS => {
                    // Parsed for size only, not yet surfaced.
                    skip(&mut cursor, 3, it_len)?;
                }
                RT_VHT => {
                    align(&mut cursor, 2);
                    skip(&mut cursor, 12, it_len)?;
                }
                RT_RADIOTAP_NAMESPACE | RT_EXT => {}
                _ => {
                    // A field whose size we do not know; nothing after it
                    // can be located.
                    break 'fields;
                }
            }
        }

        if signal_present {
            // The first observed antenna signal becomes the packet-level
            // signal.
            if !assigned_signal {
                assigned_signal = true;
                radio.signal_type = SignalType::Dbm;
                radio.signal_dbm = record_signal;
            }

            if let Some(antenna) = record_antenna {
                radio.signal_type = SignalType::Dbm;
                radio.antenna_signals.insert(antenna, record_signal);
            }
        }
    }

    Ok(ParsedRadiotap {
        radio,
        header_len: it_len,
        fcs_present,
        fcs_known_bad,
    })
}

fn align(cursor: &mut usize, width: usize) {
    *cursor = (*cursor + width - 1) & !(width - 1);
}

fn take_u8(data: &[u8], cursor: &mut usize, limit: usize) -> Result<u8, RadiotapError> {
    if *cursor + 1 > limit || *cursor + 1 > data.len() {
        return Err(RadiotapError::Truncated);
    }
    let value = data[*cursor];
    *cursor += 1;
    Ok(value)
}

fn take_u16_le(data: &[u8], cursor: &mut usize, limit: usize) -> Result<u16, RadiotapError> {
    if *cursor + 2 > limit || *cursor + 2 > data.len() {
        return Err(RadiotapError::Truncated);
    }
    let value = u16::from_le_bytes(data[*cursor..*cursor + 2].try_into().unwrap());
    *cursor += 2;
    Ok(value)
}

fn skip(cursor: &mut usize, n: usize, limit: usize) -> Result<(), RadiotapError> {
    if *cursor + n > limit {
        return Err(RadiotapError::Truncated);
    }
    *cursor += n;
    Ok(())
}

/// Post-capture handler converting radiotap link frames into decapsulated
/// 802.11 frames with radio metadata.
#[derive(Default)]
pub struct RadiotapDissector;

impl RadiotapDissector {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for RadiotapDissector {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.has(ComponentKind::Decap) {
            return 1;
        }

        let parsed = {
            let Some(link) = packet.link_frame() else {
                return 1;
            };
            if link.dlt != DLT_IEEE802_11_RADIO || link.is_empty() {
                return 1;
            }

            match parse_radiotap(&link.data) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::debug!("radiotap converter rejected frame: {err}");
                    return 0;
                }
            }
        };

        let link = packet.link_frame().unwrap();
        let total = link.len();
        let fcs_cut = if parsed.fcs_present { 4 } else { 0 };

        if parsed.header_len + fcs_cut > total {
            log::debug!("radiotap frame too short for trailing FCS");
            return 0;
        }

        let l1 = link.data[..parsed.header_len].to_vec();
        let decap = link.data[parsed.header_len..total - fcs_cut].to_vec();

        let mut fcs = None;
        if fcs_cut > 0 && total > 4 {
            let raw: [u8; 4] = link.data[total - 4..].try_into().unwrap();
            fcs = Some(ChecksumInfo {
                fcs: raw,
                // Known bad from the flags, otherwise assumed good until
                // proven otherwise.
                valid: !parsed.fcs_known_bad,
            });
        } else if parsed.fcs_known_bad {
            // No FCS bytes to slice, but we know the frame is bad.
            fcs = Some(ChecksumInfo {
                fcs: [0xFF; 4],
                valid: false,
            });
        }

        // Radiotap only encapsulates wireless, so when the source asks for
        // validation and we hold FCS bytes, recompute the CRC locally.
        if let (Some(check), Some(datasrc)) = (fcs.as_mut(), packet.datasrc()) {
            if datasrc.validate_fcs && check.valid && fcs_cut > 0 {
                let crc = crc32fast::hash(&decap);
                // Capture tools disagree on FCS endianness; accept either.
                check.valid =
                    check.fcs == crc.to_le_bytes() || check.fcs == crc.to_be_bytes();
            }
        }

        packet.insert(PacketComponent::L1Data(DataChunk::new(
            DLT_IEEE802_11_RADIO,
            l1,
        )));
        packet.insert(PacketComponent::Radio(parsed.radio));
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
    use crate::packet::{PacketTime, SourceRecord};
    use std::sync::Arc;

    /// Radiotap header advertising flags, rate and channel.
    fn radiotap_header(flags: u8, rate: u8, freq: u16, chan_flags: u16) -> Vec<u8> {
        let mut hdr = vec![
            0x00, 0x00, // version, pad
            14, 0x00, // it_len
            0x0E, 0x00, 0x00, 0x00, // present: flags | rate | channel
        ];
        hdr.push(flags);
        hdr.push(rate);
        hdr.extend_from_slice(&freq.to_le_bytes());
        hdr.extend_from_slice(&chan_flags.to_le_bytes());
        hdr
    }

    fn beacon_body() -> Vec<u8> {
        let mut body = vec![
            0x80, 0x00, // frame control: management / beacon
            0x00, 0x00, // duration
        ];
        body.extend_from_slice(&[0xFF; 6]); // destination: broadcast
        body.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]); // source
        body.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]); // bssid
        body.extend_from_slice(&[0x00, 0x00]); // seq
        body.extend_from_slice(&[0u8; 8]); // timestamp
        body.extend_from_slice(&0x0064u16.to_le_bytes()); // beacon interval
        body.extend_from_slice(&[0x01, 0x00]); // capabilities
        body.extend_from_slice(&[0x00, 3, b'a', b'b', b'c']); // SSID tag
        body.extend_from_slice(&[0x01, 1, 0x82]); // rates tag
        body.extend_from_slice(&[0x03, 1, 6]); // DS param tag
        body
    }

    fn packet_with(link: Vec<u8>) -> Packet {
        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_IEEE802_11_RADIO,
            link,
        )));
        packet.insert(PacketComponent::DataSrc(Arc::new(SourceRecord::default())));
        packet
    }

    #[test]
    fn beacon_radio_metadata_is_extracted() {
        // flags=0, rate=2 (1 Mb/s), 2412 MHz 2GHz+CCK.
        let mut link = radiotap_header(0, 2, 2412, 0x00A0);
        link.extend_from_slice(&beacon_body());

        let mut packet = packet_with(link);
        let dissector = RadiotapDissector::new();
        assert_eq!(dissector.handle(&mut packet), 1);

        let radio = packet.radio().expect("radio info");
        assert_eq!(radio.channel, "1");
        assert_eq!(radio.freq_khz, 2_412_000.0);
        assert_eq!(radio.datarate, 10.0);
        assert_eq!(radio.carrier, PhyCarrier::Ieee80211B);
        assert_eq!(radio.encoding, PhyEncoding::Cck);

        let decap = packet.decap().expect("decap");
        assert_eq!(decap.dlt, DLT_IEEE802_11);
        assert_eq!(decap.data, beacon_body());
        assert_eq!(packet.l1_data().expect("l1").len(), 14);
        assert!(!packet.error);
    }

    #[test]
    fn fcs_flag_trims_and_validates() {
        let body = beacon_body();
        let crc = crc32fast::hash(&body);

        let mut link = radiotap_header(0x10, 2, 2412, 0x00A0);
        link.extend_from_slice(&body);
        link.extend_from_slice(&crc.to_le_bytes());

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_IEEE802_11_RADIO,
            link,
        )));
        packet.insert(PacketComponent::DataSrc(Arc::new(SourceRecord {
            validate_fcs: true,
            ..SourceRecord::default()
        })));

        assert_eq!(RadiotapDissector::new().handle(&mut packet), 1);
        assert_eq!(packet.decap().unwrap().data, body);
        assert!(packet.checksum().unwrap().valid);
        assert!(!packet.error);
    }

    #[test]
    fn corrupt_fcs_flags_the_packet() {
        let body = beacon_body();
        let mut link = radiotap_header(0x10, 2, 2412, 0x00A0);
        link.extend_from_slice(&body);
        link.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(
            DLT_IEEE802_11_RADIO,
            link,
        )));
        packet.insert(PacketComponent::DataSrc(Arc::new(SourceRecord {
            validate_fcs: true,
            ..SourceRecord::default()
        })));

        assert_eq!(RadiotapDissector::new().handle(&mut packet), 1);
        assert!(!packet.checksum().unwrap().valid);
        assert!(packet.error);
    }

    #[test]
    fn known_bad_fcs_without_bytes_still_errors() {
        let mut link = radiotap_header(0x40, 2, 2412, 0x00A0);
        link.extend_from_slice(&beacon_body());

        let mut packet = packet_with(link);
        assert_eq!(RadiotapDissector::new().handle(&mut packet), 1);
        assert!(packet.error);
        assert!(!packet.checksum().unwrap().valid);
    }

    #[test]
    fn antenna_signal_map_is_populated() {
        // present: antenna | dbm antsignal (bits 11 and 5).
        let mut link = vec![0x00, 0x00, 10, 0x00];
        link.extend_from_slice(&((1u32 << 5) | (1 << 11)).to_le_bytes());
        link.push(0xD8); // -40 dBm
        link.push(0x01); // antenna 1
        link.extend_from_slice(&beacon_body());

        let mut packet = packet_with(link);
        assert_eq!(RadiotapDissector::new().handle(&mut packet), 1);

        let radio = packet.radio().unwrap();
        assert_eq!(radio.signal_dbm, -40);
        assert_eq!(radio.signal_type, SignalType::Dbm);
        assert_eq!(radio.antenna_signals.get(&1), Some(&-40));
    }

    #[test]
    fn runt_frames_are_rejected_quietly() {
        let mut packet = packet_with(vec![0x00, 0x00, 14, 0x00]);
        assert_eq!(RadiotapDissector::new().handle(&mut packet), 0);
        assert!(packet.decap().is_none());
    }

    #[test]
    fn non_radiotap_dlt_passes_through() {
        let mut packet = Packet::new(PacketTime::default());
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(105, vec![0; 32])));
        assert_eq!(RadiotapDissector::new().handle(&mut packet), 1);
        assert!(packet.decap().is_none());
    }
}
