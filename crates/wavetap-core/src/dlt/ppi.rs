//! PPI pseudo-header dissection.
//!
//! PPI wraps the true frame in a TLV list; the 11COMMON field carries the
//! radio metadata and the GPS extension tag carries a fixed-point position
//! fix taken at capture time.

use thiserror::Error;

use crate::chain::PacketHandler;
use crate::dlt::DLT_PPI;
use crate::packet::{
    ChecksumInfo, ComponentKind, DataChunk, GpsInfo, Packet, PacketComponent, PhyCarrier,
    PhyEncoding, RadioInfo, SignalType,
};
use crate::units::{fixed3_7_to_double, fixed6_4_to_double};

const PPI_HEADER_LEN: usize = 8;
const PPI_FIELD_HEADER_LEN: usize = 4;

const PPI_FIELD_11COMMON: u16 = 2;
const PPI_FIELD_11NMAC: u16 = 3;
const PPI_FIELD_11NMACPHY: u16 = 4;
const PPI_FIELD_GPS: u16 = 30002;

const PPI_80211_FLAG_FCS: u16 = 0x0001;
const PPI_80211_FLAG_INVALFCS: u16 = 0x0004;
const PPI_80211_FLAG_PHYERROR: u16 = 0x0008;

const PPI_80211_CHFLAG_TURBO: u16 = 0x0010;
const PPI_80211_CHFLAG_CCK: u16 = 0x0020;
const PPI_80211_CHFLAG_OFDM: u16 = 0x0040;
const PPI_80211_CHFLAG_2GHZ: u16 = 0x0080;
const PPI_80211_CHFLAG_5GHZ: u16 = 0x0100;
const PPI_80211_CHFLAG_DYNAMICCCK: u16 = 0x0400;
const PPI_80211_CHFLAG_GFSK: u16 = 0x0800;

const PPI_11NMAC_HT2040: u16 = 0x0800;

const PPI_GPS_FLAG_LAT: u32 = 0x0002;
const PPI_GPS_FLAG_LON: u32 = 0x0004;
const PPI_GPS_FLAG_ALT: u32 = 0x0010;

#[derive(Debug, Error)]
pub enum PpiError {
    #[error("runt PPI frame")]
    Runt,
    #[error("invalid PPI header length")]
    BadHeaderLength,
    #[error("corrupt PPI field length")]
    BadFieldLength,
    #[error("frame flagged FCS-invalid or PHY-errored")]
    FlaggedInvalid,
}

struct ParsedPpi {
    radio: Option<RadioInfo>,
    gps: Option<GpsInfo>,
    header_len: usize,
    dlt: u32,
    apply_fcs: bool,
}

fn parse_ppi(data: &[u8]) -> Result<ParsedPpi, PpiError> {
    if data.len() < PPI_HEADER_LEN {
        return Err(PpiError::Runt);
    }

    let mut ph_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    let ppi_dlt = u32::from_le_bytes(data[4..8].try_into().unwrap());
    if ph_len > data.len() {
        return Err(PpiError::BadHeaderLength);
    }

    // Repair captures from loggers that always wrote header length 24: when
    // an 11COMMON field follows and the frame can hold it, the real header
    // is 32 bytes.
    if ph_len == 24 && data.len() > 32 {
        let datatype = u16::from_le_bytes([data[PPI_HEADER_LEN], data[PPI_HEADER_LEN + 1]]);
        if datatype == PPI_FIELD_11COMMON {
            ph_len = 32;
        }
    }

    let mut radio: Option<RadioInfo> = None;
    let mut gps: Option<GpsInfo> = None;
    let mut apply_fcs = false;

    let mut offset = PPI_HEADER_LEN;
    while offset + PPI_FIELD_HEADER_LEN <= data.len() && offset < ph_len {
        let fh_type = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let fh_len = u16::from_le_bytes([data[offset + 2], data[offset + 3]]) as usize;

        if fh_len > data.len() || fh_len > ph_len {
            return Err(PpiError::BadFieldLength);
        }

        let field_start = offset + PPI_FIELD_HEADER_LEN;
        offset = field_start + fh_len;
        if offset > data.len() {
            return Err(PpiError::BadFieldLength);
        }
        let field = &data[field_start..offset];

        match fh_type {
            PPI_FIELD_11COMMON => {
                if field.len() < 20 {
                    return Err(PpiError::BadFieldLength);
                }

                let flags = u16::from_le_bytes([field[8], field[9]]);
                if flags & PPI_80211_FLAG_INVALFCS != 0 || flags & PPI_80211_FLAG_PHYERROR != 0 {
                    return Err(PpiError::FlaggedInvalid);
                }
                if flags & PPI_80211_FLAG_FCS != 0 {
                    apply_fcs = true;
                }

                let info = radio.get_or_insert_with(RadioInfo::default);

                let chan_flags = u16::from_le_bytes([field[14], field[15]]);
                if chan_flags & PPI_80211_CHFLAG_CCK != 0 {
                    info.encoding = PhyEncoding::Cck;
                }
                if chan_flags & PPI_80211_CHFLAG_OFDM != 0 {
                    info.encoding = PhyEncoding::Ofdm;
                }
                if chan_flags & PPI_80211_CHFLAG_DYNAMICCCK != 0 {
                    info.encoding = PhyEncoding::DynamicCck;
                }
                if chan_flags & PPI_80211_CHFLAG_GFSK != 0 {
                    info.encoding = PhyEncoding::Gfsk;
                }
                if chan_flags & PPI_80211_CHFLAG_TURBO != 0 {
                    info.carrier = PhyCarrier::Ieee80211BPlus;
                }
                if chan_flags & PPI_80211_CHFLAG_OFDM != 0 && chan_flags & PPI_80211_CHFLAG_2GHZ != 0
                {
                    info.carrier = PhyCarrier::Ieee80211G;
                }
                if chan_flags & PPI_80211_CHFLAG_5GHZ != 0 {
                    info.carrier = PhyCarrier::Ieee80211A;
                }

                info.signal_type = SignalType::Dbm;
                info.signal_dbm = i32::from(field[18] as i8);
                info.noise_dbm = i32::from(field[19] as i8);

                let rate = u16::from_le_bytes([field[10], field[11]]);
                info.datarate = f64::from(rate) * 5.0;

                let freq_mhz = u16::from_le_bytes([field[12], field[13]]);
                info.freq_khz = f64::from(freq_mhz) * 1000.0;
            }
            PPI_FIELD_11NMAC | PPI_FIELD_11NMACPHY => {
                if field.len() < 2 {
                    return Err(PpiError::BadFieldLength);
                }
                let flags = u16::from_le_bytes([field[0], field[1]]);
                let info = radio.get_or_insert_with(RadioInfo::default);
                info.carrier = if flags & PPI_11NMAC_HT2040 != 0 {
                    PhyCarrier::Ieee80211N20
                } else {
                    PhyCarrier::Ieee80211N40
                };
            }
            PPI_FIELD_GPS => {
                if field.len() < 8 {
                    return Err(PpiError::BadFieldLength);
                }
                // version(1) pad(1) gps_len(2) fields_present(4) data...
                if field[0] != 0 {
                    continue;
                }
                let fields_present = u32::from_le_bytes(field[4..8].try_into().unwrap());
                let gps_data = &field[8..];
                let mut data_offt = 0usize;

                if fields_present & PPI_GPS_FLAG_LAT != 0
                    && fields_present & PPI_GPS_FLAG_LON != 0
                    && gps_data.len() >= 8
                {
                    let info = gps.get_or_insert_with(GpsInfo::default);

                    let raw_lat =
                        u32::from_le_bytes(gps_data[data_offt..data_offt + 4].try_into().unwrap());
                    info.lat = fixed3_7_to_double(raw_lat);
                    data_offt += 4;

                    let raw_lon =
                        u32::from_le_bytes(gps_data[data_offt..data_offt + 4].try_into().unwrap());
                    info.lon = fixed3_7_to_double(raw_lon);
                    data_offt += 4;

                    info.fix = 2;
                    info.alt = 0.0;

                    if fields_present & PPI_GPS_FLAG_ALT != 0 && gps_data.len() - data_offt >= 4 {
                        let raw_alt = u32::from_le_bytes(
                            gps_data[data_offt..data_offt + 4].try_into().unwrap(),
                        );
                        info.alt = fixed6_4_to_double(raw_alt);
                        info.fix = 3;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(ParsedPpi {
        radio,
        gps,
        header_len: ph_len,
        dlt: ppi_dlt,
        apply_fcs,
    })
}

/// Post-capture handler converting PPI link frames.
#[derive(Default)]
pub struct PpiDissector;

impl PpiDissector {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for PpiDissector {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.has(ComponentKind::Decap) {
            return 1;
        }

        let parsed = {
            let Some(link) = packet.link_frame() else {
                return 1;
            };
            if link.dlt != DLT_PPI || link.is_empty() {
                return 1;
            }

            match parse_ppi(&link.data) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::debug!("PPI converter rejected frame: {err}");
                    return 0;
                }
            }
        };

        let link = packet.link_frame().unwrap();
        let total = link.len();
        let fcs_cut = if parsed.apply_fcs { 4 } else { 0 };

        if parsed.header_len + fcs_cut > total {
            log::debug!("PPI frame too short for trailing FCS");
            return 0;
        }

        let decap = link.data[parsed.header_len..total - fcs_cut].to_vec();

        let mut fcs = None;
        if fcs_cut > 0 && total > 4 {
            let raw: [u8; 4] = link.data[total - 4..].try_into().unwrap();
            fcs = Some(ChecksumInfo { fcs: raw, valid: true });
        }

        if let (Some(check), Some(datasrc)) = (fcs.as_mut(), packet.datasrc()) {
            if datasrc.validate_fcs {
                let crc = crc32fast::hash(&decap);
                check.valid = check.fcs == crc.to_le_bytes() || check.fcs == crc.to_be_bytes();
            }
        }

        if let Some(radio) = parsed.radio {
            packet.insert(PacketComponent::Radio(radio));
        }
        if let Some(gps) = parsed.gps {
            packet.insert(PacketComponent::Gps(gps));
        }
        packet.insert(PacketComponent::Decap(DataChunk::new(parsed.dlt, decap)));

        if let Some(check) = fcs {
            if !check.valid {
                packet.error = true;
            }
            packet.insert(PacketComponent::Checksum(check));
        }

        1
    }
}
