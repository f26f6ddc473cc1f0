//! 802.11 dissection: header parsing, tagged parameters, crypt detection,
//! and WEP decryption.

pub mod crypt;
pub mod layout;
pub mod parser;
pub mod wep;

pub use crypt::CryptSet;
pub use wep::WepDecryptor;

use crate::chain::PacketHandler;
use crate::dlt::DLT_IEEE802_11;
use crate::packet::{MacAddr, Packet, PacketComponent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dot11Type {
    #[default]
    Unknown,
    Management,
    /// Control frames; kept under the historical "phy" name.
    Phy,
    Data,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dot11Subtype {
    #[default]
    Unknown,
    AssociationReq,
    AssociationResp,
    ReassociationReq,
    ReassociationResp,
    ProbeReq,
    ProbeResp,
    Beacon,
    Atim,
    Disassociation,
    Authentication,
    Deauthentication,
    PsPoll,
    Rts,
    Cts,
    Ack,
    CfEnd,
    CfEndAck,
    CfAck,
    CfAckPoll,
    Data,
    DataCfAck,
    DataCfPoll,
    DataCfAckPoll,
    DataNull,
    QosData,
    QosDataCfAck,
    QosDataCfPoll,
    QosDataCfAckPoll,
    QosNull,
    QosCfPollNod,
    QosCfAckPoll,
}

impl Dot11Subtype {
    /// Subtypes whose payload carries dissectable data.
    pub fn carries_data(&self) -> bool {
        matches!(self, Dot11Subtype::Data | Dot11Subtype::QosData)
    }
}

/// Direction of travel relative to the distribution system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Distribution {
    #[default]
    Unknown,
    Adhoc,
    To,
    From,
    Inter,
}

/// One country-tag regulatory triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dot11dRange {
    pub start_channel: u8,
    pub num_channels: u8,
    pub tx_power: u8,
}

/// Everything the 802.11 dissector learned about a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dot11Info {
    pub ftype: Dot11Type,
    pub subtype: Dot11Subtype,
    pub distribution: Distribution,
    pub corrupt: bool,

    pub bssid: MacAddr,
    pub source: MacAddr,
    pub dest: MacAddr,

    pub sequence_number: u16,
    pub fragment_number: u8,
    pub fragmented: bool,
    pub retry: bool,

    pub ssid: Option<String>,
    pub ssid_blank: bool,
    pub ssid_len: usize,
    pub beacon_interval: u16,
    pub channel: Option<u8>,
    /// Highest advertised rate in Mb/s.
    pub maxrate: f64,
    pub dot11d_country: Option<String>,
    pub dot11d_ranges: Vec<Dot11dRange>,
    pub ess: bool,
    pub ibss: bool,
    pub timestamp: u64,
    pub mgmt_reason_code: u16,

    pub cryptset: CryptSet,
    pub decrypted: bool,

    /// Offset of the payload past the (QoS-adjusted) header.
    pub header_offset: usize,
    pub datasize: usize,

    /// Exploit-signature alerts raised while dissecting.
    pub alerts: Vec<String>,
}

/// LLC-dissect stage handler attaching [`Dot11Info`] to 802.11 frames.
#[derive(Default)]
pub struct Dot11Dissector;

impl Dot11Dissector {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for Dot11Dissector {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.error {
            return 0;
        }

        let info = {
            let Some(chunk) = packet.decap().or(packet.link_frame()) else {
                return 0;
            };
            if chunk.dlt != DLT_IEEE802_11 {
                return 0;
            }
            parser::dissect(&chunk.data)
        };

        for alert in &info.alerts {
            log::warn!("802.11 alert: {alert}");
        }

        let corrupt = info.corrupt;
        packet.insert(PacketComponent::Dot11(info));

        if corrupt { 0 } else { 1 }
    }
}
