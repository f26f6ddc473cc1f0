//! Data-layer dissection of decrypted 802.11 payloads.
//!
//! Recognizes LLC/SNAP-encapsulated protocols: driver probe chatter, Cisco
//! CDP, EAPOL identification, ARP, and IPv4 with the UDP/TCP port table
//! (DHCP, NetBIOS, IAPP, ISAKMP, mDNS, PPTP).  Consumes the decrypted
//! mangle frame when one exists, the decapsulated frame otherwise.

pub mod layout;

use std::net::Ipv4Addr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::chain::PacketHandler;
use crate::dlt::DLT_IEEE802_11;
use crate::dot11::parser::munge_to_printable;
use crate::dot11::{CryptSet, Dot11Type};
use crate::packet::{MacAddr, Packet, PacketComponent};

/// Recognized payload protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataProto {
    #[default]
    Unknown,
    Arp,
    Udp,
    Tcp,
    Dhcp,
    NetbiosUdp,
    Iapp,
    Isakmp,
    Mdns,
    Pptp,
    Cdp,
    NetstumblerProbe,
    LucentProbe,
    Leap,
    Tls,
    Ttls,
    Peap,
    EapUnknown,
}

/// Summary of the dissected data payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicDataInfo {
    pub proto: DataProto,

    pub ip_source: Option<Ipv4Addr>,
    pub ip_dest: Option<Ipv4Addr>,
    pub source_port: u16,
    pub dest_port: u16,

    /// WEP IV of frames that could not be decrypted.
    pub ivset: Option<[u8; 3]>,

    pub cdp_device_id: Option<String>,
    pub cdp_port_id: Option<String>,
    pub cdp_ip: Option<Ipv4Addr>,
    pub cdp_capabilities: Option<u32>,
    pub cdp_software: Option<String>,
    pub cdp_platform: Option<String>,

    pub dhcp_hostname: Option<String>,
    pub dhcp_requested_ip: Option<Ipv4Addr>,
    pub dhcp_client_mac: Option<MacAddr>,

    pub mdns_query: Option<String>,

    /// Per-protocol discriminator: NetStumbler build, EAP code, ISAKMP
    /// exchange type.
    pub field1: i64,

    /// Signature alerts raised while dissecting.
    pub alerts: Vec<String>,
}

/// Dissection side effects that land on the 802.11 summary instead of the
/// data summary.
#[derive(Debug, Clone, Default)]
struct Dot11Updates {
    cryptset: CryptSet,
    ssid: Option<String>,
    bssid: Option<MacAddr>,
    channel: Option<u8>,
    beacon_interval: Option<u16>,
}

fn starts_with_at(data: &[u8], offset: usize, sig: &[u8]) -> bool {
    data.len() > offset + sig.len() && &data[offset..offset + sig.len()] == sig
}

fn dissect_payload(payload: &[u8], dot11_source: MacAddr) -> Option<(BasicDataInfo, Dot11Updates)> {
    let mut info = BasicDataInfo::default();
    let mut updates = Dot11Updates::default();

    let llc_ui = starts_with_at(payload, 0, &layout::LLC_UI_SIGNATURE);

    if llc_ui && starts_with_at(payload, layout::LLC_UI_OFFSET, &layout::PROBE_LLC_SIGNATURE) {
        if starts_with_at(
            payload,
            layout::NETSTUMBLER_OFFSET,
            &layout::NETSTUMBLER_322_SIGNATURE,
        ) {
            info.alerts.push("detected NetStumbler 3.22 probe".to_string());
            info.proto = DataProto::NetstumblerProbe;
            info.field1 = 322;
            return Some((info, updates));
        }
        if starts_with_at(
            payload,
            layout::NETSTUMBLER_OFFSET,
            &layout::NETSTUMBLER_323_SIGNATURE,
        ) {
            info.alerts.push("detected NetStumbler 3.23 probe".to_string());
            info.proto = DataProto::NetstumblerProbe;
            info.field1 = 323;
            return Some((info, updates));
        }
        if starts_with_at(
            payload,
            layout::NETSTUMBLER_OFFSET,
            &layout::NETSTUMBLER_330_SIGNATURE,
        ) {
            info.alerts.push("detected NetStumbler 3.30 probe".to_string());
            info.proto = DataProto::NetstumblerProbe;
            info.field1 = 330;
            return Some((info, updates));
        }
        if starts_with_at(payload, layout::LUCENT_OFFSET, &layout::LUCENT_TEST_SIGNATURE) {
            info.alerts.push("detected Lucent probe/link test".to_string());
            info.proto = DataProto::LucentProbe;
            return Some((info, updates));
        }

        info.alerts.push(
            "detected what looks like a NetStumbler probe without a known version fingerprint"
                .to_string(),
        );
        info.proto = DataProto::NetstumblerProbe;
        info.field1 = -1;
        // Fall through: something else may still match better.
    }

    if starts_with_at(payload, layout::LLC_UI_OFFSET, &layout::FORTRESS_SIGNATURE) {
        updates.cryptset.insert(CryptSet::FORTRESS);
    }

    if starts_with_at(payload, layout::LLC_UI_OFFSET, &layout::CISCO_SIGNATURE) {
        match dissect_cdp(payload) {
            CdpResult::Dissected(cdp) => return Some((cdp, updates)),
            CdpResult::Corrupt => return None,
            CdpResult::Nothing => {}
        }
    }

    if llc_ui && starts_with_at(payload, layout::ETHERTYPE_OFFSET, &layout::ETHERTYPE_DOT1X) {
        return dissect_dot1x(payload, info, updates);
    }

    if llc_ui && starts_with_at(payload, layout::ETHERTYPE_OFFSET, &layout::ETHERTYPE_ARP) {
        let arp = &payload[layout::SNAP_PAYLOAD_OFFSET..];
        if arp.len() >= layout::ARP_SENDER_IP_OFFSET + 4 {
            let ip: [u8; 4] = arp[layout::ARP_SENDER_IP_OFFSET..layout::ARP_SENDER_IP_OFFSET + 4]
                .try_into()
                .unwrap();
            info.proto = DataProto::Arp;
            info.ip_source = Some(Ipv4Addr::from(ip));
            return Some((info, updates));
        }
    }

    if llc_ui && starts_with_at(payload, layout::ETHERTYPE_OFFSET, &layout::ETHERTYPE_IPV4) {
        return dissect_ipv4(
            &payload[layout::SNAP_PAYLOAD_OFFSET..],
            dot11_source,
            info,
            updates,
        );
    }

    if info.proto != DataProto::Unknown {
        return Some((info, updates));
    }

    None
}

enum CdpResult {
    Dissected(BasicDataInfo),
    Corrupt,
    Nothing,
}

fn dissect_cdp(payload: &[u8]) -> CdpResult {
    // Version 2 frames carry a 4-byte prologue after the signature; older
    // frames put the elements further out.
    let version_offset = layout::LLC_UI_OFFSET + layout::CISCO_SIGNATURE.len();
    let mut offset = if payload.get(version_offset) == Some(&2) {
        version_offset + 4
    } else {
        layout::LLC_UI_OFFSET + 12
    };

    let mut out = BasicDataInfo::default();
    let mut got_info = false;

    while offset + 5 < payload.len() {
        let elem_type = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        let elem_len = u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]) as usize;

        if elem_len == 0 || offset + elem_len >= payload.len() {
            break;
        }

        let value = &payload[offset + 4..offset + elem_len];
        match elem_type {
            layout::CDP_TLV_DEVICE_ID => {
                if value.is_empty() {
                    log::warn!("corrupt CDP frame (possibly an exploit attempt), discarded");
                    return CdpResult::Corrupt;
                }
                out.cdp_device_id = Some(munge_to_printable(value));
                got_info = true;
            }
            layout::CDP_TLV_PORT_ID => {
                if value.is_empty() {
                    log::warn!("corrupt CDP frame (possibly an exploit attempt), discarded");
                    return CdpResult::Corrupt;
                }
                out.cdp_port_id = Some(munge_to_printable(value));
                got_info = true;
            }
            layout::CDP_TLV_ADDRESSES => {
                // count(4) proto-type(1) proto-len(1) proto(n) addr-len(2) addr.
                if value.len() >= 6 {
                    let proto_len = value[5] as usize;
                    let addr_len_at = 6 + proto_len;
                    if value.len() >= addr_len_at + 2 {
                        let addr_len = u16::from_be_bytes([value[addr_len_at], value[addr_len_at + 1]])
                            as usize;
                        let addr_at = addr_len_at + 2;
                        if addr_len == 4 && value.len() >= addr_at + 4 {
                            let ip: [u8; 4] = value[addr_at..addr_at + 4].try_into().unwrap();
                            out.cdp_ip = Some(Ipv4Addr::from(ip));
                            got_info = true;
                        }
                    }
                }
            }
            layout::CDP_TLV_CAPABILITIES => {
                if value.len() >= 4 {
                    out.cdp_capabilities =
                        Some(u32::from_be_bytes(value[0..4].try_into().unwrap()));
                    got_info = true;
                }
            }
            layout::CDP_TLV_SOFTWARE => {
                out.cdp_software = Some(munge_to_printable(value));
                got_info = true;
            }
            layout::CDP_TLV_PLATFORM => {
                out.cdp_platform = Some(munge_to_printable(value));
                got_info = true;
            }
            _ => {}
        }

        offset += elem_len;
    }

    if got_info {
        out.proto = DataProto::Cdp;
        CdpResult::Dissected(out)
    } else {
        CdpResult::Nothing
    }
}

fn dissect_dot1x(
    payload: &[u8],
    mut info: BasicDataInfo,
    mut updates: Dot11Updates,
) -> Option<(BasicDataInfo, Dot11Updates)> {
    // dot1x header: version(1) type(1) length(2), then EAP.
    let dot1x = &payload[layout::SNAP_PAYLOAD_OFFSET..];
    if dot1x.len() < 4 {
        return None;
    }

    let version = dot1x[0];
    let frame_type = dot1x[1];
    // Only EAP-packet frames carry a method we can identify.
    if version != 1 || frame_type != 0 {
        return None;
    }

    // EAP: code(1) id(1) length(2) type(1).
    let eap = &dot1x[4..];
    if eap.len() < 5 {
        return None;
    }

    let eap_code = eap[0];
    let eap_type = eap[4];

    info.field1 = i64::from(eap_code);
    match eap_type {
        layout::EAP_TYPE_LEAP => {
            info.proto = DataProto::Leap;
            updates.cryptset.insert(CryptSet::LEAP);
        }
        layout::EAP_TYPE_TLS => {
            info.proto = DataProto::Tls;
            updates.cryptset.insert(CryptSet::TLS);
        }
        layout::EAP_TYPE_TTLS => {
            info.proto = DataProto::Ttls;
            updates.cryptset.insert(CryptSet::TTLS);
        }
        layout::EAP_TYPE_PEAP => {
            info.proto = DataProto::Peap;
            updates.cryptset.insert(CryptSet::PEAP);
        }
        _ => {
            info.proto = DataProto::EapUnknown;
            updates.cryptset.insert(CryptSet::EAP_UNKNOWN);
        }
    }

    Some((info, updates))
}

fn dissect_ipv4(
    ip_data: &[u8],
    dot11_source: MacAddr,
    mut info: BasicDataInfo,
    mut updates: Dot11Updates,
) -> Option<(BasicDataInfo, Dot11Updates)> {
    let sliced = SlicedPacket::from_ip(ip_data).ok()?;

    let net = sliced.net?;
    let NetSlice::Ipv4(ref ipv4) = net else {
        return None;
    };
    info.ip_source = Some(ipv4.header().source_addr());
    info.ip_dest = Some(ipv4.header().destination_addr());

    match sliced.transport {
        Some(TransportSlice::Udp(udp)) => {
            info.source_port = udp.source_port();
            info.dest_port = udp.destination_port();

            let ip_payload = net.ip_payload_ref()?.payload;
            // Skip the 8-byte UDP header.
            let udp_payload = ip_payload.get(8..)?;

            dissect_udp_payload(udp_payload, dot11_source, info, updates)
        }
        Some(TransportSlice::Tcp(tcp)) => {
            info.source_port = tcp.source_port();
            info.dest_port = tcp.destination_port();
            info.proto = DataProto::Tcp;

            if info.source_port == layout::PORT_PPTP || info.dest_port == layout::PORT_PPTP {
                info.proto = DataProto::Pptp;
                updates.cryptset.insert(CryptSet::PPTP);
            }

            Some((info, updates))
        }
        _ => Some((info, updates)),
    }
}

fn dissect_udp_payload(
    udp_payload: &[u8],
    dot11_source: MacAddr,
    mut info: BasicDataInfo,
    mut updates: Dot11Updates,
) -> Option<(BasicDataInfo, Dot11Updates)> {
    info.proto = DataProto::Udp;

    let sport = info.source_port;
    let dport = info.dest_port;

    if (sport == layout::PORT_DHCP_SERVER || sport == layout::PORT_DHCP_CLIENT)
        && (dport == layout::PORT_DHCP_SERVER || dport == layout::PORT_DHCP_CLIENT)
    {
        dissect_dhcp(udp_payload, dot11_source, &mut info);
    } else if sport == layout::PORT_IAPP && dport == layout::PORT_IAPP {
        dissect_iapp(udp_payload, &mut info, &mut updates);
    } else if sport == layout::PORT_ISAKMP || dport == layout::PORT_ISAKMP {
        if udp_payload.len() > layout::ISAKMP_EXCHANGE_OFFSET {
            info.proto = DataProto::Isakmp;
            info.field1 = i64::from(udp_payload[layout::ISAKMP_EXCHANGE_OFFSET]);
            updates.cryptset.insert(CryptSet::ISAKMP);
        }
    } else if sport == layout::PORT_MDNS || dport == layout::PORT_MDNS {
        dissect_mdns(udp_payload, &mut info);
    } else if sport == layout::PORT_NETBIOS_NS
        || dport == layout::PORT_NETBIOS_NS
        || sport == layout::PORT_NETBIOS_DGM
        || dport == layout::PORT_NETBIOS_DGM
    {
        info.proto = DataProto::NetbiosUdp;
    }

    Some((info, updates))
}

fn dissect_dhcp(payload: &[u8], dot11_source: MacAddr, info: &mut BasicDataInfo) {
    if payload.len() < layout::DHCP_FIXED_LEN + 4 {
        return;
    }
    if payload[layout::DHCP_FIXED_LEN..layout::DHCP_FIXED_LEN + 4] != layout::DHCP_MAGIC {
        return;
    }

    info.proto = DataProto::Dhcp;

    let mut offset = layout::DHCP_FIXED_LEN + 4;
    while offset < payload.len() {
        let code = payload[offset];
        if code == layout::DHCP_OPT_PAD {
            offset += 1;
            continue;
        }
        if code == layout::DHCP_OPT_END {
            break;
        }
        if offset + 2 > payload.len() {
            break;
        }

        let len = payload[offset + 1] as usize;
        if offset + 2 + len > payload.len() {
            break;
        }
        let value = &payload[offset + 2..offset + 2 + len];

        match code {
            layout::DHCP_OPT_HOSTNAME => {
                info.dhcp_hostname = Some(munge_to_printable(value));
            }
            layout::DHCP_OPT_REQUESTED_IP => {
                if len == 4 {
                    let ip: [u8; 4] = value.try_into().unwrap();
                    info.dhcp_requested_ip = Some(Ipv4Addr::from(ip));
                }
            }
            layout::DHCP_OPT_CLIENT_ID => {
                // Hardware type 1 (Ethernet) plus a MAC.
                if len == 7 && value[0] == 1 {
                    let mac = MacAddr::from_slice(&value[1..7]).unwrap_or_default();
                    info.dhcp_client_mac = Some(mac);
                    if mac != dot11_source {
                        info.alerts.push(format!(
                            "DHCP client id {mac} does not match frame source {dot11_source}, \
                             possible spoofing"
                        ));
                    }
                }
            }
            _ => {}
        }

        offset += 2 + len;
    }
}

fn dissect_iapp(payload: &[u8], info: &mut BasicDataInfo, updates: &mut Dot11Updates) {
    if payload.len() < 2 {
        return;
    }

    let version = payload[0];
    let iapp_type = payload[1];

    // Unknown version or message type: keep the UDP summary we have.
    if version != layout::IAPP_VERSION {
        return;
    }
    if !matches!(
        iapp_type,
        layout::IAPP_TYPE_ANNOUNCE_REQUEST
            | layout::IAPP_TYPE_ANNOUNCE_RESPONSE
            | layout::IAPP_TYPE_HANDOVER_REQUEST
            | layout::IAPP_TYPE_HANDOVER_RESPONSE
    ) {
        return;
    }

    // PDUs: type(1) length(1) reserved(1) data.
    let mut offset = 2usize;
    while offset + 3 < payload.len() {
        let pdu_type = payload[offset];
        let pdu_len = payload[offset + 1] as usize;

        if offset + 3 + pdu_len > payload.len() {
            return;
        }
        let value = &payload[offset + 3..offset + 3 + pdu_len];

        match pdu_type {
            layout::IAPP_PDU_SSID => {
                if value.len() <= 32 {
                    updates.ssid = Some(munge_to_printable(value));
                }
            }
            layout::IAPP_PDU_BSSID => {
                if value.len() == 6 {
                    updates.bssid = MacAddr::from_slice(value);
                }
            }
            layout::IAPP_PDU_CAPABILITY => {
                if value.len() == 1 && value[0] & layout::IAPP_CAP_WEP != 0 {
                    updates.cryptset.insert(CryptSet::WEP);
                }
            }
            layout::IAPP_PDU_CHANNEL => {
                if value.len() == 1 {
                    updates.channel = Some(value[0]);
                }
            }
            layout::IAPP_PDU_BEACONINT => {
                if value.len() == 2 {
                    updates.beacon_interval = Some(u16::from_be_bytes([value[0], value[1]]));
                }
            }
            _ => {}
        }

        offset += 3 + pdu_len;
    }

    info.proto = DataProto::Iapp;
}

/// Walk a DNS name starting at `offset`, following compression pointers
/// with a loop guard.  Returns the name and the offset just past it in the
/// original record.
fn mdns_name(payload: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut jumps = 0usize;
    let mut end_offset = None;

    loop {
        let len = *payload.get(offset)? as usize;

        if len == 0 {
            offset += 1;
            break;
        }

        if len & 0xC0 == 0xC0 {
            // Compression pointer.
            let low = *payload.get(offset + 1)? as usize;
            let target = ((len & 0x3F) << 8) | low;

            if end_offset.is_none() {
                end_offset = Some(offset + 2);
            }

            jumps += 1;
            if jumps > layout::MDNS_MAX_POINTER_JUMPS {
                return None;
            }

            offset = target;
            continue;
        }

        let label = payload.get(offset + 1..offset + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&munge_to_printable(label));
        if name.len() > layout::MDNS_MAX_NAME_LEN {
            return None;
        }

        offset += 1 + len;
    }

    Some((name, end_offset.unwrap_or(offset)))
}

fn dissect_mdns(payload: &[u8], info: &mut BasicDataInfo) {
    // id(2) flags(2) qdcount(2) ancount(2) nscount(2) arcount(2).
    if payload.len() < 12 {
        return;
    }

    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    let ancount = u16::from_be_bytes([payload[6], payload[7]]);

    let mut offset = 12usize;
    let mut first_name = None;

    for _ in 0..qdcount {
        let Some((name, next)) = mdns_name(payload, offset) else {
            return;
        };
        // name + qtype(2) + qclass(2).
        offset = next + 4;
        if offset > payload.len() {
            return;
        }
        if first_name.is_none() && !name.is_empty() {
            first_name = Some(name);
        }
    }

    for _ in 0..ancount {
        let Some((name, next)) = mdns_name(payload, offset) else {
            break;
        };
        // name + type(2) + class(2) + ttl(4) + rdlength(2) + rdata.
        if next + 10 > payload.len() {
            break;
        }
        let rdlength = u16::from_be_bytes([payload[next + 8], payload[next + 9]]) as usize;
        offset = next + 10 + rdlength;
        if offset > payload.len() {
            break;
        }
        if first_name.is_none() && !name.is_empty() {
            first_name = Some(name);
        }
    }

    info.proto = DataProto::Mdns;
    info.mdns_query = first_name;
}

/// Data-dissect stage handler.
#[derive(Default)]
pub struct DataDissector;

impl DataDissector {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for DataDissector {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.error {
            return 0;
        }

        let (source, header_offset, encrypted) = {
            let Some(info) = packet.dot11() else {
                return 0;
            };
            if info.corrupt || info.ftype != Dot11Type::Data || !info.subtype.carries_data() {
                return 0;
            }
            (
                info.source,
                info.header_offset,
                !info.cryptset.is_empty() && !info.decrypted,
            )
        };

        let dissected = {
            let Some(chunk) = packet.best_frame() else {
                return 0;
            };
            if chunk.dlt != DLT_IEEE802_11 || chunk.len() < header_offset {
                return 0;
            }
            let payload = &chunk.data[header_offset..];

            if encrypted {
                // Surface encrypted traffic with its IV so consumers can
                // still count it.
                if payload.len() < 3 {
                    return 0;
                }
                let mut info = BasicDataInfo::default();
                info.ivset = Some(payload[0..3].try_into().unwrap());
                Some((info, Dot11Updates::default()))
            } else {
                dissect_payload(payload, source)
            }
        };

        let Some((info, updates)) = dissected else {
            return 0;
        };

        for alert in &info.alerts {
            log::warn!("data-layer alert: {alert}");
        }

        packet.insert(PacketComponent::BasicData(info));

        if let Some(dot11) = packet.dot11_mut() {
            dot11.cryptset.insert(updates.cryptset);
            if let Some(ssid) = updates.ssid {
                dot11.ssid = Some(ssid);
            }
            if let Some(bssid) = updates.bssid {
                dot11.bssid = bssid;
            }
            if let Some(channel) = updates.channel {
                dot11.channel = Some(channel);
            }
            if let Some(interval) = updates.beacon_interval {
                dot11.beacon_interval = interval;
            }
        }

        1
    }
}
