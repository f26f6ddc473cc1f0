//! 802.11 header and tagged-parameter dissection.
//!
//! The parser never fails: malformed frames come back with `corrupt` set and
//! whatever fields were recovered before the damage.  Exploit signatures
//! that fire during dissection are recorded as alerts on the result.

use std::collections::HashMap;

use super::layout;
use super::{Distribution, Dot11Info, Dot11Subtype, Dot11Type};
use crate::dot11::crypt::{self, CryptSet};
use crate::packet::MacAddr;

/// Replace unprintable bytes so hostile SSIDs cannot corrupt terminal or log
/// output.
pub fn munge_to_printable(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

fn mac_at(data: &[u8], offset: usize) -> MacAddr {
    MacAddr::from_slice(&data[offset..offset + 6]).unwrap_or_default()
}

/// Offsets of every tag's length byte, keyed by tag number, in order of
/// appearance.  Returns `None` when a tag overruns the frame.
fn tag_offsets(data: &[u8], init_offset: usize) -> Option<HashMap<u8, Vec<usize>>> {
    if init_offset >= data.len() {
        return None;
    }

    let mut map: HashMap<u8, Vec<usize>> = HashMap::new();
    let mut offset = init_offset;

    loop {
        if offset + 2 >= data.len() {
            break;
        }

        let tag = data[offset];
        let len = data[offset + 1] as usize;

        if offset + len + 2 > data.len() {
            return None;
        }

        map.entry(tag).or_default().push(offset + 1);
        offset += len + 2;
    }

    Some(map)
}

fn tag_value<'a>(data: &'a [u8], len_offset: usize) -> &'a [u8] {
    let len = data[len_offset] as usize;
    &data[len_offset + 1..len_offset + 1 + len]
}

/// Dissect one 802.11 frame.
pub fn dissect(data: &[u8]) -> Dot11Info {
    let mut info = Dot11Info::default();

    // Too small to even hold a frame control and an address.
    if data.len() < 10 {
        info.corrupt = true;
        return info;
    }

    let fc_type = (data[0] >> 2) & 0x03;
    let fc_subtype = (data[0] >> 4) & 0x0F;
    let flags = data[1];

    if flags & layout::FC_FLAG_PROTECTED != 0 {
        info.cryptset.insert(CryptSet::WEP);
    }
    info.fragmented = flags & layout::FC_FLAG_MORE_FRAGMENTS != 0;
    info.retry = flags & layout::FC_FLAG_RETRY != 0;

    let to_ds = flags & layout::FC_FLAG_TO_DS != 0;
    let from_ds = flags & layout::FC_FLAG_FROM_DS != 0;
    info.distribution = match (to_ds, from_ds) {
        (false, false) => Distribution::Adhoc,
        (false, true) => Distribution::From,
        (true, false) => Distribution::To,
        (true, true) => Distribution::Inter,
    };

    let addr0 = mac_at(data, layout::ADDR0_OFFSET);

    if fc_type == layout::FC_TYPE_PHY {
        return dissect_phy(data, fc_subtype, addr0, info);
    }

    // Everything else needs a full 24-byte header.
    if data.len() < 24 {
        info.corrupt = true;
        return info;
    }

    let addr1 = mac_at(data, layout::ADDR1_OFFSET);
    let addr2 = mac_at(data, layout::ADDR2_OFFSET);
    let sequence = u16::from_le_bytes([
        data[layout::SEQUENCE_OFFSET],
        data[layout::SEQUENCE_OFFSET + 1],
    ]);
    info.sequence_number = sequence >> 4;
    info.fragment_number = (sequence & 0x0F) as u8;

    match fc_type {
        layout::FC_TYPE_MANAGEMENT => {
            dissect_management(data, fc_subtype, addr0, addr1, addr2, info)
        }
        layout::FC_TYPE_DATA => dissect_data(data, fc_subtype, addr0, addr1, addr2, info),
        _ => {
            info.ftype = Dot11Type::Unknown;
            info
        }
    }
}

fn dissect_phy(data: &[u8], subtype: u8, addr0: MacAddr, mut info: Dot11Info) -> Dot11Info {
    info.ftype = Dot11Type::Phy;

    // Phy frames are all tiny; oversized ones are driver garbage.
    if data.len() > layout::MAX_PHY_LEN {
        info.corrupt = true;
        return info;
    }

    info.subtype = match subtype {
        10 => Dot11Subtype::PsPoll,
        11 => Dot11Subtype::Rts,
        12 => Dot11Subtype::Cts,
        13 => {
            info.dest = addr0;
            Dot11Subtype::Ack
        }
        14 => Dot11Subtype::CfEnd,
        15 => Dot11Subtype::CfEndAck,
        _ => Dot11Subtype::Unknown,
    };

    info
}

fn dissect_management(
    data: &[u8],
    subtype: u8,
    addr0: MacAddr,
    addr1: MacAddr,
    addr2: MacAddr,
    mut info: Dot11Info,
) -> Dot11Info {
    info.ftype = Dot11Type::Management;
    info.distribution = Distribution::Unknown;

    if data.len() > layout::MAX_MGMT_LEN {
        info.corrupt = true;
        return info;
    }

    info.subtype = match subtype {
        0 => Dot11Subtype::AssociationReq,
        1 => Dot11Subtype::AssociationResp,
        2 => Dot11Subtype::ReassociationReq,
        3 => Dot11Subtype::ReassociationResp,
        4 => Dot11Subtype::ProbeReq,
        5 => Dot11Subtype::ProbeResp,
        8 => Dot11Subtype::Beacon,
        9 => Dot11Subtype::Atim,
        10 => Dot11Subtype::Disassociation,
        11 => Dot11Subtype::Authentication,
        12 => Dot11Subtype::Deauthentication,
        _ => Dot11Subtype::Unknown,
    };

    match info.subtype {
        Dot11Subtype::ProbeReq => {
            info.source = addr1;
            info.bssid = addr1;
            info.distribution = Distribution::To;
        }
        _ => {
            info.dest = addr0;
            info.source = addr1;
            info.bssid = addr2;
        }
    }

    if info.subtype == Dot11Subtype::Beacon && !info.dest.is_broadcast() {
        // Beacons not sent to broadcast are corrupt.
        info.corrupt = true;
    }

    let has_fixed_params = !matches!(
        info.subtype,
        Dot11Subtype::ProbeReq
            | Dot11Subtype::Disassociation
            | Dot11Subtype::Authentication
            | Dot11Subtype::Deauthentication
    );

    if has_fixed_params {
        if data.len() < layout::TAGGED_PARAM_OFFSET {
            info.corrupt = true;
            return info;
        }
        info.header_offset = layout::TAGGED_PARAM_OFFSET;

        let fix = &data[layout::FIXED_PARAM_OFFSET..layout::TAGGED_PARAM_OFFSET];
        info.timestamp = u64::from_le_bytes(fix[0..8].try_into().unwrap());

        let capability = fix[10];
        if capability & layout::CAP_PRIVACY != 0 {
            info.cryptset.insert(CryptSet::WEP);
        }
        info.ess = capability & layout::CAP_ESS != 0;
        info.ibss = capability & layout::CAP_IBSS != 0;
        if !info.ess && info.ibss {
            info.distribution = Distribution::Adhoc;
        }
    } else {
        info.header_offset = layout::FIXED_PARAM_OFFSET;

        if matches!(
            info.subtype,
            Dot11Subtype::Disassociation
                | Dot11Subtype::Authentication
                | Dot11Subtype::Deauthentication
        ) && data.len() >= 26
        {
            info.mgmt_reason_code = u16::from_le_bytes([data[24], data[25]]);
        }
    }

    // MSF-style poisoned Broadcom beacons carry an opcode in the source MAC.
    let msf_mac = MacAddr(layout::MSF_OPCODE_MAC);
    let msf_mask = MacAddr(layout::MSF_OPCODE_MASK);
    if info.subtype == Dot11Subtype::Beacon && info.source.matches_masked(&msf_mac, &msf_mask) {
        info.alerts
            .push("MSF-style poisoned beacon packet for Broadcom drivers detected".to_string());
    }

    if matches!(
        info.subtype,
        Dot11Subtype::Beacon | Dot11Subtype::ProbeReq | Dot11Subtype::ProbeResp
    ) {
        dissect_mgmt_tags(data, &mut info);
    } else if matches!(
        info.subtype,
        Dot11Subtype::Deauthentication | Dot11Subtype::Disassociation
    ) {
        // Reason codes outside the ranges defined by the standard indicate
        // fuzzing or driver exploits.
        let code = info.mgmt_reason_code;
        if (25..=31).contains(&code) || code > 45 {
            info.alerts.push(format!(
                "unknown disconnect reason code {code:#x} from network {}",
                info.bssid
            ));
        }
    }

    info
}

fn dissect_mgmt_tags(data: &[u8], info: &mut Dot11Info) {
    if info.subtype == Dot11Subtype::Beacon {
        info.beacon_interval =
            u16::from_le_bytes([data[layout::FIXED_PARAM_OFFSET + 8], data[layout::FIXED_PARAM_OFFSET + 9]]);
    }

    let Some(tags) = tag_offsets(data, info.header_offset) else {
        info.corrupt = true;
        return;
    };

    let mut found_ssid = false;
    let mut found_rates = false;

    if let Some(offsets) = tags.get(&layout::TAG_SSID) {
        let value = tag_value(data, offsets[0]);
        found_ssid = true;
        info.ssid_len = value.len();

        if value.is_empty() {
            // Zero-length SSIDs are legitimate broadcast probes.
        } else if value.len() <= layout::MAX_SSID_LEN {
            if value.iter().all(|&b| b == 0) {
                // Cloaked: length without content.
                info.ssid_blank = true;
            } else {
                info.ssid = Some(munge_to_printable(value));
            }
        } else {
            info.alerts.push(
                "illegal SSID (greater than 32 bytes) detected, likely an exploit attempt"
                    .to_string(),
            );
            info.corrupt = true;
            return;
        }
    }

    // Probe responses without an SSID are broken.
    if info.subtype == Dot11Subtype::ProbeResp && !found_ssid {
        info.corrupt = true;
        return;
    }

    // The D-Link driver exploit hides in an oversized rate tag.
    if let Some(offsets) = tags.get(&layout::TAG_MSF_DLINK) {
        for &len_offset in offsets {
            let value = tag_value(data, len_offset);
            if value.len() >= 2 && value[0..2] == layout::MSF_DLINK_RATE_SIG {
                info.alerts.push(format!(
                    "MSF-style poisoned rate field in beacon for network {}, exploit attempt \
                     against D-Link drivers",
                    info.bssid
                ));
                info.corrupt = true;
                return;
            }
        }
    }

    for tag in [layout::TAG_RATES, layout::TAG_EXT_RATES] {
        if let Some(offsets) = tags.get(&tag) {
            found_rates = true;
            let value = tag_value(data, offsets[0]);
            for &rate in value {
                let mbit = f64::from(rate & 0x7F) * 0.5;
                if mbit > info.maxrate {
                    info.maxrate = mbit;
                }
            }
        }
    }

    // Beacons must carry both an SSID and a rate set.
    if info.subtype == Dot11Subtype::Beacon && (!found_ssid || !found_rates) {
        info.corrupt = true;
    }

    if let Some(offsets) = tags.get(&layout::TAG_DS_PARAM) {
        let value = tag_value(data, offsets[0]);
        if !value.is_empty() {
            info.channel = Some(value[0]);
        }
    }

    if let Some(offsets) = tags.get(&layout::TAG_COUNTRY) {
        let value = tag_value(data, offsets[0]);
        if value.len() < 6 {
            info.corrupt = true;
            return;
        }

        info.dot11d_country = Some(munge_to_printable(&value[0..3]));
        let mut pos = 3;
        while pos + 3 <= value.len() {
            info.dot11d_ranges.push(super::Dot11dRange {
                start_channel: value[pos],
                num_channels: value[pos + 1],
                tx_power: value[pos + 2],
            });
            pos += 3;
        }
    }

    // WPA/RSN parsing only matters once the privacy bit is set.
    if info.cryptset.contains(CryptSet::WEP) {
        if let Some(offsets) = tags.get(&layout::TAG_VENDOR) {
            for &len_offset in offsets {
                parse_wpa1_tag(tag_value(data, len_offset), info);
            }
        }

        if let Some(offsets) = tags.get(&layout::TAG_RSN) {
            for &len_offset in offsets {
                if !parse_rsn_tag(tag_value(data, len_offset), info) {
                    info.corrupt = true;
                    return;
                }
            }
        }
    }
}

/// WPA1 vendor tag: OUI + type + version, multicast suite, unicast suites,
/// auth-key suites.
fn parse_wpa1_tag(value: &[u8], info: &mut Dot11Info) {
    if value.len() < 6 {
        return;
    }
    if value[0..3] != layout::WPA_OUI {
        return;
    }

    let mut offt = 6;

    // Multicast suite.
    if offt + 4 > value.len() {
        return;
    }
    if value[offt..offt + 3] != layout::WPA_OUI {
        return;
    }
    info.cryptset.insert(crypt::cipher_conv(value[offt + 3]));

    // Skip the suite plus the unicast count.
    offt += 6;

    while offt + 4 <= value.len() && value[offt..offt + 3] == layout::WPA_OUI {
        info.cryptset.insert(crypt::cipher_conv(value[offt + 3]));
        offt += 4;
    }

    // TKIP alongside a WEP cipher is WPA migration mode.
    if info.cryptset.contains(CryptSet::TKIP)
        && (info.cryptset.contains(CryptSet::WEP40) || info.cryptset.contains(CryptSet::WEP104))
    {
        info.cryptset.insert(CryptSet::WPA_MIGMODE);
    }

    // Skip the auth-key count.
    offt += 2;
    while offt + 4 <= value.len() && value[offt..offt + 3] == layout::WPA_OUI {
        info.cryptset.insert(crypt::key_mgt_conv(value[offt + 3]));
        offt += 4;
    }
}

/// RSN (WPA2) tag: version, group cipher, pairwise suites, auth-key suites.
/// Returns false when the tag is structurally corrupt.
fn parse_rsn_tag(value: &[u8], info: &mut Dot11Info) -> bool {
    if value.len() < 6 {
        return false;
    }

    // Skip the version.
    let mut offt = 2;

    if offt + 4 > value.len() || value[offt..offt + 3] != layout::RSN_OUI {
        return false;
    }
    info.cryptset.insert(crypt::cipher_conv(value[offt + 3]));
    offt += 4;

    // Skip the pairwise count.
    offt += 2;
    while offt + 4 <= value.len() && value[offt..offt + 3] == layout::RSN_OUI {
        info.cryptset.insert(crypt::cipher_conv(value[offt + 3]));
        offt += 4;
    }

    // Skip the auth-key count.
    offt += 2;
    while offt + 4 <= value.len() && value[offt..offt + 3] == layout::RSN_OUI {
        info.cryptset.insert(crypt::key_mgt_conv(value[offt + 3]));
        offt += 4;
    }

    true
}

fn dissect_data(
    data: &[u8],
    subtype: u8,
    addr0: MacAddr,
    addr1: MacAddr,
    addr2: MacAddr,
    mut info: Dot11Info,
) -> Dot11Info {
    info.ftype = Dot11Type::Data;

    let mut qos_offset = 0usize;
    info.subtype = match subtype {
        0 => Dot11Subtype::Data,
        1 => Dot11Subtype::DataCfAck,
        2 => Dot11Subtype::DataCfPoll,
        3 => Dot11Subtype::DataCfAckPoll,
        4 => Dot11Subtype::DataNull,
        5 => Dot11Subtype::CfAck,
        6 => Dot11Subtype::CfAckPoll,
        8 => {
            qos_offset = 2;
            Dot11Subtype::QosData
        }
        9 => {
            qos_offset = 2;
            Dot11Subtype::QosDataCfAck
        }
        10 => {
            qos_offset = 2;
            Dot11Subtype::QosDataCfPoll
        }
        11 => {
            qos_offset = 2;
            Dot11Subtype::QosDataCfAckPoll
        }
        12 => {
            qos_offset = 2;
            Dot11Subtype::QosNull
        }
        14 => {
            qos_offset = 2;
            Dot11Subtype::QosCfPollNod
        }
        15 => {
            qos_offset = 2;
            Dot11Subtype::QosCfAckPoll
        }
        _ => {
            info.corrupt = true;
            info.subtype = Dot11Subtype::Unknown;
            return info;
        }
    };

    match info.distribution {
        Distribution::Adhoc => {
            info.dest = addr0;
            info.source = addr1;
            info.bssid = addr2;
            if info.bssid.is_zero() {
                info.bssid = info.source;
            }
            info.header_offset = 24 + qos_offset;
        }
        Distribution::From => {
            info.dest = addr0;
            info.bssid = addr1;
            info.source = addr2;
            info.header_offset = 24 + qos_offset;
        }
        Distribution::To => {
            info.bssid = addr0;
            info.source = addr1;
            info.dest = addr2;
            info.header_offset = 24 + qos_offset;
        }
        Distribution::Inter => {
            // WDS frames carry a fourth address.
            if data.len() < 30 {
                info.corrupt = true;
                return info;
            }
            info.bssid = addr1;
            info.source = mac_at(data, layout::ADDR3_OFFSET);
            info.dest = addr0;
            info.header_offset = 30 + qos_offset;
        }
        Distribution::Unknown => {
            info.corrupt = true;
            return info;
        }
    }

    if data.len() > info.header_offset {
        info.datasize = data.len() - info.header_offset;
    }

    info
}
