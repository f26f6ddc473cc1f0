//! Signatures and offsets for the data-layer dissector.
//!
//! All offsets are relative to the start of the 802.11 payload (that is,
//! past the QoS-adjusted header).

/// LLC frames with control field U, func UI; most interesting payloads ride
/// on this header.
pub const LLC_UI_SIGNATURE: [u8; 3] = [0xAA, 0xAA, 0x03];
/// Offset of LLC-fragment protocols past the LLC UI header.
pub const LLC_UI_OFFSET: usize = 3;

/// LLC payloads that look like driver probe chatter (NetStumbler, Lucent).
pub const PROBE_LLC_SIGNATURE: [u8; 3] = [0x00, 0x60, 0x1D];

/// "Flu" of "Flurble gronk bloopit, bnip Frundletrune".
pub const NETSTUMBLER_322_SIGNATURE: [u8; 3] = [0x46, 0x6C, 0x75];
/// "All" of "All your 802.11b are belong to us".
pub const NETSTUMBLER_323_SIGNATURE: [u8; 3] = [0x41, 0x6C, 0x6C];
/// "   " of "          Intentionally blank".
pub const NETSTUMBLER_330_SIGNATURE: [u8; 3] = [0x20, 0x20, 0x20];
pub const NETSTUMBLER_OFFSET: usize = 12;

pub const LUCENT_TEST_SIGNATURE: [u8; 4] = [0x00, 0x01, 0x02, 0x03];
pub const LUCENT_OFFSET: usize = 12;

pub const FORTRESS_SIGNATURE: [u8; 5] = [0x00, 0x00, 0x00, 0x88, 0x95];

/// SNAP OUI + protocol id for Cisco CDP.
pub const CISCO_SIGNATURE: [u8; 5] = [0x00, 0x00, 0x0C, 0x20, 0x00];

pub const CDP_TLV_DEVICE_ID: u16 = 0x01;
pub const CDP_TLV_ADDRESSES: u16 = 0x02;
pub const CDP_TLV_PORT_ID: u16 = 0x03;
pub const CDP_TLV_CAPABILITIES: u16 = 0x04;
pub const CDP_TLV_SOFTWARE: u16 = 0x05;
pub const CDP_TLV_PLATFORM: u16 = 0x06;

/// EtherType position past LLC + SNAP OUI.
pub const ETHERTYPE_OFFSET: usize = 6;
pub const ETHERTYPE_IPV4: [u8; 2] = [0x08, 0x00];
pub const ETHERTYPE_ARP: [u8; 2] = [0x08, 0x06];
pub const ETHERTYPE_DOT1X: [u8; 2] = [0x88, 0x8E];

/// Start of the encapsulated protocol body past LLC + SNAP + EtherType.
pub const SNAP_PAYLOAD_OFFSET: usize = 8;

/// Sender IPv4 inside an ARP body (Ethernet/IPv4 ARP).
pub const ARP_SENDER_IP_OFFSET: usize = 14;

pub const EAP_TYPE_TLS: u8 = 13;
pub const EAP_TYPE_LEAP: u8 = 17;
pub const EAP_TYPE_TTLS: u8 = 21;
pub const EAP_TYPE_PEAP: u8 = 25;

pub const PORT_DHCP_SERVER: u16 = 67;
pub const PORT_DHCP_CLIENT: u16 = 68;
pub const PORT_NETBIOS_NS: u16 = 137;
pub const PORT_NETBIOS_DGM: u16 = 138;
pub const PORT_ISAKMP: u16 = 500;
pub const PORT_IAPP: u16 = 2313;
pub const PORT_MDNS: u16 = 5353;
pub const PORT_PPTP: u16 = 1723;

pub const DHCP_MAGIC: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
/// Fixed BOOTP header size before the magic cookie.
pub const DHCP_FIXED_LEN: usize = 236;
pub const DHCP_OPT_HOSTNAME: u8 = 12;
pub const DHCP_OPT_REQUESTED_IP: u8 = 50;
pub const DHCP_OPT_CLIENT_ID: u8 = 61;
pub const DHCP_OPT_PAD: u8 = 0;
pub const DHCP_OPT_END: u8 = 255;

/// ISAKMP exchange-type byte offset inside the ISAKMP header.
pub const ISAKMP_EXCHANGE_OFFSET: usize = 18;

pub const IAPP_VERSION: u8 = 1;
pub const IAPP_PDU_SSID: u8 = 0;
pub const IAPP_PDU_BSSID: u8 = 1;
pub const IAPP_PDU_CAPABILITY: u8 = 2;
pub const IAPP_PDU_CHANNEL: u8 = 3;
pub const IAPP_PDU_BEACONINT: u8 = 4;
pub const IAPP_CAP_WEP: u8 = 0x01;

pub const IAPP_TYPE_ANNOUNCE_REQUEST: u8 = 0;
pub const IAPP_TYPE_ANNOUNCE_RESPONSE: u8 = 1;
pub const IAPP_TYPE_HANDOVER_REQUEST: u8 = 2;
pub const IAPP_TYPE_HANDOVER_RESPONSE: u8 = 3;

/// Compression-pointer loop guard for mDNS name walks.
pub const MDNS_MAX_POINTER_JUMPS: usize = 16;
pub const MDNS_MAX_NAME_LEN: usize = 255;
