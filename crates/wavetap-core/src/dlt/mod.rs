//! DLT conversion handlers for the post-capture chain stage.
//!
//! Each handler recognizes one link-layer pseudo-header (radiotap, PPI,
//! prism2/AVS, BTLE-RF), strips it, and attaches the canonical decapsulated
//! frame plus the L1 radio metadata it carried.  A packet that already has a
//! decap component passes through untouched, so the handlers can coexist on
//! the same chain.

pub mod btle;
pub mod ppi;
pub mod prism2;
pub mod radiotap;

pub use btle::BtleRadioDissector;
pub use ppi::PpiDissector;
pub use prism2::Prism2Dissector;
pub use radiotap::RadiotapDissector;

/// pcap DLT for a bare 802.11 frame.
pub const DLT_IEEE802_11: u32 = 105;
/// pcap DLT for prism2/AVS monitor headers.
pub const DLT_PRISM_HEADER: u32 = 119;
/// pcap DLT for radiotap monitor headers.
pub const DLT_IEEE802_11_RADIO: u32 = 127;
/// pcap DLT for PPI encapsulation.
pub const DLT_PPI: u32 = 192;
/// pcap DLT for the BTLE-RF monitor pseudo-header.
pub const DLT_BTLE_RADIO: u32 = 256;
/// pcap DLT for a bare Bluetooth LE link-layer frame.
pub const DLT_BLUETOOTH_LE_LL: u32 = 251;
