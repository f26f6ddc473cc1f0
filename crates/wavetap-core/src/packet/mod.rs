//! The generic packet record passed through the dissection chain.
//!
//! A packet is a bag of typed components: the raw link frame, the L1 radio
//! metadata, the decapsulated 802.11 frame, the dissected header summaries,
//! and so on.  Components are a tagged variant rather than a process-wide
//! name/id registry, so inserting and fetching are plain field accesses with
//! no startup ordering concerns.
//!
//! A handler either inserts a fully constructed component or inserts
//! nothing; partially populated components never appear on a packet.

mod components;

pub use components::{
    ChecksumInfo, CommonInfo, DataChunk, GpsInfo, MacAddr, MacAddrError, MetaBlob, PacketTime,
    PhyCarrier, PhyEncoding, PluginBlob, RadioInfo, SignalType, SourceRecord,
};

use std::sync::Arc;

use crate::dot11::Dot11Info;
use crate::ipdata::BasicDataInfo;

/// One typed component, inserted into its slot on the packet.
#[derive(Debug, Clone)]
pub enum PacketComponent {
    /// Raw captured bytes plus DLT.
    LinkFrame(DataChunk),
    /// Capture pseudo-header prefix (radiotap/PPI/...) sliced off the frame.
    L1Data(DataChunk),
    /// L1 radio metadata from the pseudo-header.
    Radio(RadioInfo),
    /// Decapsulated frame with the pseudo-header removed.
    Decap(DataChunk),
    /// Decrypted rewrite of the frame, produced by the decrypt stage.
    Mangle(DataChunk),
    /// Trailing FCS plus validation verdict.
    Checksum(ChecksumInfo),
    /// Position fix associated with the capture.
    Gps(GpsInfo),
    /// Dissected 802.11 header summary.
    Dot11(Dot11Info),
    /// Dissected data-layer (IP/UDP/...) summary.
    BasicData(BasicDataInfo),
    /// Normalized endpoint summary for classification.
    Common(CommonInfo),
    /// Originating capture source.
    DataSrc(Arc<SourceRecord>),
    /// Non-packet telemetry blob.
    Meta(MetaBlob),
    /// Opaque plugin payload.
    Plugin(PluginBlob),
}

/// Discriminant for [`PacketComponent`], used by `has`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    LinkFrame,
    L1Data,
    Radio,
    Decap,
    Mangle,
    Checksum,
    Gps,
    Dot11,
    BasicData,
    Common,
    DataSrc,
    Meta,
    Plugin,
}

/// A captured packet and everything the chain has learned about it.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub ts: PacketTime,
    /// Set when a dissector found the packet unusable; later stages skip it.
    pub error: bool,
    /// Set by a filter handler to request that logging skip this packet.
    pub filtered: bool,
    pub duplicate: bool,
    /// The capture source validated the frame CRC itself.
    pub crc_ok: bool,
    /// Optional CRC32 of the frame contents.
    pub hash: u32,
    /// Monotonic packet number, assigned by the chain.
    pub packet_no: u64,
    /// Original on-air length, which may exceed the captured length.
    pub original_len: u32,

    link_frame: Option<DataChunk>,
    l1_data: Option<DataChunk>,
    radio: Option<RadioInfo>,
    decap: Option<DataChunk>,
    mangle: Option<DataChunk>,
    checksum: Option<ChecksumInfo>,
    gps: Option<GpsInfo>,
    dot11: Option<Dot11Info>,
    basic_data: Option<BasicDataInfo>,
    common: Option<CommonInfo>,
    datasrc: Option<Arc<SourceRecord>>,
    meta: Option<MetaBlob>,
    plugins: Vec<PluginBlob>,
}

impl Packet {
    pub fn new(ts: PacketTime) -> Self {
        Self {
            ts,
            ..Self::default()
        }
    }

    /// Insert a component, replacing any previous component of the same
    /// kind.  Plugin components accumulate instead of replacing.
    pub fn insert(&mut self, component: PacketComponent) {
        match component {
            PacketComponent::LinkFrame(c) => self.link_frame = Some(c),
            PacketComponent::L1Data(c) => self.l1_data = Some(c),
            PacketComponent::Radio(c) => self.radio = Some(c),
            PacketComponent::Decap(c) => self.decap = Some(c),
            PacketComponent::Mangle(c) => self.mangle = Some(c),
            PacketComponent::Checksum(c) => self.checksum = Some(c),
            PacketComponent::Gps(c) => self.gps = Some(c),
            PacketComponent::Dot11(c) => self.dot11 = Some(c),
            PacketComponent::BasicData(c) => self.basic_data = Some(c),
            PacketComponent::Common(c) => self.common = Some(c),
            PacketComponent::DataSrc(c) => self.datasrc = Some(c),
            PacketComponent::Meta(c) => self.meta = Some(c),
            PacketComponent::Plugin(c) => self.plugins.push(c),
        }
    }

    pub fn has(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::LinkFrame => self.link_frame.is_some(),
            ComponentKind::L1Data => self.l1_data.is_some(),
            ComponentKind::Radio => self.radio.is_some(),
            ComponentKind::Decap => self.decap.is_some(),
            ComponentKind::Mangle => self.mangle.is_some(),
            ComponentKind::Checksum => self.checksum.is_some(),
            ComponentKind::Gps => self.gps.is_some(),
            ComponentKind::Dot11 => self.dot11.is_some(),
            ComponentKind::BasicData => self.basic_data.is_some(),
            ComponentKind::Common => self.common.is_some(),
            ComponentKind::DataSrc => self.datasrc.is_some(),
            ComponentKind::Meta => self.meta.is_some(),
            ComponentKind::Plugin => !self.plugins.is_empty(),
        }
    }

    pub fn link_frame(&self) -> Option<&DataChunk> {
        self.link_frame.as_ref()
    }

    pub fn l1_data(&self) -> Option<&DataChunk> {
        self.l1_data.as_ref()
    }

    pub fn radio(&self) -> Option<&RadioInfo> {
        self.radio.as_ref()
    }

    pub fn decap(&self) -> Option<&DataChunk> {
        self.decap.as_ref()
    }

    pub fn mangle(&self) -> Option<&DataChunk> {
        self.mangle.as_ref()
    }

    /// The frame the data dissectors should consume: the decrypted rewrite
    /// when present, the decapsulated frame otherwise, and the raw link
    /// frame as a last resort.
    pub fn best_frame(&self) -> Option<&DataChunk> {
        self.mangle
            .as_ref()
            .or(self.decap.as_ref())
            .or(self.link_frame.as_ref())
    }

    pub fn checksum(&self) -> Option<&ChecksumInfo> {
        self.checksum.as_ref()
    }

    pub fn gps(&self) -> Option<&GpsInfo> {
        self.gps.as_ref()
    }

    pub fn dot11(&self) -> Option<&Dot11Info> {
        self.dot11.as_ref()
    }

    pub fn dot11_mut(&mut self) -> Option<&mut Dot11Info> {
        self.dot11.as_mut()
    }

    pub fn basic_data(&self) -> Option<&BasicDataInfo> {
        self.basic_data.as_ref()
    }

    pub fn common(&self) -> Option<&CommonInfo> {
        self.common.as_ref()
    }

    pub fn datasrc(&self) -> Option<&Arc<SourceRecord>> {
        self.datasrc.as_ref()
    }

    pub fn meta(&self) -> Option<&MetaBlob> {
        self.meta.as_ref()
    }

    pub fn plugins(&self) -> &[PluginBlob] {
        &self.plugins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_same_kind() {
        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(127, vec![1])));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(105, vec![2, 3])));

        let chunk = packet.link_frame().expect("link frame");
        assert_eq!(chunk.dlt, 105);
        assert_eq!(chunk.data, vec![2, 3]);
        assert!(packet.has(ComponentKind::LinkFrame));
        assert!(!packet.has(ComponentKind::Decap));
    }

    #[test]
    fn best_frame_prefers_mangle_over_decap() {
        let mut packet = Packet::new(PacketTime::default());
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(127, vec![0])));
        assert_eq!(packet.best_frame().unwrap().dlt, 127);

        packet.insert(PacketComponent::Decap(DataChunk::new(105, vec![1])));
        assert_eq!(packet.best_frame().unwrap().dlt, 105);

        packet.insert(PacketComponent::Mangle(DataChunk::new(105, vec![2])));
        assert_eq!(packet.best_frame().unwrap().data, vec![2]);
    }
}
