//! Streaming pcap-ng writer hung off the logging chain stage.
//!
//! The writer emits a Section Header Block when the stream starts, an
//! Interface Description Block the first time each (source, DLT) pair is
//! seen, and an Enhanced Packet Block per packet with optional trailing
//! hash/packet-id options plus custom JSON and GPS options.  Blocks flow
//! into a bounded [`ChainBuf`]; a full buffer blocks the producing chain,
//! which is the rotation/backpressure signal for the consumer.

pub mod chainbuf;
pub mod layout;

pub use chainbuf::ChainBuf;

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::chain::PacketHandler;
use crate::packet::{DataChunk, Packet, PacketTime};
use crate::units::{double_to_fixed3_7, double_to_fixed6_4};

fn push_option(body: &mut Vec<u8>, code: u16, data: &[u8]) {
    body.extend_from_slice(&code.to_le_bytes());
    body.extend_from_slice(&(data.len() as u16).to_le_bytes());
    body.extend_from_slice(data);
    body.resize(body.len() + (layout::pad_to_32bit(data.len()) - data.len()), 0);
}

fn push_end_of_options(body: &mut Vec<u8>) {
    push_option(body, layout::OPT_ENDOFOPT, &[]);
}

/// Wrap a block body with the type, the length, and the trailing length
/// back-link.
fn finish_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total = (8 + body.len() + 4) as u32;
    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&block_type.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(&total.to_le_bytes());
    out
}

fn iface_key(source_id: u32, dlt: u32) -> u64 {
    let mut h1 = DefaultHasher::new();
    source_id.hash(&mut h1);
    let mut h2 = DefaultHasher::new();
    dlt.hash(&mut h2);
    h1.finish() ^ (h2.finish() << 1)
}

/// The pcap-ng stream state: the output queue, the interface-id map, and
/// the stream counters.
pub struct PcapngStream {
    chainbuf: Arc<ChainBuf>,
    iface_map: Mutex<HashMap<u64, u32>>,
    log_packets: AtomicU64,
    log_size: AtomicU64,
}

impl PcapngStream {
    pub fn new(chainbuf: Arc<ChainBuf>) -> Self {
        Self {
            chainbuf,
            iface_map: Mutex::new(HashMap::new()),
            log_packets: AtomicU64::new(0),
            log_size: AtomicU64::new(0),
        }
    }

    pub fn log_packets(&self) -> u64 {
        self.log_packets.load(Ordering::Relaxed)
    }

    pub fn log_size(&self) -> u64 {
        self.log_size.load(Ordering::Relaxed)
    }

    /// Begin (or restart) the stream: reset the interface map and emit a
    /// Section Header Block.  Returns false when the output queue is gone.
    pub fn start(&self, hardware: &str, os: &str, application: &str) -> bool {
        self.iface_map.lock().unwrap().clear();
        self.log_packets.store(0, Ordering::Relaxed);

        let mut body = Vec::new();
        body.extend_from_slice(&layout::SHB_ENDIAN_MAGIC.to_le_bytes());
        body.extend_from_slice(&layout::SHB_VERSION_MAJOR.to_le_bytes());
        body.extend_from_slice(&layout::SHB_VERSION_MINOR.to_le_bytes());
        // Unspecified section length.
        body.extend_from_slice(&(-1i64).to_le_bytes());

        if !hardware.is_empty() {
            push_option(&mut body, layout::OPT_SHB_HW, hardware.as_bytes());
        }
        if !os.is_empty() {
            push_option(&mut body, layout::OPT_SHB_OS, os.as_bytes());
        }
        if !application.is_empty() {
            push_option(&mut body, layout::OPT_SHB_USERAPPL, application.as_bytes());
        }
        push_end_of_options(&mut body);

        self.put_block(finish_block(layout::SHB_BLOCK_TYPE, &body))
    }

    /// Interface id for a (source, DLT) pair, emitting the Interface
    /// Description Block on first sight.
    pub fn interface_id(&self, source_id: u32, name: &str, description: &str, dlt: u32) -> u32 {
        let key = iface_key(source_id, dlt);

        let mut map = self.iface_map.lock().unwrap();
        if let Some(&id) = map.get(&key) {
            return id;
        }

        // Sequential position in the IDB list; entries are never removed.
        let id = map.len() as u32;
        map.insert(key, id);
        drop(map);

        let mut body = Vec::new();
        body.extend_from_slice(&(dlt as u16).to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes()); // reserved
        body.extend_from_slice(&layout::SNAPLEN.to_le_bytes());

        if !name.is_empty() {
            push_option(&mut body, layout::OPT_IDB_IFNAME, name.as_bytes());
        }
        if !description.is_empty() {
            push_option(&mut body, layout::OPT_IDB_IFDESC, description.as_bytes());
        }
        push_end_of_options(&mut body);

        self.put_block(finish_block(layout::IDB_BLOCK_TYPE, &body));
        id
    }

    /// Write one dissected packet.  `data` is the frame variant selected by
    /// the logger (full link frame or L1-only); a packet without data still
    /// logs when it carries a meta blob.
    pub fn write_packet(&self, packet: &Packet, data: Option<&DataChunk>) -> bool {
        let Some(datasrc) = packet.datasrc() else {
            return false;
        };

        let dlt = data.map(|d| d.dlt).unwrap_or(0);
        let description = if datasrc.capture_interface != datasrc.interface
            && !datasrc.capture_interface.is_empty()
        {
            format!("capture interface for {}", datasrc.interface)
        } else {
            String::new()
        };
        let interface_id =
            self.interface_id(datasrc.source_id, &datasrc.name, &description, dlt);

        let mut body = Vec::new();
        body.extend_from_slice(&interface_id.to_le_bytes());

        let conv_ts = packet.ts.as_micros();
        body.extend_from_slice(&((conv_ts >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&(conv_ts as u32).to_le_bytes());

        match data {
            Some(chunk) => {
                let original = if packet.original_len != 0 {
                    packet.original_len
                } else {
                    chunk.len() as u32
                };
                body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
                body.extend_from_slice(&original.to_le_bytes());
                body.extend_from_slice(&chunk.data);
                body.resize(
                    body.len() + (layout::pad_to_32bit(chunk.len()) - chunk.len()),
                    0,
                );
            }
            None => {
                body.extend_from_slice(&0u32.to_le_bytes());
                body.extend_from_slice(&0u32.to_le_bytes());
            }
        }

        if packet.hash != 0 {
            let mut hash_data = vec![layout::OPT_EPB_HASH_CRC32];
            hash_data.extend_from_slice(&packet.hash.to_le_bytes());
            push_option(&mut body, layout::OPT_EPB_HASH, &hash_data);
        }

        if packet.packet_no != 0 {
            push_option(
                &mut body,
                layout::OPT_EPB_PACKETID,
                &packet.packet_no.to_le_bytes(),
            );
        }

        if let Some(meta) = packet.meta() {
            // Keyed JSON entry including the type; the value is already
            // JSON, so plain formatting avoids a re-parse.
            let formatted = format!("\"{}\": {}", meta.meta_type, meta.meta_data);

            let mut custom = Vec::new();
            custom.extend_from_slice(&layout::WAVETAP_IANA_PEN.to_le_bytes());
            custom.extend_from_slice(&layout::JSON_MAGIC.to_le_bytes());
            custom.extend_from_slice(&layout::JSON_VERSION.to_le_bytes());
            custom.extend_from_slice(&(formatted.len() as u16).to_le_bytes());
            custom.extend_from_slice(formatted.as_bytes());
            push_option(&mut body, layout::OPT_CUSTOM_UTF8, &custom);
        }

        if let Some(gps) = packet.gps() {
            if gps.fix >= 2 {
                let mut fields = layout::GPS_FLAG_LON | layout::GPS_FLAG_LAT;
                let mut gps_len = 8u16;
                if gps.fix > 2 && gps.alt != 0.0 {
                    fields |= layout::GPS_FLAG_ALT;
                    gps_len += 4;
                }

                let mut custom = Vec::new();
                custom.extend_from_slice(&layout::WAVETAP_IANA_PEN.to_le_bytes());
                custom.extend_from_slice(&layout::GPS_MAGIC.to_le_bytes());
                custom.extend_from_slice(&layout::GPS_VERSION.to_le_bytes());
                custom.extend_from_slice(&gps_len.to_le_bytes());
                custom.extend_from_slice(&fields.to_le_bytes());
                custom.extend_from_slice(&double_to_fixed3_7(gps.lon).to_le_bytes());
                custom.extend_from_slice(&double_to_fixed3_7(gps.lat).to_le_bytes());
                if fields & layout::GPS_FLAG_ALT != 0 {
                    custom.extend_from_slice(&double_to_fixed6_4(gps.alt).to_le_bytes());
                }
                push_option(&mut body, layout::OPT_CUSTOM_BINARY, &custom);
            }
        }

        push_end_of_options(&mut body);

        if !self.put_block(finish_block(layout::EPB_BLOCK_TYPE, &body)) {
            return false;
        }
        self.log_packets.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Write a raw frame against an already-created interface, for callers
    /// outside the packet chain.
    pub fn write_raw_packet(
        &self,
        interface_id: u32,
        ts: PacketTime,
        data: &[u8],
        original_len: u32,
    ) -> bool {
        let mut body = Vec::new();
        body.extend_from_slice(&interface_id.to_le_bytes());

        let conv_ts = ts.as_micros();
        body.extend_from_slice(&((conv_ts >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&(conv_ts as u32).to_le_bytes());
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(&original_len.to_le_bytes());
        body.extend_from_slice(data);
        body.resize(body.len() + (layout::pad_to_32bit(data.len()) - data.len()), 0);
        push_end_of_options(&mut body);

        if !self.put_block(finish_block(layout::EPB_BLOCK_TYPE, &body)) {
            return false;
        }
        self.log_packets.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn put_block(&self, block: Vec<u8>) -> bool {
        let len = block.len() as u64;
        if !self.chainbuf.put(block) {
            return false;
        }
        self.log_size.fetch_add(len, Ordering::Relaxed);
        true
    }
}

/// Accept filter: decides whether a packet is logged at all.
pub type AcceptFilter = Box<dyn Fn(&Packet) -> bool + Send + Sync>;
/// Select filter: decides which frame variant is written.
pub type DataSelector = Box<dyn Fn(&Packet) -> Option<DataChunk> + Send + Sync>;

/// Logging-stage handler feeding a [`PcapngStream`].
pub struct PcapngLogger {
    stream: Arc<PcapngStream>,
    accept: AcceptFilter,
    select: DataSelector,
}

impl PcapngLogger {
    /// Logger with the default filters: log everything not filtered, write
    /// the raw link frame.
    pub fn new(stream: Arc<PcapngStream>) -> Self {
        Self::with_filters(
            stream,
            Box::new(|_| true),
            Box::new(|packet| packet.link_frame().cloned()),
        )
    }

    pub fn with_filters(stream: Arc<PcapngStream>, accept: AcceptFilter, select: DataSelector) -> Self {
        Self {
            stream,
            accept,
            select,
        }
    }
}

impl PacketHandler for PcapngLogger {
    fn handle(&self, packet: &mut Packet) -> i32 {
        // Upstream handlers asked for this packet to be skipped.
        if packet.filtered {
            return 1;
        }
        if !(self.accept)(packet) {
            return 1;
        }

        let data = (self.select)(packet);

        // Null or DLT-less data is only loggable alongside a meta blob.
        let has_meta = packet.meta().is_some();
        match &data {
            None if !has_meta => return 1,
            Some(chunk) if chunk.dlt == 0 && !has_meta => return 1,
            _ => {}
        }

        self.stream.write_packet(packet, data.as_ref());
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{GpsInfo, MetaBlob, PacketComponent, SourceRecord};
    use pcap_parser::traits::PcapReaderIterator;
    use pcap_parser::{Block, PcapBlockOwned, PcapNGReader};
    use std::io::Cursor;

    fn drain(chainbuf: &ChainBuf) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = chainbuf.try_take() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    fn read_blocks(stream_bytes: Vec<u8>) -> (usize, Vec<(u32, u32, u64)>) {
        let mut reader = PcapNGReader::new(65536, Cursor::new(stream_bytes)).expect("reader");
        let mut interfaces = 0usize;
        let mut packets = Vec::new();

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::NG(Block::InterfaceDescription(_)) => interfaces += 1,
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let ts =
                                (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                            packets.push((epb.if_id, epb.caplen, ts));
                        }
                        _ => {}
                    }
                    reader.consume(offset);
                }
                Err(pcap_parser::PcapError::Eof) => break,
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    reader.refill().expect("refill");
                }
                Err(err) => panic!("reference reader rejected the stream: {err:?}"),
            }
        }

        (interfaces, packets)
    }

    fn source() -> Arc<SourceRecord> {
        Arc::new(SourceRecord {
            source_id: 7,
            name: "wlan0".to_string(),
            interface: "wlan0".to_string(),
            capture_interface: "wlan0mon".to_string(),
            ..SourceRecord::default()
        })
    }

    #[test]
    fn single_packet_file_round_trips_through_a_reference_reader() {
        let chainbuf = Arc::new(ChainBuf::new(1 << 20));
        let stream = PcapngStream::new(Arc::clone(&chainbuf));

        assert!(stream.start("", "", "wavetap"));

        let mut packet = Packet::new(PacketTime::new(1_700_000_000, 1));
        packet.insert(PacketComponent::DataSrc(source()));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(105, vec![0xAB; 64])));

        let data = packet.link_frame().cloned();
        assert!(stream.write_packet(&packet, data.as_ref()));

        let (interfaces, packets) = read_blocks(drain(&chainbuf));
        assert_eq!(interfaces, 1);
        assert_eq!(packets.len(), 1);

        let (if_id, caplen, ts) = packets[0];
        assert_eq!(if_id, 0);
        assert_eq!(caplen, 64);
        assert_eq!(ts, 1_700_000_000_000_001);
    }

    #[test]
    fn every_block_repeats_its_length_at_the_tail() {
        let chainbuf = Arc::new(ChainBuf::new(1 << 20));
        let stream = PcapngStream::new(Arc::clone(&chainbuf));
        stream.start("hw", "os", "app");

        let mut packet = Packet::new(PacketTime::new(5, 0));
        packet.insert(PacketComponent::DataSrc(source()));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(105, vec![1, 2, 3])));
        let data = packet.link_frame().cloned();
        stream.write_packet(&packet, data.as_ref());

        let bytes = drain(&chainbuf);
        let mut offset = 0usize;
        let mut blocks = 0usize;
        while offset + 12 <= bytes.len() {
            let total =
                u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
            assert_eq!(total % 4, 0);
            let tail =
                u32::from_le_bytes(bytes[offset + total - 4..offset + total].try_into().unwrap());
            assert_eq!(tail as usize, total);
            offset += total;
            blocks += 1;
        }
        assert_eq!(offset, bytes.len());
        assert!(blocks >= 3);
    }

    #[test]
    fn interface_ids_are_assigned_per_source_and_dlt() {
        let chainbuf = Arc::new(ChainBuf::new(1 << 20));
        let stream = PcapngStream::new(Arc::clone(&chainbuf));
        stream.start("", "", "");

        assert_eq!(stream.interface_id(1, "a", "", 105), 0);
        assert_eq!(stream.interface_id(1, "a", "", 105), 0);
        assert_eq!(stream.interface_id(1, "a", "", 127), 1);
        assert_eq!(stream.interface_id(2, "b", "", 105), 2);

        let (interfaces, _) = read_blocks(drain(&chainbuf));
        assert_eq!(interfaces, 3);
    }

    #[test]
    fn hash_packetid_gps_and_json_options_survive_the_reference_reader() {
        let chainbuf = Arc::new(ChainBuf::new(1 << 20));
        let stream = PcapngStream::new(Arc::clone(&chainbuf));
        stream.start("", "", "wavetap");

        let mut packet = Packet::new(PacketTime::new(1_700_000_000, 42));
        packet.insert(PacketComponent::DataSrc(source()));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(105, vec![0x55; 10])));
        packet.hash = 0xDEADBEEF;
        packet.packet_no = 99;
        packet.insert(PacketComponent::Gps(GpsInfo {
            lat: 30.267_153,
            lon: -97.743_057,
            alt: 150.0,
            fix: 3,
            ..GpsInfo::default()
        }));
        packet.insert(PacketComponent::Meta(MetaBlob {
            meta_type: "sensor".to_string(),
            meta_data: serde_json::json!({"model": "acurite"}),
        }));

        let data = packet.link_frame().cloned();
        assert!(stream.write_packet(&packet, data.as_ref()));

        // The reference reader must still walk the stream and see the data.
        let (interfaces, packets) = read_blocks(drain(&chainbuf));
        assert_eq!(interfaces, 1);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1, 10);
    }

    #[test]
    fn logger_respects_the_filtered_flag() {
        let chainbuf = Arc::new(ChainBuf::new(1 << 20));
        let stream = Arc::new(PcapngStream::new(Arc::clone(&chainbuf)));
        stream.start("", "", "");
        let logger = PcapngLogger::new(Arc::clone(&stream));

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::DataSrc(source()));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(105, vec![0; 8])));
        packet.filtered = true;

        assert_eq!(logger.handle(&mut packet), 1);
        assert_eq!(stream.log_packets(), 0);

        packet.filtered = false;
        assert_eq!(logger.handle(&mut packet), 1);
        assert_eq!(stream.log_packets(), 1);
    }

    #[test]
    fn selector_chooses_the_logged_frame_variant() {
        let chainbuf = Arc::new(ChainBuf::new(1 << 20));
        let stream = Arc::new(PcapngStream::new(Arc::clone(&chainbuf)));
        stream.start("", "", "");

        // Log only the L1 prefix instead of the full frame.
        let logger = PcapngLogger::with_filters(
            Arc::clone(&stream),
            Box::new(|_| true),
            Box::new(|packet| packet.l1_data().cloned()),
        );

        let mut packet = Packet::new(PacketTime::new(1, 0));
        packet.insert(PacketComponent::DataSrc(source()));
        packet.insert(PacketComponent::LinkFrame(DataChunk::new(127, vec![0; 64])));
        packet.insert(PacketComponent::L1Data(DataChunk::new(127, vec![0; 14])));

        assert_eq!(logger.handle(&mut packet), 1);

        let (_, packets) = read_blocks(drain(&chainbuf));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1, 14);
    }
}
