//! Pcap/pcapng file replay adapter.
//!
//! Feeds a recorded capture back through the data-source protocol, either
//! as fast as the transport accepts it, at a fixed `pps=` rate, or with
//! `realtime=true` honoring the recorded inter-packet gaps.  The DLT is
//! taken from the file itself.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, PcapBlockOwned, PcapNGReader};

use wavetap_core::proto::payloads::DataReport;
use wavetap_core::sourcedef::SourceDefinition;

use crate::adapter::{CaptureAdapter, OpenOutcome};
use crate::error::CaptureError;
use crate::sink::{CaptureControl, FrameSink};

const READER_BUFFER_SIZE: usize = 65536;

/// One replayed frame.
struct ReplayEvent {
    ts_sec: u64,
    ts_usec: u32,
    dlt: u32,
    data: Vec<u8>,
    original_len: u32,
}

enum ReplayReader {
    Legacy {
        reader: LegacyPcapReader<File>,
        linktype: Option<u32>,
    },
    Ng {
        reader: PcapNGReader<File>,
        linktypes: Vec<u32>,
    },
}

fn is_pcapng_magic(magic: &[u8; 4]) -> bool {
    magic == &[0x0A, 0x0D, 0x0D, 0x0A]
}

fn create_reader(path: &Path) -> Result<ReplayReader, CaptureError> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    if is_pcapng_magic(&magic) {
        let reader = PcapNGReader::new(READER_BUFFER_SIZE, file)
            .map_err(|e| CaptureError::OpenFailed(format!("pcapng reader init: {e}")))?;
        Ok(ReplayReader::Ng {
            reader,
            linktypes: Vec::new(),
        })
    } else {
        let reader = LegacyPcapReader::new(READER_BUFFER_SIZE, file)
            .map_err(|e| CaptureError::OpenFailed(format!("pcap reader init: {e}")))?;
        Ok(ReplayReader::Legacy {
            reader,
            linktype: None,
        })
    }
}

fn next_event(reader: &mut ReplayReader) -> Result<Option<ReplayEvent>, CaptureError> {
    loop {
        match reader {
            ReplayReader::Legacy { reader, linktype } => match reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            *linktype = Some(header.network.0 as u32);
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => Some(ReplayEvent {
                            ts_sec: u64::from(packet.ts_sec),
                            ts_usec: packet.ts_usec,
                            dlt: linktype.unwrap_or(1),
                            data: packet.data.to_vec(),
                            original_len: packet.origlen,
                        }),
                        _ => None,
                    };
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return Ok(None),
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| CaptureError::Terminated(format!("pcap refill: {e}")))?;
                }
                Err(e) => {
                    return Err(CaptureError::Terminated(format!("pcap read: {e}")));
                }
            },
            ReplayReader::Ng { reader, linktypes } => match reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            linktypes.push(idb.linktype.0 as u32);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let micros =
                                (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                            Some(ReplayEvent {
                                ts_sec: micros / 1_000_000,
                                ts_usec: (micros % 1_000_000) as u32,
                                dlt: linktypes
                                    .get(epb.if_id as usize)
                                    .copied()
                                    .unwrap_or(1),
                                data: epb.data.to_vec(),
                                original_len: epb.origlen,
                            })
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return Ok(None),
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| CaptureError::Terminated(format!("pcapng refill: {e}")))?;
                }
                Err(e) => {
                    return Err(CaptureError::Terminated(format!("pcapng read: {e}")));
                }
            },
        }
    }
}

struct ReplayConfig {
    path: PathBuf,
    pps: Option<u32>,
    realtime: bool,
}

/// Replay adapter state; the config is written by `open` on the protocol
/// loop and read by `run_capture` on the capture thread.
#[derive(Default)]
pub struct PcapReplayAdapter {
    config: Mutex<Option<ReplayConfig>>,
}

impl PcapReplayAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureAdapter for PcapReplayAdapter {
    fn source_type(&self) -> &str {
        "pcapfile"
    }

    fn open(&self, definition: &SourceDefinition) -> Result<OpenOutcome, CaptureError> {
        let path = PathBuf::from(&definition.interface);

        let metadata = std::fs::metadata(&path).map_err(|_| {
            CaptureError::OpenFailed(format!("unable to find pcapfile '{}'", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(CaptureError::OpenFailed(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }

        let pps = definition.get_u32("pps")?;
        let realtime = definition.get_bool("realtime", false)?;

        // Pull the DLT out of the file headers up front so the open report
        // can announce it.
        let mut reader = create_reader(&path)?;
        let dlt = next_event(&mut reader)?
            .map(|event| event.dlt)
            .ok_or_else(|| {
                CaptureError::OpenFailed(format!(
                    "pcapfile '{}' contains no packets",
                    path.display()
                ))
            })?;

        info!("replaying pcapfile '{}' with dlt {dlt}", path.display());

        let uuid = definition
            .get("uuid")
            .map(|u| u.to_string())
            .unwrap_or_else(|| {
                use std::hash::{DefaultHasher, Hash, Hasher};
                let mut hasher = DefaultHasher::new();
                path.hash(&mut hasher);
                let h = hasher.finish();
                format!(
                    "{:08x}-0000-0000-0000-{:012x}",
                    (h >> 32) as u32,
                    h & 0xFFFF_FFFF_FFFF
                )
            });

        *self.config.lock().unwrap() = Some(ReplayConfig {
            path,
            pps,
            realtime,
        });

        Ok(OpenOutcome {
            dlt,
            uuid,
            channels: Vec::new(),
            channel: None,
            hardware: "pcapfile".to_string(),
            capture_interface: None,
        })
    }

    fn run_capture(&self, ctl: CaptureControl, sink: FrameSink) -> Result<(), CaptureError> {
        let (path, pps, realtime) = {
            let config = self.config.lock().unwrap();
            let config = config
                .as_ref()
                .ok_or_else(|| CaptureError::OpenFailed("no pcapfile opened".to_string()))?;
            (config.path.clone(), config.pps, config.realtime)
        };

        let mut reader = create_reader(&path)?;
        let mut last_ts: Option<(u64, u32)> = None;
        let mut replayed = 0u64;

        while !ctl.spindown_requested() {
            let Some(event) = next_event(&mut reader)? else {
                break;
            };

            // Pace the replay: recorded gaps in realtime mode, a fixed
            // packet rate otherwise.
            if realtime {
                if let Some((prev_sec, prev_usec)) = last_ts {
                    let prev = prev_sec as i64 * 1_000_000 + i64::from(prev_usec);
                    let cur = event.ts_sec as i64 * 1_000_000 + i64::from(event.ts_usec);
                    if cur > prev {
                        std::thread::sleep(Duration::from_micros((cur - prev) as u64));
                    }
                }
                last_ts = Some((event.ts_sec, event.ts_usec));
            } else if let Some(pps) = pps {
                std::thread::sleep(Duration::from_secs_f64(1.0 / f64::from(pps.max(1))));
            }

            let report = DataReport {
                ts_sec: event.ts_sec,
                ts_usec: event.ts_usec,
                dlt: event.dlt,
                packet: event.data,
                original_len: event.original_len,
                ..DataReport::default()
            };

            sink.send_data(&report)?;
            replayed += 1;
        }

        debug!("pcapfile replay finished after {replayed} packets");
        let _ = sink.send_message(
            wavetap_core::proto::MessageSeverity::Info,
            &format!("pcapfile replay of '{}' complete", path.display()),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{OUT_RINGBUF_SZ, OutputRing};
    use std::io::Write;
    use std::sync::Arc;
    use wavetap_core::framing::parse_next;
    use wavetap_core::proto::{PacketType, SeqCounter, payloads};

    /// Minimal legacy pcap: global header plus `count` 16-byte packets.
    fn write_legacy_pcap(path: &Path, linktype: u32, count: u32) {
        let mut out = Vec::new();
        out.extend_from_slice(&0xA1B2_C3D4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&linktype.to_le_bytes());

        for i in 0..count {
            out.extend_from_slice(&(1_700_000_000u32 + i).to_le_bytes());
            out.extend_from_slice(&(i * 10).to_le_bytes());
            out.extend_from_slice(&16u32.to_le_bytes());
            out.extend_from_slice(&64u32.to_le_bytes());
            out.extend_from_slice(&[i as u8; 16]);
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&out).unwrap();
    }

    fn replay(path: &Path, definition: &str) -> Vec<DataReport> {
        let adapter = PcapReplayAdapter::new();
        let definition = SourceDefinition::parse(definition).unwrap();
        adapter.open(&definition).unwrap();

        let ctl = CaptureControl::new();
        let out = Arc::new(OutputRing::new(OUT_RINGBUF_SZ, ctl.clone()));
        let sink = FrameSink::new(Arc::clone(&out), Arc::new(SeqCounter::new()));

        adapter.run_capture(ctl, sink).unwrap();

        let bytes = out.pending(usize::MAX);
        let mut reports = Vec::new();
        let mut offset = 0usize;
        while let Some((frame, consumed)) = parse_next(&bytes[offset..]).unwrap() {
            offset += consumed;
            if let wavetap_core::Frame::V3 {
                pkt_type, payload, ..
            } = frame
            {
                if pkt_type == PacketType::Data as u16 {
                    reports.push(payloads::decode::<DataReport>(&payload).unwrap());
                }
            }
        }
        reports
    }

    #[test]
    fn open_reports_the_file_dlt() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("capture.pcap");
        write_legacy_pcap(&path, 127, 1);

        let adapter = PcapReplayAdapter::new();
        let definition =
            SourceDefinition::parse(path.to_str().unwrap()).unwrap();
        let outcome = adapter.open(&definition).unwrap();
        assert_eq!(outcome.dlt, 127);
        assert_eq!(outcome.hardware, "pcapfile");
        assert!(!outcome.uuid.is_empty());
    }

    #[test]
    fn missing_file_fails_the_open() {
        let adapter = PcapReplayAdapter::new();
        let definition = SourceDefinition::parse("/nonexistent/file.pcap").unwrap();
        let err = adapter.open(&definition).unwrap_err();
        assert!(matches!(err, CaptureError::OpenFailed(_)));
    }

    #[test]
    fn every_packet_is_replayed_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("capture.pcap");
        write_legacy_pcap(&path, 105, 5);

        let reports = replay(&path, path.to_str().unwrap());
        assert_eq!(reports.len(), 5);

        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.dlt, 105);
            assert_eq!(report.ts_sec, 1_700_000_000 + i as u64);
            assert_eq!(report.packet, vec![i as u8; 16]);
            assert_eq!(report.original_len, 64);
        }
    }

    #[test]
    fn spindown_stops_the_replay_early() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("capture.pcap");
        write_legacy_pcap(&path, 105, 100);

        let adapter = PcapReplayAdapter::new();
        let definition = SourceDefinition::parse(path.to_str().unwrap()).unwrap();
        adapter.open(&definition).unwrap();

        let ctl = CaptureControl::new();
        ctl.spindown();
        let out = Arc::new(OutputRing::new(OUT_RINGBUF_SZ, ctl.clone()));
        let sink = FrameSink::new(Arc::clone(&out), Arc::new(SeqCounter::new()));

        adapter.run_capture(ctl, sink).unwrap();

        // No data frames, only the completion message.
        let bytes = out.pending(usize::MAX);
        let (frame, _) = parse_next(&bytes).unwrap().expect("one frame");
        match frame {
            wavetap_core::Frame::V3 { pkt_type, .. } => {
                assert_eq!(pkt_type, PacketType::Message as u16);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
