//! Wavetap core: the data-source protocol and packet dissection engine for
//! wireless reconnaissance captures.
//!
//! Capture binaries speak a framed, sequence-numbered protocol back to the
//! server (`framing` + `proto`), buffered through contiguous-view ring
//! buffers (`ringbuf`).  The server side rebuilds packets from `DATA`
//! reports (`ingest`) and runs them through a staged dissection chain
//! (`chain`): DLT conversion (`dlt`), 802.11 header and tag dissection
//! plus WEP decryption (`dot11`), data-layer dissection (`ipdata`),
//! classification (`classify`), and streaming pcap-ng logging (`pcapng`).
//!
//! Parsing is byte-oriented and side-effect free; all IO lives with the
//! callers.  Chain processing is deterministic: the same handler set over
//! the same input yields the same component set.

pub mod chain;
pub mod classify;
pub mod dlt;
pub mod dot11;
pub mod framing;
pub mod ingest;
pub mod ipdata;
pub mod packet;
pub mod pcapng;
pub mod proto;
pub mod ringbuf;
pub mod sourcedef;
pub mod units;

pub use chain::{ChainStage, PacketChain, PacketHandler};
pub use framing::{Frame, FrameError};
pub use packet::{Packet, PacketComponent, PacketTime};
pub use proto::{PacketType, ProtocolError, Session};
pub use ringbuf::RingBuf;
pub use sourcedef::SourceDefinition;

use std::sync::Arc;

/// Wire a chain with the stock dissector set: DLT converters on the
/// post-capture stage, the 802.11 dissector, the WEP decryptor, the data
/// dissector, and the classifier.  Returns the decryptor so callers can
/// register keys.
pub fn build_default_chain(chain: &mut PacketChain) -> Arc<dot11::WepDecryptor> {
    chain.register_handler(
        ChainStage::PostCapture,
        0,
        Arc::new(dlt::RadiotapDissector::new()),
    );
    chain.register_handler(ChainStage::PostCapture, 0, Arc::new(dlt::PpiDissector::new()));
    chain.register_handler(
        ChainStage::PostCapture,
        0,
        Arc::new(dlt::Prism2Dissector::new()),
    );
    chain.register_handler(
        ChainStage::PostCapture,
        0,
        Arc::new(dlt::BtleRadioDissector::new()),
    );

    chain.register_handler(
        ChainStage::LlcDissect,
        -100,
        Arc::new(dot11::Dot11Dissector::new()),
    );

    let wep = Arc::new(dot11::WepDecryptor::new());
    chain.register_handler(ChainStage::Decrypt, -100, Arc::clone(&wep) as _);

    chain.register_handler(
        ChainStage::DataDissect,
        -100,
        Arc::new(ipdata::DataDissector::new()),
    );

    chain.register_handler(
        ChainStage::Classifier,
        0,
        Arc::new(classify::CommonClassifier::new()),
    );

    wep
}
