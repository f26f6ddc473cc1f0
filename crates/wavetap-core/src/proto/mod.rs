//! Sequence-numbered command/response/event protocol spoken between capture
//! helpers and the server.
//!
//! The framing layer (`crate::framing`) moves opaque payloads; this module
//! gives them meaning: numeric packet types, msgpack payload bodies, and the
//! per-connection session state machine with ping/pong liveness.

pub mod error;
pub mod payloads;
pub mod session;
pub mod types;

pub use error::ProtocolError;
pub use session::{Absorbed, EventSubscriptions, HttpProxy, SeqCounter, Session, SessionState};
pub use types::{MessageSeverity, PacketType};
