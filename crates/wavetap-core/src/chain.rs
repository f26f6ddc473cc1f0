//! Staged, priority-ordered packet dissection chain.
//!
//! Handlers register against a fixed stage sequence and run in ascending
//! priority, then registration order, within each stage.  A handler returns
//! an `i32`; a negative return marks the packet errored and aborts the
//! remaining stages (release hooks on the destroy stage still run).
//!
//! Handlers must be thread-safe: the chain executes synchronously on
//! whichever thread published the packet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::packet::Packet;

/// Chain stages, executed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChainStage {
    /// Packet creation hooks.
    Genesis,
    /// Link-layer DLT conversion (radiotap and friends into 802.11).
    PostCapture,
    /// 802.11 header and tag dissection.
    LlcDissect,
    /// WEP and plugin decryption.
    Decrypt,
    /// Higher-level data dissection (IP/UDP/DHCP/...).
    DataDissect,
    /// Device classification.
    Classifier,
    /// Device tracking.
    Tracker,
    /// Loggers; handlers here must not mutate the packet.
    Logging,
    /// Release hooks; the packet is dropped after this stage.
    Destroy,
}

impl ChainStage {
    pub const ALL: [ChainStage; 9] = [
        ChainStage::Genesis,
        ChainStage::PostCapture,
        ChainStage::LlcDissect,
        ChainStage::Decrypt,
        ChainStage::DataDissect,
        ChainStage::Classifier,
        ChainStage::Tracker,
        ChainStage::Logging,
        ChainStage::Destroy,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap()
    }
}

/// A chain participant.  Closures with the matching signature implement this
/// automatically.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, packet: &mut Packet) -> i32;
}

impl<F> PacketHandler for F
where
    F: Fn(&mut Packet) -> i32 + Send + Sync,
{
    fn handle(&self, packet: &mut Packet) -> i32 {
        self(packet)
    }
}

/// Opaque registration handle, used to remove a handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

struct Registered {
    id: u64,
    priority: i32,
    order: u64,
    handler: Arc<dyn PacketHandler>,
}

/// The chain itself: per-stage ordered handler lists plus the monotonic
/// packet counter.
pub struct PacketChain {
    stages: [Vec<Registered>; 9],
    next_id: u64,
    packet_no: AtomicU64,
}

impl Default for PacketChain {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketChain {
    pub fn new() -> Self {
        Self {
            stages: Default::default(),
            next_id: 1,
            packet_no: AtomicU64::new(1),
        }
    }

    /// Register `handler` on `stage`.  Handlers run in ascending priority;
    /// ties run in registration order.
    pub fn register_handler(
        &mut self,
        stage: ChainStage,
        priority: i32,
        handler: Arc<dyn PacketHandler>,
    ) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;

        let list = &mut self.stages[stage.index()];
        let order = list.len() as u64;
        list.push(Registered {
            id,
            priority,
            order,
            handler,
        });
        list.sort_by_key(|r| (r.priority, r.order));

        HandlerId(id)
    }

    /// Remove a previously registered handler.  Returns whether it was
    /// present on the stage.
    pub fn remove_handler(&mut self, id: HandlerId, stage: ChainStage) -> bool {
        let list = &mut self.stages[stage.index()];
        let before = list.len();
        list.retain(|r| r.id != id.0);
        list.len() != before
    }

    /// Run a packet through every stage.  Assigns `packet_no`, honors the
    /// abort-on-negative contract, and always runs the destroy stage so
    /// release hooks fire.
    pub fn process(&self, packet: &mut Packet) {
        packet.packet_no = self.packet_no.fetch_add(1, Ordering::Relaxed);

        let mut aborted = false;
        for stage in ChainStage::ALL {
            if stage == ChainStage::Destroy {
                break;
            }
            for registered in &self.stages[stage.index()] {
                if registered.handler.handle(packet) < 0 {
                    packet.error = true;
                    aborted = true;
                    break;
                }
            }
            if aborted {
                break;
            }
        }

        for registered in &self.stages[ChainStage::Destroy.index()] {
            registered.handler.handle(packet);
        }
    }
}
