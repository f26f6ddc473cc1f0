//! Classifier-stage handler distilling dissected frames into the common
//! endpoint summary consumed by device tracking.

use crate::chain::PacketHandler;
use crate::packet::{CommonInfo, Packet, PacketComponent};

#[derive(Default)]
pub struct CommonClassifier;

impl CommonClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl PacketHandler for CommonClassifier {
    fn handle(&self, packet: &mut Packet) -> i32 {
        if packet.error {
            return 0;
        }

        let common = {
            let Some(dot11) = packet.dot11() else {
                return 0;
            };
            if dot11.corrupt {
                return 0;
            }

            let mut common = CommonInfo {
                source: dot11.source,
                dest: dot11.dest,
                network: dot11.bssid,
                ..CommonInfo::default()
            };

            if let Some(radio) = packet.radio() {
                common.channel = radio.channel.clone();
                common.freq_khz = radio.freq_khz;
            } else if let Some(channel) = dot11.channel {
                common.channel = channel.to_string();
            }

            common
        };

        packet.insert(PacketComponent::Common(common));
        1
    }
}
