//! Channel-hop scheduling for the protocol loop.
//!
//! The server configures a hop rate and a channel list; the loop arms a
//! timer at `1/rate` and advances through the list each tick.  Shuffling
//! randomizes the order, and a spacing greater than one strides across the
//! list so consecutive hops land on non-adjacent channels.  Three
//! consecutive tuning failures error the source.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use wavetap_core::proto::payloads::HopConfig;

/// Channel-control failures tolerated before the source is errored.
pub const MAX_HOP_FAILURES: u32 = 3;

pub struct ChannelHopper {
    channels: Vec<String>,
    interval: Duration,
    spacing: usize,
    index: usize,
    last_hop: Option<Instant>,
    consecutive_failures: u32,
}

impl ChannelHopper {
    /// Build a hopper from the server's configuration.  Returns `None`
    /// when the config does not describe a usable hop (no channels or a
    /// non-positive rate).
    pub fn from_config(config: &HopConfig) -> Option<Self> {
        if config.channels.is_empty() || config.rate <= 0.0 {
            return None;
        }

        let mut channels = config.channels.clone();
        if config.shuffle {
            channels.shuffle(&mut rand::thread_rng());
        }

        let spacing = (config.shuffle_spacing.max(1) as usize) % channels.len().max(1);
        let spacing = if spacing == 0 { 1 } else { spacing };

        Some(Self {
            channels,
            interval: Duration::from_secs_f64(1.0 / config.rate),
            spacing,
            index: config.offset as usize,
            last_hop: None,
            consecutive_failures: 0,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the hop timer has expired.
    pub fn due(&self, now: Instant) -> bool {
        match self.last_hop {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    /// Advance to the next channel and restart the timer.
    pub fn advance(&mut self, now: Instant) -> &str {
        self.index = (self.index + self.spacing) % self.channels.len();
        self.last_hop = Some(now);
        &self.channels[self.index]
    }

    /// Record a tuning failure.  Returns true once the failure budget is
    /// exhausted and the source should spin down.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= MAX_HOP_FAILURES
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }
}
