//! Channel timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MAX_RETRANSMITS, RETRANSMIT_INITIAL, RETRANSMIT_MAX, TICK_INTERVAL};

/// Timing knobs for the ack engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Period of the ack/retransmit tick
    pub tick_interval: Duration,

    /// Backoff before the first resend of a packet
    pub retransmit_initial: Duration,

    /// Ceiling the doubling backoff stops at
    pub retransmit_max: Duration,

    /// Resends of one packet before the channel fails
    pub max_retransmits: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            retransmit_initial: RETRANSMIT_INITIAL,
            retransmit_max: RETRANSMIT_MAX,
            max_retransmits: MAX_RETRANSMITS,
        }
    }
}
