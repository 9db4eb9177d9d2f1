//! Switch configuration

use hashline_channel::ChannelConfig;
use hashline_dht::DEFAULT_LOOKUP_SIZE;
use serde::{Deserialize, Serialize};

/// Switch-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Peers returned by a proximity lookup when the caller passes 0
    pub lookup_size: usize,

    /// Channel timing knobs
    pub channel: ChannelConfig,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            lookup_size: DEFAULT_LOOKUP_SIZE,
            channel: ChannelConfig::default(),
        }
    }
}
