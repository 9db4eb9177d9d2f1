//! Hashline channel layer
//!
//! Multiplexes reliable, ordered, typed application channels over the
//! encrypted line to a peer. A channel owns a bounded send window, a
//! reassembly receive buffer, and an ack engine driving cumulative plus
//! selective acknowledgement with retransmission.
//!
//! The line itself (handshake, encryption, sockets) is an external
//! collaborator reached through the [`LineSender`] trait.

use std::time::Duration;

use async_trait::async_trait;
use hashline_wire::{Hashname, Packet};

pub mod ack;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod rcv;
pub mod snd;

pub use channel::Channel;
pub use config::ChannelConfig;
pub use controller::{ChannelController, ChannelHandler};
pub use error::{ChannelError, ChannelResult};

/// Outstanding packets a send window holds before `put` refuses more
pub const SEND_WINDOW: usize = 100;

/// First retransmit backoff
pub const RETRANSMIT_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling
pub const RETRANSMIT_MAX: Duration = Duration::from_secs(10);

/// Resends of a single packet before the channel fails with `Timeout`
pub const MAX_RETRANSMITS: u32 = 10;

/// Period of the per-channel ack/retransmit tick
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// The seam to the encrypted line layer
///
/// Implementations encrypt and deliver one framed packet to the peer's
/// line. Sends never suspend on channel state; backpressure lives in the
/// line layer.
#[async_trait]
pub trait LineSender: Send + Sync + 'static {
    /// Deliver a packet to the peer
    async fn send_pkt(&self, peer: &Hashname, pkt: &Packet) -> ChannelResult<()>;
}
