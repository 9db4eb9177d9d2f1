//! Hashline switch
//!
//! The user-facing assembly of the overlay: a `Switch` owns the Kademlia
//! routing table, the mesh reservation registry, and the channel
//! controller, and exposes channel opening, proximity lookups, and
//! shutdown. Transport and line encryption stay behind the
//! [`hashline_channel::LineSender`] seam.

pub mod config;
pub mod mux;
pub mod switch;

pub use config::SwitchConfig;
pub use mux::SwitchMux;
pub use switch::Switch;

pub use hashline_channel::{Channel, ChannelError, ChannelHandler, ChannelResult, LineSender};
pub use hashline_dht::{Mesh, Table, Tag};
pub use hashline_wire::{Hashname, Header, Packet};
