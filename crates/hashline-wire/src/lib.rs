//! Hashline wire layer
//!
//! The two leaf pieces every other layer builds on:
//! - `Hashname`: the 32-byte endpoint identifier and its XOR distance metric
//! - `Packet`: the length-prefixed JSON-header + opaque-body frame

pub mod error;
pub mod hashname;
pub mod packet;

pub use error::{WireError, WireResult};
pub use hashname::{Distance, Hashname};
pub use packet::{Header, Packet};

/// Length of a hashname in raw bytes
pub const HASHNAME_LEN: usize = 32;

/// Smallest parseable frame: 2-byte length prefix + `{}` header
pub const MIN_FRAME_SIZE: usize = 4;

/// Maximum frame size (one UDP datagram)
pub const MAX_FRAME_SIZE: usize = 65535;
