//! Hashline Distributed Hash Table
//!
//! Kademlia-style peer index: 256 buckets ordered by XOR distance from the
//! local hashname, each tracking active peers (holding a live mesh
//! reservation), candidates heard about from routers, and candidates
//! currently being handshaken.

pub mod mesh;
pub mod table;

pub use mesh::{Mesh, Tag};
pub use table::{Candidate, Table};

/// Number of buckets (one per bit of distance)
pub const NUM_BUCKETS: usize = 256;

/// Maximum active peers per bucket
pub const MAX_PEERS: usize = 32;

/// Maximum candidates per bucket
pub const MAX_CANDIDATES: usize = 128;

/// Maximum routers remembered per candidate
pub const MAX_ROUTERS_PER_CANDIDATE: usize = 5;

/// Lookup width when the caller passes 0
pub const DEFAULT_LOOKUP_SIZE: usize = 32;
