//! Kademlia routing table
//!
//! 256 buckets indexed by XOR distance from the local hashname. Each bucket
//! tracks three disjoint FIFO lists: active peers (each owning a mesh tag),
//! candidates heard about from routers, and candidates pending a handshake.
//! Mutations never fail; invalid inputs (the local hashname, a full bucket)
//! are silent no-ops.

use std::collections::VecDeque;
use std::sync::RwLock;

use hashline_wire::{Distance, Hashname};
use tracing::trace;

use crate::mesh::Tag;
use crate::{
    DEFAULT_LOOKUP_SIZE, MAX_CANDIDATES, MAX_PEERS, MAX_ROUTERS_PER_CANDIDATE, NUM_BUCKETS,
};

#[derive(Debug, Clone)]
struct PeerInfo {
    hashname: Hashname,
    distance: Distance,
}

#[derive(Debug)]
struct ActivePeer {
    info: PeerInfo,
    tag: Tag,
}

#[derive(Debug, Clone)]
struct CandidatePeer {
    info: PeerInfo,
    routers: Vec<Hashname>,
}

/// A candidate handed out by [`Table::next_candidate`] for promotion
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The candidate peer
    pub hashname: Hashname,
    /// Peers that introduced it, earliest first
    pub routers: Vec<Hashname>,
}

#[derive(Default)]
struct Bucket {
    peers: VecDeque<ActivePeer>,
    candidates: VecDeque<CandidatePeer>,
    pending: VecDeque<CandidatePeer>,
}

/// The routing table
///
/// One reader-writer lock guards all buckets: lookups take the read lock,
/// mutators the write lock. The lock is never held across I/O.
pub struct Table {
    local: Hashname,
    buckets: RwLock<Vec<Bucket>>,
}

impl Table {
    /// Create an empty table centered on the local hashname
    pub fn new(local: Hashname) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| Bucket::default()).collect();
        Self {
            local,
            buckets: RwLock::new(buckets),
        }
    }

    /// The local hashname this table is centered on
    pub fn local_hashname(&self) -> &Hashname {
        &self.local
    }

    /// Up to `n` active peers nearest `key`, ascending by distance from `key`
    ///
    /// Seeds from the bucket the key falls into, then walks outward one
    /// stride at a time until enough peers are gathered or every bucket has
    /// been examined. Candidates and pending peers are never returned.
    pub fn find_key(&self, key: &Hashname, n: usize) -> Vec<Hashname> {
        let n = if n == 0 { DEFAULT_LOOKUP_SIZE } else { n };
        let start = self.local.distance(key).bucket().unwrap_or(0);

        let mut found: Vec<Hashname> = Vec::with_capacity(n + 3 * MAX_PEERS);
        {
            let buckets = self.buckets.read().unwrap();

            found.extend(buckets[start].peers.iter().map(|p| p.info.hashname));

            let mut offset = 1;
            while found.len() < n && offset < NUM_BUCKETS {
                if offset <= start {
                    found.extend(buckets[start - offset].peers.iter().map(|p| p.info.hashname));
                }
                if start + offset < NUM_BUCKETS {
                    found.extend(buckets[start + offset].peers.iter().map(|p| p.info.hashname));
                }
                offset += 1;
            }
        }

        let mut by_dist: Vec<(Distance, Hashname)> =
            found.into_iter().map(|hn| (key.distance(&hn), hn)).collect();
        by_dist.sort_by(|a, b| a.0.cmp(&b.0));
        by_dist.truncate(n);
        by_dist.into_iter().map(|(_, hn)| hn).collect()
    }

    /// [`Table::find_key`] for a base32-rendered hashname
    ///
    /// Malformed input returns no peers.
    pub fn find_node(&self, hn: &str, n: usize) -> Vec<Hashname> {
        match hn.parse::<Hashname>() {
            Ok(key) => self.find_key(&key, n),
            Err(_) => Vec::new(),
        }
    }

    /// Pop the next candidate worth handshaking and mark it pending
    ///
    /// Scans buckets in index order, skipping buckets that are (or are about
    /// to be) full of peers and buckets with nothing queued. Promotion is
    /// FIFO within a bucket.
    pub fn next_candidate(&self) -> Option<Candidate> {
        let mut buckets = self.buckets.write().unwrap();

        for bucket in buckets.iter_mut() {
            if bucket.peers.len() + bucket.pending.len() >= MAX_PEERS {
                continue;
            }

            if let Some(c) = bucket.candidates.pop_front() {
                let out = Candidate {
                    hashname: c.info.hashname,
                    routers: c.routers.clone(),
                };
                bucket.pending.push_back(c);
                return Some(out);
            }
        }

        None
    }

    /// Promote a peer to active, taking ownership of its mesh tag
    ///
    /// Re-activating an already-active peer swaps the tag in (the previous
    /// reservation is released, not accumulated). A full bucket rejects the
    /// promotion and releases the tag. Idempotent.
    pub fn activate_peer(&self, hn: Hashname, tag: Tag) {
        let dist = self.local.distance(&hn);
        let idx = match dist.bucket() {
            Some(idx) => idx,
            // cannot link self
            None => {
                tag.release();
                return;
            }
        };

        let mut buckets = self.buckets.write().unwrap();
        let bucket = &mut buckets[idx];

        bucket.pending.retain(|c| c.info.hashname != hn);
        bucket.candidates.retain(|c| c.info.hashname != hn);

        if let Some(peer) = bucket.peers.iter_mut().find(|p| p.info.hashname == hn) {
            let old = std::mem::replace(&mut peer.tag, tag);
            old.release();
            return;
        }

        if bucket.peers.len() >= MAX_PEERS {
            tag.release();
            return;
        }

        trace!("activated {} in bucket {}", hn.short(), idx);
        bucket.peers.push_back(ActivePeer {
            info: PeerInfo {
                hashname: hn,
                distance: dist,
            },
            tag,
        });
    }

    /// Forget a peer entirely, releasing its mesh tag if it was active
    pub fn deactivate_peer(&self, hn: &Hashname) {
        let idx = match self.local.distance(hn).bucket() {
            Some(idx) => idx,
            // cannot unlink self
            None => return,
        };

        let mut buckets = self.buckets.write().unwrap();
        let bucket = &mut buckets[idx];

        if let Some(pos) = bucket.peers.iter().position(|p| p.info.hashname == *hn) {
            if let Some(peer) = bucket.peers.remove(pos) {
                peer.tag.release();
                trace!("deactivated {} in bucket {}", hn.short(), idx);
            }
        }

        bucket.candidates.retain(|c| c.info.hashname != *hn);
        bucket.pending.retain(|c| c.info.hashname != *hn);
    }

    /// Learn of `hn` via `router`
    ///
    /// Known peers keep their state; an existing candidate merges the router
    /// into its list (deduplicated, capped at 5 keeping the earliest). A
    /// bucket already holding 128 candidates drops the introduction.
    pub fn add_candidate(&self, hn: Hashname, router: Hashname) {
        let dist = self.local.distance(&hn);
        let idx = match dist.bucket() {
            Some(idx) => idx,
            // cannot add self
            None => return,
        };

        let mut buckets = self.buckets.write().unwrap();
        let bucket = &mut buckets[idx];

        if bucket.peers.iter().any(|p| p.info.hashname == hn) {
            return;
        }
        if bucket.pending.iter().any(|c| c.info.hashname == hn) {
            return;
        }

        if let Some(c) = bucket.candidates.iter_mut().find(|c| c.info.hashname == hn) {
            if c.routers.len() < MAX_ROUTERS_PER_CANDIDATE && !c.routers.contains(&router) {
                c.routers.push(router);
            }
            return;
        }

        if bucket.candidates.len() < MAX_CANDIDATES {
            trace!("candidate {} via {} in bucket {}", hn.short(), router.short(), idx);
            bucket.candidates.push_back(CandidatePeer {
                info: PeerInfo {
                    hashname: hn,
                    distance: dist,
                },
                routers: vec![router],
            });
        }
    }

    /// Total number of active peers
    pub fn len(&self) -> usize {
        self.buckets.read().unwrap().iter().map(|b| b.peers.len()).sum()
    }

    /// True when no peer is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
