//! Mesh reservations
//!
//! The DHT keeps a line alive by holding a `Tag` on its peer. Tags are
//! move-only: `release` consumes the tag, and dropping one releases it too,
//! so a reservation can never be released twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use hashline_wire::Hashname;
use tracing::trace;

/// Registry of live line reservations, keyed by peer hashname
#[derive(Clone, Default)]
pub struct Mesh {
    state: Arc<MeshState>,
}

#[derive(Default)]
struct MeshState {
    refs: Mutex<HashMap<Hashname, usize>>,
}

impl Mesh {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a peer's line, returning the owning tag
    pub fn reserve(&self, hn: Hashname) -> Tag {
        let mut refs = self.state.refs.lock().unwrap();
        *refs.entry(hn).or_insert(0) += 1;
        Tag {
            slot: Some(TagSlot {
                hn,
                mesh: Arc::downgrade(&self.state),
            }),
        }
    }

    /// Number of live reservations on a peer
    pub fn refs(&self, hn: &Hashname) -> usize {
        self.state.refs.lock().unwrap().get(hn).copied().unwrap_or(0)
    }
}

impl MeshState {
    fn unref(&self, hn: Hashname) {
        let mut refs = self.refs.lock().unwrap();
        if let Some(count) = refs.get_mut(&hn) {
            *count -= 1;
            if *count == 0 {
                refs.remove(&hn);
                trace!("released last reservation on {}", hn.short());
            }
        }
    }
}

/// An owned reservation on a peer's line
pub struct Tag {
    slot: Option<TagSlot>,
}

struct TagSlot {
    hn: Hashname,
    mesh: Weak<MeshState>,
}

impl Tag {
    /// Release the reservation
    pub fn release(mut self) {
        self.do_release();
    }

    /// The peer this tag reserves
    pub fn hashname(&self) -> Option<Hashname> {
        self.slot.as_ref().map(|s| s.hn)
    }

    fn do_release(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(mesh) = slot.mesh.upgrade() {
                mesh.unref(slot.hn);
            }
        }
    }
}

impl Drop for Tag {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "Tag({})", slot.hn.short()),
            None => write!(f, "Tag(released)"),
        }
    }
}
