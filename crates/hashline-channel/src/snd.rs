//! Ordered send window
//!
//! Assigns a strictly increasing sequence number (from 1) to every outbound
//! packet and keeps it buffered until the peer acknowledges it. The window
//! is bounded; a full window refuses the packet rather than dropping it.

use std::collections::BTreeMap;
use std::sync::Mutex;

use hashline_wire::Packet;

use crate::error::{ChannelError, ChannelResult};
use crate::SEND_WINDOW;

/// The send buffer of one channel
#[derive(Default)]
pub struct SndBuffer {
    inner: Mutex<SndInner>,
}

struct SndInner {
    next_seq: u64,
    window: BTreeMap<u64, Packet>,
}

impl Default for SndInner {
    fn default() -> Self {
        Self {
            next_seq: 1,
            window: BTreeMap::new(),
        }
    }
}

impl SndBuffer {
    /// Create an empty window
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number to `pkt` and buffer it
    ///
    /// Fails `WouldBlock` when the window already holds [`SEND_WINDOW`]
    /// unacknowledged packets.
    pub fn put(&self, pkt: &mut Packet) -> ChannelResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.window.len() >= SEND_WINDOW {
            return Err(ChannelError::WouldBlock);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        pkt.hdr.seq = Some(seq);
        inner.window.insert(seq, pkt.clone());
        Ok(seq)
    }

    /// A copy of the buffered packet with this seq, for retransmission
    pub fn get(&self, seq: u64) -> Option<Packet> {
        self.inner.lock().unwrap().window.get(&seq).cloned()
    }

    /// Outstanding sequence numbers, newest first
    pub fn inflight_desc(&self) -> Vec<u64> {
        self.inner.lock().unwrap().window.keys().rev().copied().collect()
    }

    /// Evict everything acknowledged by a cumulative ack
    pub fn remove_up_to(&self, ack: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.window = inner.window.split_off(&(ack + 1));
    }

    /// Evict a single packet
    pub fn remove(&self, seq: u64) {
        self.inner.lock().unwrap().window.remove(&seq);
    }

    /// Number of unacknowledged packets
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().window.len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt() -> Packet {
        Packet::default()
    }

    #[test]
    fn test_put_assigns_sequence() {
        let snd = SndBuffer::new();

        for expected in 1..=5u64 {
            let mut p = pkt();
            let seq = snd.put(&mut p).unwrap();
            assert_eq!(seq, expected);
            assert_eq!(p.hdr.seq, Some(expected));
        }
        assert_eq!(snd.len(), 5);
        assert_eq!(snd.inflight_desc(), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_window_full() {
        let snd = SndBuffer::new();
        for _ in 0..SEND_WINDOW {
            snd.put(&mut pkt()).unwrap();
        }

        assert!(matches!(snd.put(&mut pkt()), Err(ChannelError::WouldBlock)));

        // acking frees the window without disturbing the sequence counter
        snd.remove_up_to(10);
        let seq = snd.put(&mut pkt()).unwrap();
        assert_eq!(seq, SEND_WINDOW as u64 + 1);
    }

    #[test]
    fn test_remove_up_to() {
        let snd = SndBuffer::new();
        for _ in 0..5 {
            snd.put(&mut pkt()).unwrap();
        }

        snd.remove_up_to(3);
        assert_eq!(snd.inflight_desc(), vec![5, 4]);

        // idempotent
        snd.remove_up_to(3);
        assert_eq!(snd.inflight_desc(), vec![5, 4]);

        snd.remove_up_to(0);
        assert_eq!(snd.len(), 2);
    }

    #[test]
    fn test_remove_selective() {
        let snd = SndBuffer::new();
        for _ in 0..3 {
            snd.put(&mut pkt()).unwrap();
        }

        snd.remove(2);
        assert_eq!(snd.inflight_desc(), vec![3, 1]);
        assert!(snd.get(2).is_none());
        assert_eq!(snd.get(3).unwrap().hdr.seq, Some(3));
    }
}
