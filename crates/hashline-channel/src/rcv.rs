//! Reassembly receive buffer
//!
//! Buffers out-of-order packets and hands them to `get` strictly in
//! sequence order starting at 1. `get` suspends until the next in-order
//! packet arrives, the read deadline expires, or the buffer is closed.

use std::collections::BTreeMap;
use std::sync::Mutex;

use hashline_wire::Packet;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{ChannelError, ChannelResult};

/// Why a buffer stopped accepting reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Channel ended or was closed locally
    Closed,
    /// A packet exhausted its retransmits
    TimedOut,
}

impl From<CloseReason> for ChannelError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Closed => ChannelError::Closed,
            CloseReason::TimedOut => ChannelError::Timeout,
        }
    }
}

/// The receive buffer of one channel
#[derive(Default)]
pub struct RcvBuffer {
    state: Mutex<RcvState>,
    notify: Notify,
}

struct RcvState {
    pkts: BTreeMap<u64, Packet>,
    next_seq: u64,
    deadline: Option<Instant>,
    /// Seq of the packet flagged `end`; nothing beyond it is delivered
    end_seq: Option<u64>,
    closed: Option<CloseReason>,
}

impl Default for RcvState {
    fn default() -> Self {
        Self {
            pkts: BTreeMap::new(),
            next_seq: 1,
            deadline: None,
            end_seq: None,
            closed: None,
        }
    }
}

impl RcvBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an incoming packet
    ///
    /// Packets without a seq, duplicates, packets below the delivery
    /// cursor, and anything arriving after close are dropped.
    pub fn put(&self, pkt: Packet) {
        let mut state = self.state.lock().unwrap();
        if state.closed.is_some() {
            return;
        }

        let seq = match pkt.hdr.seq {
            Some(seq) => seq,
            None => {
                trace!("dropping packet without seq");
                return;
            }
        };
        if seq < state.next_seq || state.pkts.contains_key(&seq) {
            trace!("dropping duplicate seq {}", seq);
            return;
        }
        if state.end_seq.is_some_and(|end| seq > end) {
            trace!("dropping seq {} past the terminal packet", seq);
            return;
        }

        if pkt.hdr.end {
            state.end_seq = Some(seq);
            // anything already buffered beyond the terminal seq is dead
            let _ = state.pkts.split_off(&(seq + 1));
        }

        state.pkts.insert(seq, pkt);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Take the next in-order packet
    ///
    /// Suspends until it is present. A set deadline turns an empty wait
    /// into `Timeout`; a closed and drained buffer yields the close reason.
    /// Delivering a packet flagged `end` closes the buffer.
    pub async fn get(&self) -> ChannelResult<Packet> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock().unwrap();

                let next = state.next_seq;
                if let Some(pkt) = state.pkts.remove(&next) {
                    state.next_seq += 1;
                    if pkt.hdr.end {
                        state.closed.get_or_insert(CloseReason::Closed);
                        drop(state);
                        self.notify.notify_waiters();
                    }
                    return Ok(pkt);
                }

                if let Some(reason) = state.closed {
                    return Err(reason.into());
                }
                if let Some(deadline) = state.deadline {
                    if Instant::now() >= deadline {
                        return Err(ChannelError::Timeout);
                    }
                }
                state.deadline
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Move the read deadline; `None` clears it
    ///
    /// Wakes pending `get`s so they adopt the new deadline.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().unwrap().deadline = deadline;
        self.notify.notify_waiters();
    }

    /// Close the buffer, waking every waiter with `Closed`
    pub fn close(&self) {
        self.close_with(CloseReason::Closed);
    }

    /// Close the buffer with an explicit reason
    pub fn close_with(&self, reason: CloseReason) {
        self.state.lock().unwrap().closed.get_or_insert(reason);
        self.notify.notify_waiters();
    }

    /// True once the buffer refuses new packets
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed.is_some()
    }
}
