//! Ack engine
//!
//! Per-channel bookkeeping for cumulative plus selective acknowledgement.
//! Outgoing packets are stamped with `ack` (highest contiguous seq
//! received) and `miss` (gaps above it) whenever either changed since they
//! were last sent. Incoming acks evict the send window; incoming `miss`
//! entries trigger immediate selective retransmits. A periodic tick resends
//! anything unacked past its backoff, doubling the backoff up to a ceiling.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use hashline_wire::Header;
use tokio::time::Instant;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};

/// The ack state of one channel
pub struct AckHandler {
    state: Mutex<AckState>,
    retransmit_initial: Duration,
    retransmit_max: Duration,
    max_retransmits: u32,
}

#[derive(Default)]
struct AckState {
    /// Highest seq ever received; 0 means nothing received yet
    max_seen: u64,
    /// Gaps below `max_seen` still outstanding
    missing: BTreeSet<u64>,
    /// Suppression trackers for outgoing ack info
    last_ack_sent: Option<u64>,
    last_miss_sent: Vec<u64>,
    /// Highest ack accepted from the peer
    last_rcv_ack: u64,
    /// Resend clocks per in-flight seq
    retries: HashMap<u64, Retry>,
}

struct Retry {
    next_at: Instant,
    interval: Duration,
    attempts: u32,
}

impl AckState {
    /// Highest contiguous seq received
    fn ack_value(&self) -> u64 {
        match self.missing.iter().next() {
            Some(first_gap) => first_gap - 1,
            None => self.max_seen,
        }
    }
}

impl AckHandler {
    /// Create the engine with the channel's timing config
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            state: Mutex::new(AckState::default()),
            retransmit_initial: config.retransmit_initial,
            retransmit_max: config.retransmit_max,
            max_retransmits: config.max_retransmits,
        }
    }

    /// Record a received data packet's seq
    pub fn received_packet(&self, seq: u64) {
        let mut state = self.state.lock().unwrap();
        if seq > state.max_seen {
            for gap in state.max_seen + 1..seq {
                state.missing.insert(gap);
            }
            state.max_seen = seq;
        } else {
            state.missing.remove(&seq);
        }
    }

    /// Stamp outgoing ack info onto a header
    ///
    /// Returns whether anything was stamped: nothing is until the first
    /// data packet arrives, and unchanged values are suppressed.
    pub fn add_ack_info(&self, hdr: &mut Header) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.max_seen == 0 {
            return false;
        }

        let ack = state.ack_value();
        let miss: Vec<u64> = state.missing.iter().copied().collect();
        if state.last_ack_sent == Some(ack) && state.last_miss_sent == miss {
            return false;
        }

        hdr.ack = Some(ack);
        hdr.miss = miss.clone();
        state.last_ack_sent = Some(ack);
        state.last_miss_sent = miss;
        true
    }

    /// Accept a cumulative ack from the peer
    ///
    /// Retransmit clocks at or below it are forgotten. Idempotent.
    pub fn on_ack(&self, ack: u64) {
        let mut state = self.state.lock().unwrap();
        if ack > state.last_rcv_ack {
            state.last_rcv_ack = ack;
        }
        state.retries.retain(|&seq, _| seq > ack);
    }

    /// Highest ack accepted from the peer
    pub fn last_rcv_ack(&self) -> u64 {
        self.state.lock().unwrap().last_rcv_ack
    }

    /// Start the resend clock for a freshly sent seq
    pub fn track(&self, seq: u64, now: Instant) {
        let initial = self.retransmit_initial;
        self.state
            .lock()
            .unwrap()
            .retries
            .entry(seq)
            .or_insert_with(|| Retry {
                next_at: now + initial,
                interval: initial,
                attempts: 0,
            });
    }

    /// Rewind a seq's backoff after an explicit selective retransmit
    pub fn reset_backoff(&self, seq: u64, now: Instant) {
        if let Some(retry) = self.state.lock().unwrap().retries.get_mut(&seq) {
            retry.interval = self.retransmit_initial;
            retry.next_at = now + self.retransmit_initial;
        }
    }

    /// Seqs due for a resend this tick
    ///
    /// `inflight` is the send window's outstanding set; clocks for evicted
    /// seqs are dropped. Each due seq doubles its backoff up to the ceiling.
    /// Fails `Timeout` once any single seq has been resent too many times.
    pub fn due_retransmits(&self, inflight: &[u64], now: Instant) -> ChannelResult<Vec<u64>> {
        let mut state = self.state.lock().unwrap();
        state.retries.retain(|seq, _| inflight.contains(seq));

        let initial = self.retransmit_initial;
        let mut due = Vec::new();
        for &seq in inflight {
            let retry = state.retries.entry(seq).or_insert_with(|| Retry {
                next_at: now + initial,
                interval: initial,
                attempts: 0,
            });

            if retry.next_at <= now {
                retry.attempts += 1;
                if retry.attempts > self.max_retransmits {
                    return Err(ChannelError::Timeout);
                }
                retry.interval = (retry.interval * 2).min(self.retransmit_max);
                retry.next_at = now + retry.interval;
                due.push(seq);
            }
        }
        Ok(due)
    }
}
