//! A single reliable channel
//!
//! Identified by a 16-byte random id (hex) plus the remote hashname and a
//! type string chosen by the opener. The channel owns its send window,
//! receive buffer, and ack engine; the controller owns the channel and is
//! reached through a weak back-reference for registry edits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use hashline_wire::{Hashname, Header, Packet};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::ack::AckHandler;
use crate::config::ChannelConfig;
use crate::controller::ControllerInner;
use crate::error::{ChannelError, ChannelResult};
use crate::rcv::{CloseReason, RcvBuffer};
use crate::snd::SndBuffer;
use crate::LineSender;

/// Handle to an open channel
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    /// Channel id (hex)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Hashname of the peer
    pub fn peer(&self) -> &Hashname {
        &self.inner.peer
    }

    /// Channel type, as set by the opener
    pub fn typ(&self) -> &str {
        &self.inner.typ
    }

    /// Send a packet on this channel
    ///
    /// The packet is stamped with the channel id, gets the next sequence
    /// number, and carries any pending ack info. Fails `WouldBlock` when
    /// the send window is full and `Closed` once the channel has ended.
    pub async fn send(&self, pkt: Packet) -> ChannelResult<()> {
        if self.inner.ended.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        self.inner.transmit(pkt).await
    }

    /// Send an application header and body
    ///
    /// The header is serialised into the opaque `_` sub-document.
    pub async fn send_app<T: serde::Serialize>(
        &self,
        hdr: Option<&T>,
        body: impl Into<Bytes>,
    ) -> ChannelResult<()> {
        let mut pkt = Packet::new(Header::default(), body);
        if let Some(hdr) = hdr {
            let raw = serde_json::to_string(hdr)
                .and_then(serde_json::value::RawValue::from_string)
                .map_err(|err| ChannelError::Internal(err.to_string()))?;
            pkt.hdr.custom = Some(raw);
        }
        self.send(pkt).await
    }

    /// Receive the next in-order packet
    ///
    /// A packet carrying an `err` header surfaces as
    /// [`ChannelError::Remote`] with the packet riding along.
    pub async fn receive(&self) -> ChannelResult<Packet> {
        let pkt = self.inner.rcv.get().await?;
        if !pkt.hdr.err.is_empty() {
            return Err(ChannelError::Remote {
                message: pkt.hdr.err.clone(),
                pkt: Box::new(pkt),
            });
        }
        Ok(pkt)
    }

    /// Move the receive deadline; `None` clears it
    pub fn set_receive_deadline(&self, deadline: Option<Instant>) {
        self.inner.rcv.set_deadline(deadline);
    }

    /// End the channel
    pub async fn close(&self) -> ChannelResult<()> {
        self.inner.close_with_error("").await
    }

    /// End the channel with a protocol-level error message
    pub async fn close_with_error(&self, message: &str) -> ChannelResult<()> {
        self.inner.close_with_error(message).await
    }

    /// True once `end` has been sent or received
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

pub(crate) struct ChannelInner {
    pub(crate) id: String,
    pub(crate) peer: Hashname,
    pub(crate) typ: String,
    pub(crate) snd: SndBuffer,
    pub(crate) rcv: RcvBuffer,
    pub(crate) ack: AckHandler,
    line: Arc<dyn LineSender>,
    controller: Weak<ControllerInner>,
    ended: AtomicBool,
}

impl ChannelInner {
    pub(crate) fn new(
        id: String,
        peer: Hashname,
        typ: String,
        line: Arc<dyn LineSender>,
        controller: Weak<ControllerInner>,
        config: &ChannelConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            typ,
            snd: SndBuffer::new(),
            rcv: RcvBuffer::new(),
            ack: AckHandler::new(config),
            line,
            controller,
            ended: AtomicBool::new(false),
        })
    }

    pub(crate) fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.ended.load(Ordering::Acquire) || self.rcv.is_closed()
    }

    /// Stamp, buffer, annotate, and hand a packet to the line
    pub(crate) async fn transmit(&self, mut pkt: Packet) -> ChannelResult<()> {
        pkt.hdr.c = self.id.clone();
        let seq = self.snd.put(&mut pkt)?;
        self.ack.track(seq, Instant::now());
        self.ack.add_ack_info(&mut pkt.hdr);
        self.line.send_pkt(&self.peer, &pkt).await
    }

    /// Feed one demuxed inbound packet through the channel
    pub(crate) async fn handle_incoming(&self, pkt: Packet) {
        let hdr = pkt.hdr.clone();

        if !pkt.just_ack() {
            match hdr.seq {
                Some(seq) => {
                    self.ack.received_packet(seq);
                    self.rcv.put(pkt);
                }
                None => trace!("channel[{}]: data packet without seq", self.short_id()),
            }
        }

        self.consume_ack(&hdr).await;
    }

    /// Apply the ack fields of an inbound header
    ///
    /// Evicts acked packets and immediately resends anything the peer
    /// reports missing, without re-queueing.
    async fn consume_ack(&self, hdr: &Header) {
        let ack = match hdr.ack {
            Some(ack) => ack,
            None => return,
        };

        self.snd.remove_up_to(ack);
        self.ack.on_ack(ack);

        for &seq in &hdr.miss {
            if seq <= ack {
                continue;
            }
            if let Some(pkt) = self.snd.get(seq) {
                trace!("channel[{}]: selective resend of seq {}", self.short_id(), seq);
                self.ack.reset_backoff(seq, Instant::now());
                if let Err(err) = self.line.send_pkt(&self.peer, &pkt).await {
                    warn!("channel[{}]: resend failed: {}", self.short_id(), err);
                }
            }
        }
    }

    /// One pass of the ack/retransmit clock
    ///
    /// Resends overdue packets and flushes a pure ack when the peer has
    /// not yet seen the current ack info. Fails `Timeout` once a packet
    /// exhausts its retransmits.
    pub(crate) async fn tick(&self) -> ChannelResult<()> {
        let now = Instant::now();

        let inflight = self.snd.inflight_desc();
        let due = self.ack.due_retransmits(&inflight, now)?;
        for seq in due {
            if let Some(pkt) = self.snd.get(seq) {
                trace!("channel[{}]: retransmitting seq {}", self.short_id(), seq);
                if let Err(err) = self.line.send_pkt(&self.peer, &pkt).await {
                    warn!("channel[{}]: retransmit failed: {}", self.short_id(), err);
                }
            }
        }

        let mut hdr = Header::default();
        hdr.c = self.id.clone();
        if self.ack.add_ack_info(&mut hdr) {
            let pkt = Packet::new(hdr, Bytes::new());
            if let Err(err) = self.line.send_pkt(&self.peer, &pkt).await {
                warn!("channel[{}]: ack flush failed: {}", self.short_id(), err);
            }
        }

        Ok(())
    }

    /// Emit the terminal packet and tear the channel down
    pub(crate) async fn close_with_error(&self, message: &str) -> ChannelResult<()> {
        if self.ended.swap(true, Ordering::AcqRel) {
            self.rcv.close();
            self.unregister();
            return Ok(());
        }

        debug!("channel[{}:{}]: closing", self.short_id(), self.typ);

        let mut pkt = Packet::default();
        pkt.hdr.end = true;
        pkt.hdr.err = message.to_string();
        let sent = self.transmit(pkt).await;

        self.rcv.close();
        self.unregister();
        sent
    }

    /// Tear the channel down locally after retransmit exhaustion
    pub(crate) fn fail_with_timeout(&self) {
        warn!("channel[{}:{}]: peer unresponsive, failing", self.short_id(), self.typ);
        self.ended.store(true, Ordering::Release);
        self.rcv.close_with(CloseReason::TimedOut);
        self.unregister();
    }

    fn unregister(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.drop_channel(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;

    struct RecordingLine {
        sent: StdMutex<Vec<Packet>>,
    }

    impl RecordingLine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<Packet> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl LineSender for RecordingLine {
        async fn send_pkt(&self, _peer: &Hashname, pkt: &Packet) -> ChannelResult<()> {
            self.sent.lock().unwrap().push(pkt.clone());
            Ok(())
        }
    }

    fn channel(line: Arc<RecordingLine>) -> Channel {
        Channel::from_inner(ChannelInner::new(
            "c0ffee".to_string(),
            Hashname::from_bytes([9; 32]),
            "test".to_string(),
            line,
            Weak::new(),
            &ChannelConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_send_stamps_id_and_seq() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        ch.send(Packet::default()).await.unwrap();
        ch.send(Packet::default()).await.unwrap();

        let sent = line.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].hdr.c, "c0ffee");
        assert_eq!(sent[0].hdr.seq, Some(1));
        assert_eq!(sent[1].hdr.seq, Some(2));
        // nothing received yet, so no ack fields ride along
        assert_eq!(sent[0].hdr.ack, None);
    }

    #[tokio::test]
    async fn test_send_app_wraps_custom_header() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        #[derive(serde::Serialize)]
        struct App {
            room: &'static str,
        }
        ch.send_app(Some(&App { room: "lobby" }), &b"hey"[..])
            .await
            .unwrap();

        let sent = line.take();
        assert_eq!(sent[0].body.as_ref(), b"hey");
        assert_eq!(
            sent[0].hdr.custom.as_deref().unwrap().get(),
            r#"{"room":"lobby"}"#
        );

        ch.send_app::<()>(None, &b""[..]).await.unwrap();
        assert!(line.take()[0].hdr.custom.is_none());
    }

    #[tokio::test]
    async fn test_receive_surfaces_remote_error() {
        let line = RecordingLine::new();
        let ch = channel(line);

        let mut terminal = Packet::default();
        terminal.hdr.seq = Some(1);
        terminal.hdr.end = true;
        terminal.hdr.err = "boom".to_string();
        ch.inner.handle_incoming(terminal).await;

        match ch.receive().await {
            Err(ChannelError::Remote { message, pkt }) => {
                assert_eq!(message, "boom");
                assert!(pkt.hdr.end);
            }
            other => panic!("expected remote error, got {:?}", other.map(|p| p.hdr)),
        }
        assert!(matches!(ch.receive().await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_close_emits_end() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        ch.close_with_error("bye").await.unwrap();

        let sent = line.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].hdr.end);
        assert_eq!(sent[0].hdr.err, "bye");
        assert!(ch.is_closed());

        // closed channels refuse further sends, and no second end goes out
        assert!(matches!(
            ch.send(Packet::default()).await,
            Err(ChannelError::Closed)
        ));
        ch.close().await.unwrap();
        assert!(line.take().is_empty());
    }

    #[tokio::test]
    async fn test_gap_triggers_selective_resend() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        for _ in 0..5 {
            ch.send(Packet::default()).await.unwrap();
        }
        line.take();

        // peer saw 1,2,4,5
        let mut ackpkt = Packet::default();
        ackpkt.hdr.ack = Some(2);
        ackpkt.hdr.miss = vec![3];
        ch.inner.handle_incoming(ackpkt).await;

        // 1 and 2 are evicted, 3 resent immediately, 4 and 5 left alone
        let resent = line.take();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].hdr.seq, Some(3));
        assert_eq!(ch.inner.snd.inflight_desc(), vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_ack_idempotent_on_send_window() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        for _ in 0..3 {
            ch.send(Packet::default()).await.unwrap();
        }
        line.take();

        let mut ackpkt = Packet::default();
        ackpkt.hdr.ack = Some(2);
        ch.inner.handle_incoming(ackpkt.clone()).await;
        assert_eq!(ch.inner.snd.inflight_desc(), vec![3]);

        // replaying the same ack changes nothing
        ch.inner.handle_incoming(ackpkt).await;
        assert_eq!(ch.inner.snd.inflight_desc(), vec![3]);
        assert!(line.take().is_empty());
    }

    #[tokio::test]
    async fn test_data_packets_carry_ack_info() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        let mut data = Packet::default();
        data.hdr.seq = Some(1);
        ch.inner.handle_incoming(data).await;

        ch.send(Packet::default()).await.unwrap();
        let sent = line.take();
        assert_eq!(sent[0].hdr.ack, Some(1));
    }

    #[tokio::test]
    async fn test_tick_flushes_pure_ack() {
        let line = RecordingLine::new();
        let ch = channel(line.clone());

        let mut data = Packet::default();
        data.hdr.seq = Some(1);
        ch.inner.handle_incoming(data).await;

        ch.inner.tick().await.unwrap();
        let sent = line.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].just_ack());
        assert_eq!(sent[0].hdr.ack, Some(1));
        assert_eq!(sent[0].hdr.c, "c0ffee");

        // already acknowledged; the next tick stays quiet
        ch.inner.tick().await.unwrap();
        assert!(line.take().is_empty());
    }

    #[tokio::test]
    async fn test_pure_ack_never_reaches_rcv() {
        let line = RecordingLine::new();
        let ch = channel(line);

        let mut ackpkt = Packet::default();
        ackpkt.hdr.ack = Some(1);
        ackpkt.hdr.c = "c0ffee".to_string();
        ch.inner.handle_incoming(ackpkt).await;

        ch.set_receive_deadline(Some(Instant::now()));
        assert!(matches!(ch.receive().await, Err(ChannelError::Timeout)));
    }
}
