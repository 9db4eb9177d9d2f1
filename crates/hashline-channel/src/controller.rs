//! Channel controller
//!
//! Owns every open channel, demultiplexes inbound packets onto them, and
//! spawns a user handler task for channels the peer opens. Handler panics
//! are caught at the task boundary and translated into a protocol-level
//! `internal server error`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashline_wire::{Hashname, Packet};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::time::interval;
use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, ChannelInner};
use crate::config::ChannelConfig;
use crate::error::ChannelResult;
use crate::LineSender;

/// User-side handler for channels opened by the remote peer
///
/// Each remote open runs `serve` on its own task; the channel is closed
/// when it returns.
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    /// Serve one remote-opened channel
    async fn serve(&self, channel: Channel);
}

/// The channel registry and demultiplexer of one switch
#[derive(Clone)]
pub struct ChannelController {
    inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    local: Hashname,
    line: Arc<dyn LineSender>,
    handler: Arc<dyn ChannelHandler>,
    config: ChannelConfig,
    channels: Mutex<HashMap<String, Arc<ChannelInner>>>,
    /// Ids of destroyed channels; never reused for inbound demux
    tombstones: Mutex<HashSet<String>>,
}

impl ChannelController {
    /// Create a controller speaking through `line`
    pub fn new(
        local: Hashname,
        line: Arc<dyn LineSender>,
        handler: Arc<dyn ChannelHandler>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                local,
                line,
                handler,
                config,
                channels: Mutex::new(HashMap::new()),
                tombstones: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// The local hashname
    pub fn local_hashname(&self) -> &Hashname {
        &self.inner.local
    }

    /// Open a channel to `peer`, sending `pkt` as its first packet
    ///
    /// The packet's `type` header names the channel type. The caller keeps
    /// the returned handle; no user handler is spawned for local opens.
    pub async fn open_channel(&self, peer: Hashname, pkt: Packet) -> ChannelResult<Channel> {
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);
        let id = hex::encode(id);

        let ch = self
            .inner
            .make_channel(id, peer, pkt.hdr.typ.clone());
        self.inner.register(ch.clone());
        self.inner.spawn_ticker(&ch);

        debug!(
            "channel[{}:{}]({} -> {}): opened",
            ch.short_id(),
            pkt.hdr.typ,
            self.inner.local.short(),
            peer.short()
        );

        let channel = Channel::from_inner(ch);
        if let Err(err) = channel.send(pkt).await {
            let _ = channel.close().await;
            return Err(err);
        }
        Ok(channel)
    }

    /// Demultiplex one inbound packet from the line layer
    pub async fn rcv_channel_pkt(&self, pkt: Packet) {
        if pkt.hdr.c.is_empty() {
            return;
        }

        let known = self.inner.channels.lock().unwrap().get(&pkt.hdr.c).cloned();
        match known {
            Some(ch) => ch.handle_incoming(pkt).await,
            None => {
                if self.inner.tombstones.lock().unwrap().contains(&pkt.hdr.c) {
                    trace!("dropping packet for destroyed channel {}", &pkt.hdr.c);
                    return;
                }
                if pkt.hdr.typ.is_empty() {
                    trace!("dropping packet for unknown channel {}", &pkt.hdr.c);
                    return;
                }
                self.rcv_new_channel_pkt(pkt).await;
            }
        }
    }

    /// Register a remote-opened channel and hand it to the user handler
    async fn rcv_new_channel_pkt(&self, pkt: Packet) {
        let ch = self
            .inner
            .make_channel(pkt.hdr.c.clone(), pkt.peer, pkt.hdr.typ.clone());
        self.inner.register(ch.clone());
        self.inner.spawn_ticker(&ch);
        self.inner.spawn_handler(ch.clone());

        debug!(
            "channel[{}:{}]({} <- {}): opened",
            ch.short_id(),
            ch.typ,
            self.inner.local.short(),
            ch.peer.short()
        );

        ch.handle_incoming(pkt).await;
    }

    /// Close every open channel with a `switch was terminated` error
    pub async fn close_all(&self) {
        let open: Vec<_> = self
            .inner
            .channels
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        for ch in open {
            let _ = ch.close_with_error("switch was terminated").await;
        }
    }

    /// Number of open channels
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().unwrap().len()
    }
}

impl ControllerInner {
    fn make_channel(self: &Arc<Self>, id: String, peer: Hashname, typ: String) -> Arc<ChannelInner> {
        ChannelInner::new(
            id,
            peer,
            typ,
            self.line.clone(),
            Arc::downgrade(self),
            &self.config,
        )
    }

    fn register(&self, ch: Arc<ChannelInner>) {
        self.channels.lock().unwrap().insert(ch.id.clone(), ch);
    }

    pub(crate) fn drop_channel(&self, id: &str) {
        if self.channels.lock().unwrap().remove(id).is_some() {
            self.tombstones.lock().unwrap().insert(id.to_string());
        }
    }

    /// Drive the channel's ack/retransmit clock until it closes
    fn spawn_ticker(&self, ch: &Arc<ChannelInner>) {
        let ch = Arc::downgrade(ch);
        let period = self.config.tick_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let ch = match ch.upgrade() {
                    Some(ch) => ch,
                    None => break,
                };
                if ch.is_closed() {
                    break;
                }
                if let Err(err) = ch.tick().await {
                    warn!("channel[{}]: {}", ch.short_id(), err);
                    ch.fail_with_timeout();
                    break;
                }
            }
        });
    }

    /// Run the user handler behind a crash barrier
    fn spawn_handler(self: &Arc<Self>, ch: Arc<ChannelInner>) {
        let handler = self.handler.clone();
        let served = Channel::from_inner(ch.clone());
        let task = tokio::spawn(async move { handler.serve(served).await });

        let guarded = Channel::from_inner(ch);
        tokio::spawn(async move {
            match task.await {
                Ok(()) => {
                    let _ = guarded.close().await;
                }
                Err(err) if err.is_panic() => {
                    error!("channel[{}] handler panicked: {}", guarded.id(), err);
                    let _ = guarded.close_with_error("internal server error").await;
                }
                Err(_) => {}
            }
        });
    }
}
