//! The switch facade
//!
//! Ties the routing table, mesh registry, and channel controller together
//! behind the API an application sees: open typed channels to hashnames,
//! look peers up by proximity, and shut everything down. Packets reach the
//! switch through `rcv_pkt`, called by the line layer's reader task after
//! decryption and attribution.

use std::sync::Arc;

use hashline_channel::{
    Channel, ChannelController, ChannelHandler, ChannelResult, LineSender,
};
use hashline_dht::{Mesh, Table};
use hashline_wire::{Hashname, Packet};
use tracing::info;

use crate::config::SwitchConfig;

/// A telehash switch
pub struct Switch {
    local: Hashname,
    table: Arc<Table>,
    mesh: Mesh,
    controller: ChannelController,
    config: SwitchConfig,
}

impl Switch {
    /// Create a switch for an already-derived local hashname
    pub fn new(
        local: Hashname,
        line: Arc<dyn LineSender>,
        handler: Arc<dyn ChannelHandler>,
        config: SwitchConfig,
    ) -> Self {
        info!("switch {} starting", local.short());
        Self {
            local,
            table: Arc::new(Table::new(local)),
            mesh: Mesh::new(),
            controller: ChannelController::new(local, line, handler, config.channel.clone()),
            config,
        }
    }

    /// Create a switch for a local identity given as a DER public key
    pub fn for_key(
        der: &[u8],
        line: Arc<dyn LineSender>,
        handler: Arc<dyn ChannelHandler>,
        config: SwitchConfig,
    ) -> Self {
        Self::new(Hashname::for_key(der), line, handler, config)
    }

    /// The local hashname
    pub fn local_hashname(&self) -> &Hashname {
        &self.local
    }

    /// The routing table
    pub fn routing(&self) -> &Arc<Table> {
        &self.table
    }

    /// The mesh reservation registry
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Open a typed channel to `peer`
    pub async fn open(&self, peer: Hashname, typ: &str) -> ChannelResult<Channel> {
        let mut pkt = Packet::default();
        pkt.hdr.typ = typ.to_string();
        self.controller.open_channel(peer, pkt).await
    }

    /// Feed one decrypted, peer-attributed packet into the switch
    pub async fn rcv_pkt(&self, pkt: Packet) {
        self.controller.rcv_channel_pkt(pkt).await;
    }

    /// Active hashnames nearest a base32-rendered target
    ///
    /// Malformed targets return no peers.
    pub fn seek(&self, hashname: &str, n: usize) -> Vec<Hashname> {
        let n = if n == 0 { self.config.lookup_size } else { n };
        self.table.find_node(hashname, n)
    }

    /// Learn of `hn` through `router`, queueing it for promotion
    pub fn note_peer(&self, hn: Hashname, router: Hashname) {
        self.table.add_candidate(hn, router);
    }

    /// Number of open channels
    pub fn channel_count(&self) -> usize {
        self.controller.channel_count()
    }

    /// Close every channel with a `switch was terminated` error
    pub async fn shutdown(&self) {
        info!("switch {} terminating", self.local.short());
        self.controller.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use hashline_channel::ChannelError;

    use super::*;

    struct RecordingLine {
        sent: Mutex<Vec<Packet>>,
    }

    impl RecordingLine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
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

    struct SinkHandler;

    #[async_trait]
    impl ChannelHandler for SinkHandler {
        async fn serve(&self, channel: Channel) {
            while channel.receive().await.is_ok() {}
        }
    }

    fn hn(seed: u8) -> Hashname {
        Hashname::from_bytes([seed; 32])
    }

    fn switch(line: Arc<RecordingLine>) -> Switch {
        Switch::new(
            hn(1),
            line,
            Arc::new(SinkHandler),
            SwitchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_open_and_echo_roundtrip() {
        let line = RecordingLine::new();
        let sw = switch(line.clone());

        let ch = sw.open(hn(2), "chat").await.unwrap();
        let opened = line.take();
        assert_eq!(opened[0].hdr.typ, "chat");
        assert_eq!(opened[0].hdr.c, ch.id());

        // the peer answers on the same channel
        let mut reply = Packet::new(Default::default(), Bytes::from_static(b"hi"));
        reply.hdr.c = ch.id().to_string();
        reply.hdr.seq = Some(1);
        reply.peer = hn(2);
        sw.rcv_pkt(reply).await;

        let got = ch.receive().await.unwrap();
        assert_eq!(got.body.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn test_seek_uses_routing_table() {
        let line = RecordingLine::new();
        let sw = switch(line);

        for seed in 3..10 {
            let peer = hn(seed);
            sw.routing().activate_peer(peer, sw.mesh().reserve(peer));
        }

        let target = hn(4);
        let found = sw.seek(&target.to_string(), 3);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0], target);

        assert!(sw.seek("not a hashname", 3).is_empty());
    }

    #[tokio::test]
    async fn test_note_peer_queues_candidate() {
        let line = RecordingLine::new();
        let sw = switch(line);

        sw.note_peer(hn(7), hn(3));
        let candidate = sw.routing().next_candidate().unwrap();
        assert_eq!(candidate.hashname, hn(7));
        assert_eq!(candidate.routers, vec![hn(3)]);
    }

    #[tokio::test]
    async fn test_shutdown_terminates_channels() {
        let line = RecordingLine::new();
        let sw = switch(line.clone());

        let ch = sw.open(hn(2), "chat").await.unwrap();
        line.take();

        let waiter = ch.clone();
        let pending = tokio::spawn(async move { waiter.receive().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        sw.shutdown().await;
        assert_eq!(sw.channel_count(), 0);

        let sent = line.take();
        assert!(sent[0].hdr.end);
        assert_eq!(sent[0].hdr.err, "switch was terminated");
        assert!(matches!(
            pending.await.unwrap(),
            Err(ChannelError::Closed)
        ));
    }
}
