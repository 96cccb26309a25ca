//! Mesh client orchestrator: peer registry, receive loop, retransmit loop
//! and discovery loop.
//!
//! A started client runs three concurrent tasks. The receive loop turns
//! datagrams into decoded packets and feeds the sequencing logic, which
//! invokes the application callback and schedules acknowledgments. The
//! retransmit loop periodically re-sends every reliable packet a peer has
//! not yet acknowledged, coalescing as many as fit into one datagram. The
//! discovery loop broadcasts this node's own reachable endpoint and relays
//! known peers to each other.

use crate::buffer_pool;
use crate::config::MeshConfig;
use crate::discovery;
use crate::error::{MeshError, Result};
use crate::metrics::{MetricsSnapshot, TransportMetrics};
use crate::packet::{self, Acknowledge, Packet, PacketType, PeerInfo, Sequence};
use crate::peer::{Peer, PeerStats};
use crate::transport::{Transport, UdpTransport};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};

/// What the application made of a received buffer.
///
/// `Rejected` aborts processing of the remainder of the current datagram;
/// it is never conflated with a valid packet whose fields happen to be zero.
pub enum Decoded {
    /// The buffer's head decoded into an application packet.
    Packet(Box<dyn Packet>),
    /// The buffer could not be interpreted.
    Rejected,
}

/// Application callback: given the sender and the unread remainder of a
/// datagram, decode the packet at its head or reject it.
pub type PacketCallback = Arc<dyn Fn(SocketAddr, &[u8]) -> Decoded + Send + Sync>;

/// Shared handle to one peer's session state. One lock per peer serializes
/// every mutation of its acknowledgment and inbox state.
pub type SharedPeer = Arc<Mutex<Peer>>;

/// Peer-to-peer mesh client over an injected datagram transport.
pub struct MeshClient {
    state: Arc<ClientState>,
    receive_task: Option<tokio::task::JoinHandle<()>>,
    resend_task: Option<tokio::task::JoinHandle<()>>,
    discovery_task: Option<tokio::task::JoinHandle<()>>,
}

struct ClientState {
    transport: Arc<dyn Transport>,
    config: MeshConfig,
    callback: PacketCallback,
    peers: DashMap<SocketAddr, SharedPeer>,
    resending: AtomicBool,
    sharing: AtomicBool,
    shutdown: watch::Sender<bool>,
    metrics: TransportMetrics,
}

impl MeshClient {
    /// Bind a UDP transport per `config` and build a client around it.
    /// Dedicated hosts bind the well-known port; others bind ephemeral.
    /// Bind failures and invalid configuration fail startup.
    pub async fn bind(callback: PacketCallback, config: MeshConfig) -> Result<Self> {
        config.validate()?;
        let bind_addr = SocketAddr::new(config.bind_addr, config.effective_bind_port());
        let transport = UdpTransport::bind(bind_addr, config.subnet_mask).await?;
        Self::with_transport(Arc::new(transport), callback, config)
    }

    /// Build a client around an already-bound [`Transport`].
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        callback: PacketCallback,
        config: MeshConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            state: Arc::new(ClientState {
                transport,
                config,
                callback,
                peers: DashMap::new(),
                resending: AtomicBool::new(false),
                sharing: AtomicBool::new(false),
                shutdown,
                metrics: TransportMetrics::new(),
            }),
            receive_task: None,
            resend_task: None,
            discovery_task: None,
        })
    }

    /// Start the receive, retransmit and discovery loops.
    pub fn start(&mut self) -> Result<()> {
        if self.receive_task.is_some() {
            return Ok(());
        }

        self.state.resending.store(true, Ordering::Relaxed);
        self.state.sharing.store(true, Ordering::Relaxed);

        self.receive_task = Some(tokio::spawn(ClientState::receive_loop(self.state.clone())));
        self.resend_task = Some(tokio::spawn(ClientState::resend_loop(self.state.clone())));
        self.discovery_task = Some(tokio::spawn(ClientState::discovery_loop(self.state.clone())));

        info!(
            addr = ?self.state.transport.local_addr().ok(),
            dedicated = self.state.config.dedicated,
            "mesh client started"
        );
        Ok(())
    }

    /// Stop all three loops. The receive loop exits promptly; the other two
    /// observe their flag at the top of the next iteration.
    pub fn stop(&mut self) {
        self.stop_resending();
        self.stop_sharing_peers();
        self.stop_receiving();
        info!("mesh client stopped");
    }

    /// Cancel the receive loop's wait for the next datagram.
    pub fn stop_receiving(&mut self) {
        let _ = self.state.shutdown.send(true);
    }

    /// Stop retransmitting unacknowledged packets. Tracked packet data is
    /// not cleared.
    pub fn stop_resending(&mut self) {
        self.state.resending.store(false, Ordering::Relaxed);
    }

    /// Stop broadcasting and relaying peer information.
    pub fn stop_sharing_peers(&mut self) {
        self.state.sharing.store(false, Ordering::Relaxed);
    }

    /// Whether the receive loop is still running.
    pub fn is_running(&self) -> bool {
        self.receive_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// The transport's bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.state.transport.local_addr()?)
    }

    /// Find an existing peer for `endpoint` or register a new one.
    pub fn get_or_add_peer(&self, endpoint: SocketAddr) -> SharedPeer {
        self.state.get_or_add_peer(endpoint)
    }

    /// The peer registered for `endpoint`, if any.
    pub fn peer(&self, endpoint: SocketAddr) -> Option<SharedPeer> {
        self.state.peer(endpoint)
    }

    /// Endpoints of all currently known peers.
    pub fn peer_endpoints(&self) -> Vec<SocketAddr> {
        self.state.peers.iter().map(|entry| *entry.key()).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.state.peers.len()
    }

    /// Delivery counters for the peer at `endpoint`.
    pub async fn peer_stats(&self, endpoint: SocketAddr) -> Option<PeerStats> {
        let peer = self.state.peer(endpoint)?;
        let peer = peer.lock().await;
        Some(peer.stats())
    }

    /// Counters for this client's own traffic.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }

    /// Send a reliable packet: a fresh sequence is assigned unless the
    /// packet already carries one for retransmission tracking, the packet is
    /// sent once immediately and tracked until acknowledged. Further
    /// delivery attempts are driven by the retransmit loop.
    pub async fn send_reliable(&self, packet: &mut dyn Packet, peer: &SharedPeer) -> Result<usize> {
        self.state.send_reliable(packet, peer).await
    }

    /// Send a fire-and-forget packet: sequence forced to 0, sent once,
    /// never tracked or resent.
    pub async fn send_unreliable(
        &self,
        packet: &mut dyn Packet,
        peer: &SharedPeer,
    ) -> Result<usize> {
        self.state.send_unreliable(packet, peer).await
    }

    /// Send a packet to every known peer. A reliable broadcast assigns each
    /// peer its own fresh sequence.
    pub async fn broadcast(&self, packet: &mut dyn Packet, reliable: bool) -> Result<usize> {
        let snapshot: Vec<SharedPeer> = self
            .state
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut sent = 0;
        for peer in snapshot {
            if reliable {
                packet.set_sequence(0);
                sent += self.state.send_reliable(packet, &peer).await?;
            } else {
                sent += self.state.send_unreliable(packet, &peer).await?;
            }
        }
        Ok(sent)
    }

    /// Announce this node's own reachable endpoints (LAN, plus WAN when
    /// known) to `target`.
    pub async fn send_peer_info(&self, target: SocketAddr) -> Result<usize> {
        self.state.send_peer_info(target).await
    }
}

impl Drop for MeshClient {
    fn drop(&mut self) {
        self.state.resending.store(false, Ordering::Relaxed);
        self.state.sharing.store(false, Ordering::Relaxed);
        let _ = self.state.shutdown.send(true);
        for task in [
            self.receive_task.take(),
            self.resend_task.take(),
            self.discovery_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

impl ClientState {
    fn peer(&self, endpoint: SocketAddr) -> Option<SharedPeer> {
        self.peers.get(&endpoint).map(|entry| entry.value().clone())
    }

    fn get_or_add_peer(&self, endpoint: SocketAddr) -> SharedPeer {
        self.peers
            .entry(endpoint)
            .or_insert_with(|| {
                self.metrics.record_peer_discovered();
                debug!(peer = %endpoint, "registered new peer");
                Arc::new(Mutex::new(Peer::new(endpoint)))
            })
            .clone()
    }

    // --- send path ---

    async fn send_reliable(&self, packet: &mut dyn Packet, peer: &SharedPeer) -> Result<usize> {
        let (endpoint, bytes) = {
            let mut peer = peer.lock().await;
            if packet.sequence() == 0 {
                let sequence = peer.next_sequence();
                packet.set_sequence(sequence);
            }
            let bytes = packet.encode();
            peer.record_unacknowledged(packet.sequence(), bytes.clone());
            (peer.endpoint(), bytes)
        };
        self.metrics.record_reliable_sent();

        let sent = self.transport.send_to(&bytes, endpoint).await?;
        self.metrics.record_datagram_sent(sent);
        trace!(peer = %endpoint, sequence = packet.sequence(), "sent reliable packet");
        Ok(sent)
    }

    async fn send_unreliable(&self, packet: &mut dyn Packet, peer: &SharedPeer) -> Result<usize> {
        packet.set_sequence(0);
        let endpoint = peer.lock().await.endpoint();
        let bytes = packet.encode();
        let sent = self.transport.send_to(&bytes, endpoint).await?;
        self.metrics.record_datagram_sent(sent);
        Ok(sent)
    }

    async fn send_peer_info(&self, target: SocketAddr) -> Result<usize> {
        let lan = self.transport.local_addr()?;
        let mut sent = self
            .transport
            .send_to(&PeerInfo::from_endpoint(lan).encode(), target)
            .await?;
        self.metrics.record_datagram_sent(sent);

        if let Some(wan) = self.config.wan_endpoint {
            let bytes = PeerInfo::from_endpoint(wan).encode();
            let n = self.transport.send_to(&bytes, target).await?;
            self.metrics.record_datagram_sent(n);
            sent += n;
        }
        Ok(sent)
    }

    async fn send_ack(&self, to: SocketAddr, sequence: Sequence) {
        let bytes = Acknowledge::new(sequence).encode();
        match self.transport.send_to(&bytes, to).await {
            Ok(sent) => self.metrics.record_datagram_sent(sent),
            // The remote keeps retransmitting until an ack lands; a failed
            // ack send costs a duplicate, not delivery.
            Err(error) => warn!(peer = %to, %error, "failed to send acknowledgment"),
        }
    }

    // --- receive path ---

    async fn receive_loop(state: Arc<ClientState>) {
        let mut shutdown = state.shutdown.subscribe();
        let mut buf = vec![0u8; state.config.max_datagram_payload];

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                received = state.transport.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        state.metrics.record_datagram_received(len);
                        if let Err(error) = state.handle_datagram(from, &buf[..len]).await {
                            warn!(peer = %from, %error, "datagram remainder discarded");
                        }
                    }
                    Err(error) => {
                        warn!(%error, "receive failed");
                        // Pause so a persistent socket error cannot spin the loop.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
        debug!("receive loop stopped");
    }

    /// Process one datagram, which may contain several encoded packets
    /// back-to-back. The cursor advances by each packet's encoded size; an
    /// error discards the remainder and is reported to the caller, and a
    /// zero advance ends processing silently.
    async fn handle_datagram(&self, from: SocketAddr, datagram: &[u8]) -> Result<()> {
        let mut cursor = 0;
        while cursor < datagram.len() {
            let advanced = self.process_next_packet(from, &datagram[cursor..]).await?;
            if advanced == 0 {
                break;
            }
            cursor += advanced;
        }
        Ok(())
    }

    async fn process_next_packet(&self, from: SocketAddr, buffer: &[u8]) -> Result<usize> {
        let packet_type =
            packet::peek_type(buffer).ok_or_else(|| MeshError::malformed("truncated header"))?;

        match packet_type {
            PacketType::PeerInfo => self.handle_peer_info(from, buffer),
            PacketType::Acknowledge => self.handle_acknowledge(from, buffer).await,
            PacketType::Application(_) => self.handle_application(from, buffer).await,
        }
    }

    /// Peer info is the only packet kind trusted from unknown senders.
    fn handle_peer_info(&self, from: SocketAddr, buffer: &[u8]) -> Result<usize> {
        let info = PeerInfo::decode(buffer)
            .ok_or_else(|| MeshError::malformed("truncated peer info"))?;
        let reported = info.endpoint();

        // Wildcard endpoints are not valid peer addresses.
        if reported.ip().is_unspecified() || reported.port() == 0 {
            trace!(peer = %from, "ignored wildcard peer advertisement");
            return Ok(PeerInfo::SIZE);
        }

        // Our own advertisement reflected back at us.
        let lan = self.transport.local_addr().ok();
        if lan == Some(reported) || self.config.wan_endpoint == Some(reported) {
            trace!(peer = %from, "ignored advertisement of own endpoint");
            return Ok(PeerInfo::SIZE);
        }

        if from != reported {
            // The datagram source differs from the advertised endpoint
            // (relayed info, or a NAT rewrote the source). The observed
            // source is reachable, so track it as a peer too.
            self.get_or_add_peer(from);
        }
        self.get_or_add_peer(reported);
        Ok(PeerInfo::SIZE)
    }

    async fn handle_acknowledge(&self, from: SocketAddr, buffer: &[u8]) -> Result<usize> {
        let ack = Acknowledge::decode(buffer)
            .ok_or_else(|| MeshError::malformed("truncated acknowledge"))?;

        // Acknowledgments only matter from peers we know.
        let Some(peer) = self.peer(from) else {
            trace!(peer = %from, "dropped acknowledge from unknown peer");
            return Ok(Acknowledge::SIZE);
        };

        let mut peer = peer.lock().await;
        if peer.confirm_acknowledge(ack.acked_sequence) {
            self.metrics.record_reliable_acknowledged();
            debug!(peer = %from, sequence = ack.acked_sequence, "reliable packet acknowledged");
        }
        Ok(Acknowledge::SIZE)
    }

    async fn handle_application(&self, from: SocketAddr, buffer: &[u8]) -> Result<usize> {
        // Unsolicited non-handshake traffic is not trusted, and the size of
        // an untrusted payload cannot be known without decoding it.
        let Some(peer) = self.peer(from) else {
            trace!(peer = %from, "dropped application packet from unknown peer");
            return Ok(0);
        };

        let sequence = packet::peek_sequence(buffer)
            .ok_or_else(|| MeshError::malformed("truncated header"))?;

        if sequence == 0 {
            // Unordered path: straight to the application.
            return self.deliver(from, buffer);
        }

        let mut peer = peer.lock().await;
        if sequence != peer.expected_sequence() {
            // Out of order. Park the whole remainder: it belongs to the
            // same out-of-order unit and cannot be parsed until its
            // position in the stream is known.
            let stored = peer.buffer_out_of_order(sequence, Bytes::copy_from_slice(buffer));
            trace!(
                peer = %from,
                sequence,
                expected = peer.expected_sequence(),
                stored,
                "buffered out-of-order reliable packet"
            );
            return Ok(buffer.len());
        }

        let len = self.deliver(from, buffer)?;
        peer.advance_inbound();
        self.send_ack(from, sequence).await;
        self.drain_inbox(&mut peer).await?;
        Ok(len)
    }

    /// Hand the buffer head to the application; returns the delivered
    /// packet's encoded size so the caller can advance its cursor.
    fn deliver(&self, from: SocketAddr, buffer: &[u8]) -> Result<usize> {
        match (self.callback)(from, buffer) {
            Decoded::Packet(delivered) => {
                let len = delivered.encoded_len();
                if len == 0 || len > buffer.len() {
                    return Err(MeshError::malformed("packet size out of bounds"));
                }
                trace!(peer = %from, sequence = delivered.sequence(), "delivered application packet");
                Ok(len)
            }
            Decoded::Rejected => Err(MeshError::malformed("application rejected packet data")),
        }
    }

    /// After an in-order delivery, repeatedly hand out buffered packets that
    /// have become contiguous. Each buffered unit may hold several packets
    /// back-to-back; every one is delivered and acknowledged in turn.
    async fn drain_inbox(&self, peer: &mut Peer) -> Result<()> {
        while let Some(buffered) = peer.take_pending() {
            let mut cursor = 0;
            while cursor < buffered.len() {
                match (self.callback)(peer.endpoint(), &buffered[cursor..]) {
                    Decoded::Packet(delivered) => {
                        let len = delivered.encoded_len();
                        if len == 0 || cursor + len > buffered.len() {
                            return Err(MeshError::malformed("buffered packet size out of bounds"));
                        }
                        peer.advance_inbound();
                        self.send_ack(peer.endpoint(), delivered.sequence()).await;
                        cursor += len;
                    }
                    Decoded::Rejected => {
                        return Err(MeshError::malformed("application rejected buffered data"));
                    }
                }
            }
        }
        Ok(())
    }

    // --- retransmit loop ---

    async fn resend_loop(state: Arc<ClientState>) {
        while state.resending.load(Ordering::Relaxed) {
            let snapshot: Vec<SharedPeer> = state
                .peers
                .iter()
                .map(|entry| entry.value().clone())
                .collect();

            if snapshot.is_empty() {
                tokio::time::sleep(state.config.resend_pace).await;
                continue;
            }

            for peer in snapshot {
                state.resend_pass(&peer).await;
                // Fixed pause per peer: with many peers, the last peer's
                // retransmissions wait the sum of all earlier pauses.
                tokio::time::sleep(state.config.resend_pace).await;
            }
        }
        debug!("retransmit loop stopped");
    }

    /// One retransmit pass for one peer: every still-unacknowledged packet
    /// is attempted once, coalesced into datagrams no larger than the
    /// configured payload. Nothing is removed here; only acknowledgment
    /// processing drops entries.
    async fn resend_pass(&self, peer: &SharedPeer) {
        let (endpoint, packets) = {
            let peer = peer.lock().await;
            (peer.endpoint(), peer.unacknowledged_snapshot())
        };
        if packets.is_empty() {
            return;
        }

        for frame in pack_frames(&packets, self.config.max_datagram_payload) {
            match self.transport.send_to(&frame, endpoint).await {
                Ok(sent) => {
                    self.metrics.record_datagram_sent(sent);
                    self.metrics.record_retransmitted_frame();
                    trace!(peer = %endpoint, bytes = sent, "retransmitted frame");
                }
                Err(error) => warn!(peer = %endpoint, %error, "retransmit send failed"),
            }
            buffer_pool::try_put_frame(frame);
        }
    }

    // --- discovery loop ---

    async fn discovery_loop(state: Arc<ClientState>) {
        while state.sharing.load(Ordering::Relaxed) {
            if let Err(error) = state.discovery_round().await {
                warn!(%error, "discovery round failed");
            }
            tokio::time::sleep(state.config.discovery_interval).await;
        }
        debug!("discovery loop stopped");
    }

    /// One discovery round: announce ourselves on the local subnet and to a
    /// configured dedicated server, then relay every known peer to every
    /// other known peer. Individual send failures never end the round.
    async fn discovery_round(&self) -> Result<()> {
        let local = self.transport.local_addr()?;

        if let IpAddr::V4(local_v4) = local.ip() {
            let broadcast = discovery::broadcast_address(local_v4, self.transport.subnet_mask()?);
            let target = SocketAddr::new(IpAddr::V4(broadcast), self.config.port);
            if let Err(error) = self.send_peer_info(target).await {
                debug!(%error, "broadcast announcement failed");
            }
        }

        if let Some(server) = self.config.dedicated_server {
            if let Err(error) = self.send_peer_info(server).await {
                debug!(server = %server, %error, "dedicated server announcement failed");
            }
        }

        let endpoints: Vec<SocketAddr> = self.peers.iter().map(|entry| *entry.key()).collect();
        for (about, to) in discovery::relay_pairs(&endpoints) {
            let bytes = PeerInfo::from_endpoint(about).encode();
            match self.transport.send_to(&bytes, to).await {
                Ok(sent) => self.metrics.record_datagram_sent(sent),
                Err(error) => debug!(about = %about, to = %to, %error, "peer relay failed"),
            }
        }

        Ok(())
    }
}

/// Pack encoded packets into frames no larger than `max_payload`, in the
/// order given. A packet that alone exceeds the limit is skipped.
fn pack_frames(packets: &[Bytes], max_payload: usize) -> Vec<BytesMut> {
    let mut frames = Vec::new();
    let mut frame = buffer_pool::try_get_frame();

    for bytes in packets {
        if bytes.len() > max_payload {
            warn!(
                size = bytes.len(),
                max = max_payload,
                "unacknowledged packet exceeds datagram payload, skipped"
            );
            continue;
        }
        if frame.len() + bytes.len() > max_payload {
            frames.push(frame);
            frame = buffer_pool::try_get_frame();
        }
        frame.extend_from_slice(bytes);
    }

    if frame.is_empty() {
        buffer_pool::try_put_frame(frame);
    } else {
        frames.push(frame);
    }
    frames
}
