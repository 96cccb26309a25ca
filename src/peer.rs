//! Per-peer session state: sequencing, retransmission tracking and the
//! reorder inbox.

use crate::packet::Sequence;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// One remote endpoint this client has discovered.
///
/// Identity is the endpoint (address + port). A peer is created lazily the
/// first time its endpoint is seen and retained for the client lifetime;
/// this core has no eviction or liveness detection, so `packets_lost` is
/// defined but nothing increments it.
#[derive(Debug)]
pub struct Peer {
    endpoint: SocketAddr,
    /// Next sequence to assign to an outbound reliable packet. Starts at 1;
    /// 0 is reserved for unreliable packets.
    next_outbound_sequence: Sequence,
    /// Sequence the next in-order inbound reliable packet must carry.
    next_inbound_sequence: Sequence,
    /// Encoded reliable packets awaiting acknowledgment, keyed by sequence.
    /// Ordered so retransmit frames pack sequences in ascending order.
    unacknowledged: BTreeMap<Sequence, Bytes>,
    /// Reliable packets received ahead of their turn, keyed by sequence.
    /// Values hold the whole datagram remainder they arrived in.
    inbox: HashMap<Sequence, Bytes>,
    reliable_sent: u64,
    reliable_acknowledged: u64,
    packets_lost: u64,
}

/// Read-only snapshot of a peer's delivery counters.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerStats {
    pub endpoint: SocketAddr,
    pub reliable_sent: u64,
    pub reliable_acknowledged: u64,
    pub packets_lost: u64,
    pub packet_loss: f32,
    pub unacknowledged: usize,
    pub inbox_pending: usize,
}

impl Peer {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            next_outbound_sequence: 1,
            next_inbound_sequence: 1,
            unacknowledged: BTreeMap::new(),
            inbox: HashMap::new(),
            reliable_sent: 0,
            reliable_acknowledged: 0,
            packets_lost: 0,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Returns the current outbound sequence and advances the counter.
    /// Called once per reliable send.
    pub fn next_sequence(&mut self) -> Sequence {
        let sequence = self.next_outbound_sequence;
        self.next_outbound_sequence += 1;
        sequence
    }

    /// Track an encoded reliable packet until it is acknowledged.
    /// Called once per reliable send, right when the packet is transmitted.
    pub fn record_unacknowledged(&mut self, sequence: Sequence, bytes: Bytes) {
        self.unacknowledged.insert(sequence, bytes);
        self.reliable_sent += 1;
    }

    /// Drop the tracked packet for `sequence` if present. Duplicate or stale
    /// acknowledgments are a no-op. Returns whether an entry was removed.
    pub fn confirm_acknowledge(&mut self, sequence: Sequence) -> bool {
        if self.unacknowledged.remove(&sequence).is_some() {
            self.reliable_acknowledged += 1;
            true
        } else {
            false
        }
    }

    /// The sequence the next in-order reliable packet must carry.
    pub fn expected_sequence(&self) -> Sequence {
        self.next_inbound_sequence
    }

    /// Advance past one delivered in-order reliable packet.
    pub fn advance_inbound(&mut self) {
        self.next_inbound_sequence += 1;
    }

    /// Hold an out-of-order datagram remainder until its turn. Never
    /// overwrites a pending copy for the same sequence (the remote resends
    /// until acknowledged, so duplicates are expected). Returns whether the
    /// bytes were stored.
    pub fn buffer_out_of_order(&mut self, sequence: Sequence, bytes: Bytes) -> bool {
        if self.inbox.contains_key(&sequence) {
            return false;
        }
        self.inbox.insert(sequence, bytes);
        true
    }

    /// Remove and return the buffered bytes for the expected sequence, if
    /// the gap has closed.
    pub fn take_pending(&mut self) -> Option<Bytes> {
        self.inbox.remove(&self.next_inbound_sequence)
    }

    /// Snapshot of the unacknowledged packets in ascending sequence order.
    /// `Bytes` clones are reference-counted, so this is cheap; the
    /// retransmit loop sends from the snapshot without holding the peer.
    pub fn unacknowledged_snapshot(&self) -> Vec<Bytes> {
        self.unacknowledged.values().cloned().collect()
    }

    pub fn unacknowledged_len(&self) -> usize {
        self.unacknowledged.len()
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn reliable_sent(&self) -> u64 {
        self.reliable_sent
    }

    pub fn reliable_acknowledged(&self) -> u64 {
        self.reliable_acknowledged
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    /// Ratio of lost to sent reliable packets; 0.0 before anything was sent.
    pub fn packet_loss(&self) -> f32 {
        if self.reliable_sent == 0 {
            0.0
        } else {
            self.packets_lost as f32 / self.reliable_sent as f32
        }
    }

    pub fn stats(&self) -> PeerStats {
        PeerStats {
            endpoint: self.endpoint,
            reliable_sent: self.reliable_sent,
            reliable_acknowledged: self.reliable_acknowledged,
            packets_lost: self.packets_lost,
            packet_loss: self.packet_loss(),
            unacknowledged: self.unacknowledged.len(),
            inbox_pending: self.inbox.len(),
        }
    }
}
