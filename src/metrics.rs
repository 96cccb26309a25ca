//! Delivery counters for one client, kept as lock-free atomics so every
//! loop can record without coordination.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the receive, retransmit and discovery loops.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    reliable_sent: AtomicU64,
    reliable_acknowledged: AtomicU64,
    retransmitted_frames: AtomicU64,
    peers_discovered: AtomicU64,
}

/// Point-in-time copy of a client's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reliable_sent: u64,
    pub reliable_acknowledged: u64,
    pub retransmitted_frames: u64,
    pub peers_discovered: u64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_datagram_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_datagram_received(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_reliable_sent(&self) {
        self.reliable_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reliable_acknowledged(&self) {
        self.reliable_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmitted_frame(&self) {
        self.retransmitted_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peer_discovered(&self) {
        self.peers_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reliable_sent: self.reliable_sent.load(Ordering::Relaxed),
            reliable_acknowledged: self.reliable_acknowledged.load(Ordering::Relaxed),
            retransmitted_frames: self.retransmitted_frames.load(Ordering::Relaxed),
            peers_discovered: self.peers_discovered.load(Ordering::Relaxed),
        }
    }
}
