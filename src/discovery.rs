//! Broadcast and peer-relay math for the discovery loop

use std::net::{Ipv4Addr, SocketAddr};

/// Compute the subnet broadcast address for `local` under `mask`:
/// each address octet ORed with the inverted mask octet.
pub fn broadcast_address(local: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    let local = local.octets();
    let mask = mask.octets();
    let mut broadcast = [0u8; 4];
    for i in 0..broadcast.len() {
        broadcast[i] = local[i] | !mask[i];
    }
    Ipv4Addr::from(broadcast)
}

/// Plan one relay round: every peer's endpoint is shared with every *other*
/// peer, so peers that cannot see each other's broadcasts still learn about
/// each other through a common peer. O(n²) per round.
pub fn relay_pairs(peers: &[SocketAddr]) -> Vec<(SocketAddr, SocketAddr)> {
    let mut pairs = Vec::with_capacity(peers.len().saturating_sub(1) * peers.len());
    for &about in peers {
        for &to in peers {
            if about != to {
                pairs.push((about, to));
            }
        }
    }
    pairs
}
