//! # udpmesh - Peer-to-Peer UDP Transport
//!
//! Best-effort and reliable, ordered message delivery over UDP between a
//! dynamically discovered set of peers, with no central authority required
//! (one peer may be flagged dedicated).
//!
//! ## Features
//!
//! - **Reliable ordered delivery**: per-peer sequencing, acknowledgment,
//!   retransmission and receiver-side reordering
//! - **LAN discovery**: subnet broadcast plus full peer relay, so peers that
//!   cannot see each other's broadcasts still meet through a common peer
//! - **Datagram coalescing**: retransmissions pack as many packets as fit
//!   under a safe UDP payload size
//! - **Injected transport**: the datagram socket is a trait, so tests run
//!   over an in-memory network
//! - **Observability**: `tracing` instrumentation and per-client counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use udpmesh::{Decoded, MeshClient, MeshConfig};
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let callback = Arc::new(|_from: SocketAddr, _buffer: &[u8]| Decoded::Rejected);
//!     let mut client = MeshClient::bind(callback, MeshConfig::new()).await?;
//!     client.start()?;
//!
//!     // ... exchange packets with discovered peers ...
//!
//!     client.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   Application        │  callback: (addr, bytes) -> Decoded
//! ├──────────────────────┤
//! │   MeshClient         │  receive / retransmit / discovery loops
//! ├──────────────────────┤
//! │   Peer sessions      │  sequencing, ack tracking, reorder inbox
//! ├──────────────────────┤
//! │   Packet codec       │  [type][sequence] framing
//! ├──────────────────────┤
//! │   Transport          │  UDP socket (or in-memory test hub)
//! └──────────────────────┘
//! ```

pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod peer;
pub mod transport;

// Re-exports
pub use client::{Decoded, MeshClient, PacketCallback, SharedPeer};
pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use metrics::MetricsSnapshot;
pub use packet::{constants, Acknowledge, Packet, PacketType, PeerInfo, Sequence};
pub use peer::{Peer, PeerStats};
pub use transport::{Transport, UdpTransport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
