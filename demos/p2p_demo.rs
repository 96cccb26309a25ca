//! Peer-to-peer networking demo: one dedicated host, any number of clients.
//!
//! Run the dedicated host first, then clients pointed at its address:
//!
//! ```text
//! p2p_demo dedicated
//! p2p_demo client 192.168.0.27:11230
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use udpmesh::{constants, packet, Decoded, MeshClient, MeshConfig, Packet, PacketType, Sequence};

/// Demo application packet: one i32 payload after the shared header.
#[derive(Debug, Clone)]
struct ScorePacket {
    sequence: Sequence,
    score: i32,
}

const SCORE_TAG: i32 = constants::NUM_TYPES + 1;

impl ScorePacket {
    const SIZE: usize = constants::HEADER_SIZE + 4;

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE || packet::peek_type(buf)? != PacketType::Application(SCORE_TAG) {
            return None;
        }
        Some(Self {
            sequence: packet::peek_sequence(buf)?,
            score: i32::from_le_bytes(buf[constants::HEADER_SIZE..Self::SIZE].try_into().ok()?),
        })
    }
}

impl Packet for ScorePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Application(SCORE_TAG)
    }

    fn sequence(&self) -> Sequence {
        self.sequence
    }

    fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
    }

    fn encoded_len(&self) -> usize {
        Self::SIZE
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        packet::encode_header(&mut buf, self.packet_type(), self.sequence);
        buf.put_i32_le(self.score);
        buf.freeze()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <dedicated|client> [server-address]", args[0]);
        eprintln!("Example: {} dedicated", args[0]);
        eprintln!("Example: {} client 192.168.0.27:11230", args[0]);
        return Ok(());
    }

    let callback = Arc::new(|from: SocketAddr, buffer: &[u8]| match ScorePacket::decode(buffer) {
        Some(decoded) => {
            info!(peer = %from, score = decoded.score, "score received");
            Decoded::Packet(Box::new(decoded) as Box<dyn Packet>)
        }
        None => Decoded::Rejected,
    });

    match args[1].as_str() {
        "dedicated" => {
            let mut host = MeshClient::bind(callback, MeshConfig::dedicated_host()).await?;
            host.start()?;
            info!(addr = %host.local_addr()?, "dedicated host listening");

            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                info!(peers = host.peer_count(), "known peers");
            }
        }
        "client" => {
            let server: SocketAddr = args
                .get(2)
                .ok_or("client mode needs a server address")?
                .parse()?;

            let config = MeshConfig::new().dedicated_server(server);
            let mut client = MeshClient::bind(callback, config).await?;
            client.start()?;
            info!(addr = %client.local_addr()?, server = %server, "client started");

            let mut score = 0;
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                score += 10;
                let mut packet = ScorePacket { sequence: 0, score };
                match client.broadcast(&mut packet, true).await {
                    Ok(bytes) => info!(score, bytes, peers = client.peer_count(), "score broadcast"),
                    Err(error) => warn!(%error, "broadcast failed"),
                }
            }
        }
        other => {
            eprintln!("Unknown mode '{other}'; use 'dedicated' or 'client'");
            Ok(())
        }
    }
}
