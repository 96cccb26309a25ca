//! Shared test plumbing: an in-memory datagram hub standing in for UDP, and
//! a small application packet kind.

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use udpmesh::transport::{RecvFuture, SendFuture};
use udpmesh::{constants, packet, Decoded, Packet, PacketCallback, PacketType, Sequence, Transport};

/// Subnet mask used by all hub endpoints.
pub const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

type Inbox = mpsc::UnboundedSender<(Bytes, SocketAddr)>;

/// An in-memory network: every attached endpoint gets a queue, sends are
/// routed by address, and a `x.x.x.255` target fans out to every endpoint
/// on the matching port except the sender.
pub struct MemoryHub {
    endpoints: Mutex<HashMap<SocketAddr, Inbox>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a new endpoint to the hub.
    pub fn attach(self: &Arc<Self>, addr: SocketAddr) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.lock().unwrap().insert(addr, tx);
        MemoryTransport {
            addr,
            hub: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn deliver(&self, frame: &[u8], from: SocketAddr, to: SocketAddr) {
        let endpoints = self.endpoints.lock().unwrap();
        if is_broadcast(to) {
            for (addr, tx) in endpoints.iter() {
                if *addr != from && addr.port() == to.port() {
                    let _ = tx.send((Bytes::copy_from_slice(frame), from));
                }
            }
        } else if let Some(tx) = endpoints.get(&to) {
            let _ = tx.send((Bytes::copy_from_slice(frame), from));
        }
    }
}

fn is_broadcast(addr: SocketAddr) -> bool {
    matches!(addr.ip(), IpAddr::V4(v4) if v4.octets()[3] == 255)
}

/// [`Transport`] implementation backed by a [`MemoryHub`].
pub struct MemoryTransport {
    addr: SocketAddr,
    hub: Arc<MemoryHub>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
}

impl Transport for MemoryTransport {
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendFuture<'a> {
        Box::pin(async move {
            self.hub.deliver(buf, self.addr, target);
            Ok(buf.len())
        })
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            match rx.recv().await {
                Some((frame, from)) => {
                    let len = frame.len().min(buf.len());
                    buf[..len].copy_from_slice(&frame[..len]);
                    Ok((len, from))
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "hub closed")),
            }
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn subnet_mask(&self) -> io::Result<Ipv4Addr> {
        Ok(MASK)
    }
}

/// First application tag after the reserved range.
pub const TEST_TAG: i32 = constants::NUM_TYPES + 1;

/// Minimal application packet: header plus one i32 payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPacket {
    pub sequence: Sequence,
    pub value: i32,
}

impl TestPacket {
    pub const SIZE: usize = constants::HEADER_SIZE + 4;

    pub fn new(sequence: Sequence, value: i32) -> Self {
        Self { sequence, value }
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE || packet::peek_type(buf)? != PacketType::Application(TEST_TAG) {
            return None;
        }
        let sequence = packet::peek_sequence(buf)?;
        let value = i32::from_le_bytes(buf[constants::HEADER_SIZE..Self::SIZE].try_into().ok()?);
        Some(Self { sequence, value })
    }
}

impl Packet for TestPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Application(TEST_TAG)
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
        buf.put_i32_le(self.value);
        buf.freeze()
    }
}

/// Callback that decodes [`TestPacket`]s and mirrors every delivery into a
/// channel for assertions.
pub fn capture_callback(
    deliveries: mpsc::UnboundedSender<(SocketAddr, TestPacket)>,
) -> PacketCallback {
    Arc::new(
        move |from: SocketAddr, buffer: &[u8]| match TestPacket::decode(buffer) {
            Some(decoded) => {
                let _ = deliveries.send((from, decoded.clone()));
                Decoded::Packet(Box::new(decoded))
            }
            None => Decoded::Rejected,
        },
    )
}

/// Callback for clients whose application traffic is irrelevant to the test.
pub fn reject_callback() -> PacketCallback {
    Arc::new(|_: SocketAddr, _: &[u8]| Decoded::Rejected)
}
