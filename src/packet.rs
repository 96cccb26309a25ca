//! Packet tag space and the binary codec shared by every packet kind.
//!
//! Every packet starts with the same fixed header: a 4-byte little-endian
//! type tag followed by a 4-byte little-endian sequence number. A sequence of
//! 0 marks a fire-and-forget packet; a positive sequence marks the Nth
//! reliable packet from its sender (1-based). The tag and sequence can be
//! read from any buffer without knowing the concrete kind, which is how the
//! client routes protocol packets before the application sees them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// Protocol constants
pub mod constants {
    /// Well-known mesh port; dedicated hosts bind it, discovery broadcasts to it.
    pub const DEFAULT_PORT: u16 = 11230;
    /// Maximum coalesced datagram payload. Fits a standard Ethernet MTU with
    /// headroom for IP/UDP overhead.
    pub const MAX_DATAGRAM_PAYLOAD: usize = 1380;
    /// Size of the shared `[type][sequence]` header.
    pub const HEADER_SIZE: usize = 8;
    /// Number of protocol-reserved tags. Application tags are
    /// `NUM_TYPES + k` for `k >= 1`.
    pub const NUM_TYPES: i32 = 2;
}

/// Sequence number type (wire: 4-byte little-endian signed int)
pub type Sequence = i32;

/// Packet type tag. The tag space is open: two reserved protocol tags, then
/// application-defined tags above the [`constants::NUM_TYPES`] sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Endpoint advertisement used by peer discovery
    PeerInfo,
    /// Acknowledgment of a reliable packet
    Acknowledge,
    /// Application-defined tag; the raw value must exceed `NUM_TYPES`
    Application(i32),
}

impl PacketType {
    /// Map a raw wire tag to a packet type. Total: unknown values become
    /// `Application`, the receive path decides whether to trust them.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => PacketType::PeerInfo,
            1 => PacketType::Acknowledge,
            other => PacketType::Application(other),
        }
    }

    /// The raw wire tag for this type.
    pub fn raw(&self) -> i32 {
        match self {
            PacketType::PeerInfo => 0,
            PacketType::Acknowledge => 1,
            PacketType::Application(raw) => *raw,
        }
    }

    /// Whether this tag is reserved for protocol-internal packets.
    pub fn is_reserved(&self) -> bool {
        matches!(self, PacketType::PeerInfo | PacketType::Acknowledge)
    }
}

/// A packet that can serialize itself to a fixed-size buffer whose first
/// bytes are always `[type][sequence]`.
///
/// Implementations are transient: constructed per send or receive, never
/// persisted. `encoded_len` must return the exact encoded size for the kind
/// so receivers can cursor through coalesced datagrams.
pub trait Packet: fmt::Debug + Send {
    /// The tag written at offset 0 of the encoding. Fixed per concrete kind.
    fn packet_type(&self) -> PacketType;

    /// Sequence number: 0 for unreliable, >0 for reliable in-order delivery.
    fn sequence(&self) -> Sequence;

    /// Set the sequence number (assigned per peer on reliable sends).
    fn set_sequence(&mut self, sequence: Sequence);

    /// Exact encoded size in bytes for this kind.
    fn encoded_len(&self) -> usize;

    /// Serialize to the wire format: shared header, then kind-specific
    /// fields in a stable order.
    fn encode(&self) -> Bytes;
}

/// Write the shared header into `buf`.
pub fn encode_header(buf: &mut BytesMut, packet_type: PacketType, sequence: Sequence) {
    buf.put_i32_le(packet_type.raw());
    buf.put_i32_le(sequence);
}

/// Read the type tag at offset 0 without knowing the concrete kind.
/// Returns `None` for buffers shorter than the shared header.
pub fn peek_type(buf: &[u8]) -> Option<PacketType> {
    if buf.len() < constants::HEADER_SIZE {
        return None;
    }
    let raw = i32::from_le_bytes(buf[0..4].try_into().ok()?);
    Some(PacketType::from_raw(raw))
}

/// Read the sequence number at offset 4 without knowing the concrete kind.
/// Returns `None` for buffers shorter than the shared header.
pub fn peek_sequence(buf: &[u8]) -> Option<Sequence> {
    if buf.len() < constants::HEADER_SIZE {
        return None;
    }
    Some(i32::from_le_bytes(buf[4..8].try_into().ok()?))
}

/// Advertises one endpoint (IPv4 address + port) at which a node can be
/// reached. Sent unreliably by the discovery loop, both as a LAN broadcast
/// and relayed between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub sequence: Sequence,
    pub port: u16,
    pub address: [u8; 4],
}

impl PeerInfo {
    /// Encoded size: header + port (4) + address octets (4).
    pub const SIZE: usize = constants::HEADER_SIZE + 4 + 4;

    /// Advertise `endpoint`. Only IPv4 endpoints can be expressed on the
    /// wire; an IPv6 address encodes as unspecified and is ignored by
    /// receivers.
    pub fn from_endpoint(endpoint: SocketAddr) -> Self {
        let address = match endpoint.ip() {
            IpAddr::V4(v4) => v4.octets(),
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED.octets(),
        };
        Self {
            sequence: 0,
            port: endpoint.port(),
            address,
        }
    }

    /// The endpoint this packet advertises.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(self.address), self.port))
    }

    /// Decode from a buffer whose tag is `PeerInfo`. Callers peek the tag
    /// first; a mismatched tag or short buffer yields `None`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE || peek_type(buf)? != PacketType::PeerInfo {
            return None;
        }
        let sequence = peek_sequence(buf)?;
        let mut body = &buf[constants::HEADER_SIZE..Self::SIZE];
        let port = body.get_i32_le() as u16;
        let mut address = [0u8; 4];
        body.copy_to_slice(&mut address);
        Some(Self {
            sequence,
            port,
            address,
        })
    }
}

impl Packet for PeerInfo {
    fn packet_type(&self) -> PacketType {
        PacketType::PeerInfo
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
        encode_header(&mut buf, self.packet_type(), self.sequence);
        buf.put_i32_le(self.port as i32);
        buf.put_slice(&self.address);
        buf.freeze()
    }
}

/// Acknowledges receipt of one reliable packet by its sequence number.
/// Always sent unreliably; the sender stops retransmitting on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    pub sequence: Sequence,
    pub acked_sequence: Sequence,
}

impl Acknowledge {
    /// Encoded size: header + acknowledged sequence (4).
    pub const SIZE: usize = constants::HEADER_SIZE + 4;

    pub fn new(acked_sequence: Sequence) -> Self {
        Self {
            sequence: 0,
            acked_sequence,
        }
    }

    /// Decode from a buffer whose tag is `Acknowledge`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE || peek_type(buf)? != PacketType::Acknowledge {
            return None;
        }
        let sequence = peek_sequence(buf)?;
        let mut body = &buf[constants::HEADER_SIZE..Self::SIZE];
        let acked_sequence = body.get_i32_le();
        Some(Self {
            sequence,
            acked_sequence,
        })
    }
}

impl Packet for Acknowledge {
    fn packet_type(&self) -> PacketType {
        PacketType::Acknowledge
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
        encode_header(&mut buf, self.packet_type(), self.sequence);
        buf.put_i32_le(self.acked_sequence);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_space_mapping() {
        assert_eq!(PacketType::from_raw(0), PacketType::PeerInfo);
        assert_eq!(PacketType::from_raw(1), PacketType::Acknowledge);
        assert_eq!(
            PacketType::from_raw(constants::NUM_TYPES + 1),
            PacketType::Application(3)
        );
        assert!(PacketType::PeerInfo.is_reserved());
        assert!(!PacketType::Application(7).is_reserved());
        assert_eq!(PacketType::Application(42).raw(), 42);
    }

    #[test]
    fn test_peer_info_round_trip() {
        let info = PeerInfo {
            sequence: 5,
            port: 21,
            address: [127, 0, 0, 1],
        };
        let buf = info.encode();
        assert_eq!(buf.len(), PeerInfo::SIZE);

        let decoded = PeerInfo::decode(&buf).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_peer_info_boundary_octets() {
        for (address, sequence) in [([0u8, 0, 0, 0], 0), ([255u8, 255, 255, 255], i32::MAX)] {
            let info = PeerInfo {
                sequence,
                port: 65535,
                address,
            };
            let decoded = PeerInfo::decode(&info.encode()).unwrap();
            assert_eq!(decoded.address, address);
            assert_eq!(decoded.sequence, sequence);
            assert_eq!(decoded.port, 65535);
        }
    }

    #[test]
    fn test_acknowledge_round_trip() {
        let ack = Acknowledge {
            sequence: 3,
            acked_sequence: 2,
        };
        let decoded = Acknowledge::decode(&ack.encode()).unwrap();
        assert_eq!(decoded, ack);
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let info = PeerInfo {
            sequence: 1,
            port: 11230,
            address: [192, 168, 0, 27],
        };
        let buf = info.encode();
        // [type=0][sequence=1][port=11230][octets]
        assert_eq!(&buf[0..4], &0i32.to_le_bytes());
        assert_eq!(&buf[4..8], &1i32.to_le_bytes());
        assert_eq!(&buf[8..12], &11230i32.to_le_bytes());
        assert_eq!(&buf[12..16], &[192, 168, 0, 27]);
    }

    #[test]
    fn test_peek_from_fixed_offsets() {
        let ack = Acknowledge::new(9);
        let buf = ack.encode();
        assert_eq!(peek_type(&buf), Some(PacketType::Acknowledge));
        assert_eq!(peek_sequence(&buf), Some(0));

        // Short buffers yield nothing rather than panicking.
        assert_eq!(peek_type(&buf[..4]), None);
        assert_eq!(peek_sequence(&buf[..7]), None);
    }

    #[test]
    fn test_decode_rejects_wrong_tag() {
        let info = PeerInfo::from_endpoint("10.0.0.1:2000".parse().unwrap());
        assert!(Acknowledge::decode(&info.encode()).is_none());
        assert!(PeerInfo::decode(&Acknowledge::new(1).encode()).is_none());
    }

    #[test]
    fn test_endpoint_conversion() {
        let endpoint: SocketAddr = "192.168.10.126:12346".parse().unwrap();
        let info = PeerInfo::from_endpoint(endpoint);
        assert_eq!(info.endpoint(), endpoint);
    }
}
