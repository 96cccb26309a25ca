//! Reliable packets arriving out of order are delivered in order, once each.

mod common;

use common::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use udpmesh::{MeshClient, MeshConfig, Packet, Transport};

const RECEIVER: &str = "192.168.10.125:12345";
const SENDER: &str = "192.168.10.126:12346";

fn receiver_client(
    hub: &Arc<MemoryHub>,
) -> (
    MeshClient,
    mpsc::UnboundedReceiver<(SocketAddr, TestPacket)>,
) {
    let transport = Arc::new(hub.attach(RECEIVER.parse().unwrap()));
    let (tx, rx) = mpsc::unbounded_channel();
    let client =
        MeshClient::with_transport(transport, capture_callback(tx), MeshConfig::new()).unwrap();
    // The sender must already be a known peer; unsolicited application
    // traffic is dropped.
    client.get_or_add_peer(SENDER.parse().unwrap());
    (client, rx)
}

#[tokio::test]
async fn test_out_of_order_arrival_delivers_in_order() {
    let hub = MemoryHub::new();
    let (mut client, mut deliveries) = receiver_client(&hub);
    client.start().unwrap();

    let sender = hub.attach(SENDER.parse().unwrap());
    let receiver_addr: SocketAddr = RECEIVER.parse().unwrap();

    // Arrival order 1, 3, 4, 3 (duplicate resend), 2.
    for sequence in [1, 3, 4, 3, 2] {
        let frame = TestPacket::new(sequence, sequence * 100).encode();
        sender.send_to(&frame, receiver_addr).await.unwrap();
    }

    let mut observed = Vec::new();
    while observed.len() < 4 {
        let (from, delivered) = timeout(Duration::from_secs(5), deliveries.recv())
            .await
            .expect("delivery timed out")
            .expect("delivery channel closed");
        assert_eq!(from, SENDER.parse::<SocketAddr>().unwrap());
        assert_eq!(delivered.value, delivered.sequence * 100);
        observed.push(delivered.sequence);
    }
    assert_eq!(observed, vec![1, 2, 3, 4]);

    // The duplicate of 3 must not surface a fifth delivery.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(deliveries.try_recv().is_err());

    client.stop();
}

#[tokio::test]
async fn test_unreliable_packets_bypass_ordering() {
    let hub = MemoryHub::new();
    let (mut client, mut deliveries) = receiver_client(&hub);
    client.start().unwrap();

    let sender = hub.attach(SENDER.parse().unwrap());
    let receiver_addr: SocketAddr = RECEIVER.parse().unwrap();

    // Sequence 5 is far ahead and parks in the inbox; the unreliable packet
    // behind it must still be delivered immediately.
    sender
        .send_to(&TestPacket::new(5, 500).encode(), receiver_addr)
        .await
        .unwrap();
    sender
        .send_to(&TestPacket::new(0, 42).encode(), receiver_addr)
        .await
        .unwrap();

    let (_, delivered) = timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .expect("delivery timed out")
        .expect("delivery channel closed");
    assert_eq!(delivered.sequence, 0);
    assert_eq!(delivered.value, 42);

    // The reliable packet is still waiting for its predecessors.
    let stats = client
        .peer_stats(SENDER.parse().unwrap())
        .await
        .expect("sender peer missing");
    assert_eq!(stats.inbox_pending, 1);

    client.stop();
}

#[tokio::test]
async fn test_unknown_peer_traffic_is_dropped() {
    let hub = MemoryHub::new();
    let (mut client, mut deliveries) = receiver_client(&hub);
    client.start().unwrap();

    let stranger = hub.attach("192.168.10.200:9999".parse().unwrap());
    let receiver_addr: SocketAddr = RECEIVER.parse().unwrap();
    stranger
        .send_to(&TestPacket::new(1, 7).encode(), receiver_addr)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(deliveries.try_recv().is_err());
    // The stranger was not registered either.
    assert!(client.peer("192.168.10.200:9999".parse().unwrap()).is_none());

    client.stop();
}
