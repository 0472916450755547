//! End-to-end tests over real TCP.
//!
//! Each test binds a broker on `127.0.0.1:0`, connects plain `TcpStream`
//! clients and speaks the wire protocol through `lanmq-core`'s codec, the
//! same way the camera pipeline, the controller and the dashboards do.
//!
//! ```text
//! client A ──┐
//! client B ──┼──► Acceptor ──► Session ──► Broker (registries, fan-out)
//! client C ──┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lanmq_broker::application::Broker;
use lanmq_broker::domain::BrokerConfig;
use lanmq_broker::infrastructure::network::{Acceptor, NetworkError};
use lanmq_core::protocol::{
    decode_packet, encode_packet, ConnAckPacket, ConnectPacket, Packet, PublishPacket, QoS,
    SubscribePacket, SubscribeReturnCode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
/// How long a client waits before concluding that nothing is coming.
const SILENCE: Duration = Duration::from_millis(200);

// ── Harness ───────────────────────────────────────────────────────────────────

struct TestBroker {
    broker: Arc<Broker>,
    addr: SocketAddr,
    run: JoinHandle<Result<(), NetworkError>>,
}

fn start_broker() -> TestBroker {
    let config = BrokerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        shutdown_grace: Duration::from_secs(2),
        ..BrokerConfig::default()
    };
    let broker = Arc::new(Broker::new(config, CancellationToken::new()));
    let acceptor = Acceptor::bind(Arc::clone(&broker)).expect("bind loopback listener");
    let addr = acceptor.local_addr().expect("local addr");
    let run = tokio::spawn(acceptor.run());
    TestBroker { broker, addr, run }
}

/// A raw TCP client with its own receive buffer.
struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to broker");
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Opens a connection and completes the CONNECT/CONNACK handshake.
    async fn connect(addr: SocketAddr, client_id: &str) -> Self {
        let mut client = Self::open(addr).await;
        client
            .send(Packet::Connect(ConnectPacket::new(client_id, 0)))
            .await;
        assert_eq!(
            client.recv().await,
            Packet::ConnAck(ConnAckPacket::accepted())
        );
        client
    }

    async fn send(&mut self, packet: Packet) {
        let bytes = encode_packet(&packet).expect("encode");
        self.send_raw(&bytes).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to broker");
    }

    async fn subscribe(&mut self, packet_id: u16, topic: &str) {
        self.send(Packet::Subscribe(SubscribePacket::single(packet_id, topic)))
            .await;
        match self.recv().await {
            Packet::SubAck(ack) => assert_eq!(ack.packet_id, packet_id),
            other => panic!("expected SUBACK, got {other:?}"),
        }
    }

    async fn publish(&mut self, topic: &str, payload: &'static [u8]) {
        self.send(Packet::Publish(PublishPacket::at_most_once(topic, payload)))
            .await;
    }

    /// Reads until one complete packet is buffered, then returns it.
    async fn recv(&mut self) -> Packet {
        loop {
            if let Ok((packet, consumed)) = decode_packet(&self.buf) {
                self.buf.drain(..consumed);
                return packet;
            }
            let mut chunk = [0u8; 1024];
            let n = timeout(RESPONSE_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("broker response in time")
                .expect("read from broker");
            assert!(n > 0, "broker closed the connection mid-wait");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Asserts that nothing arrives for a short while.
    async fn expect_silence(&mut self) {
        assert!(self.buf.is_empty(), "unexpected buffered bytes");
        let mut chunk = [0u8; 64];
        match timeout(SILENCE, self.stream.read(&mut chunk)).await {
            Err(_elapsed) => {}
            Ok(Ok(n)) => panic!("expected silence, got {n} bytes"),
            Ok(Err(e)) => panic!("expected silence, got read error {e}"),
        }
    }

    /// Waits for the broker to close the connection.
    async fn expect_closed(&mut self) {
        let mut rest = Vec::new();
        let read = timeout(RESPONSE_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("broker closes the connection in time");
        // A reset is as good as a FIN here.
        if let Ok(n) = read {
            assert_eq!(n, 0, "no frames expected before close");
        }
    }
}

/// Polls `condition` until it holds or the response timeout passes.
async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_receives_exactly_one_connack() {
    // Arrange
    let broker = start_broker();

    // Act
    let mut sensor = TestClient::connect(broker.addr, "sensor1").await;

    // Assert: the CONNACK was checked inside `connect`; nothing else follows
    sensor.expect_silence().await;
    let clients = broker.broker.connected_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].client_id.as_deref(), Some("sensor1"));
}

#[tokio::test]
async fn test_empty_client_id_is_assigned_one() {
    let broker = start_broker();

    let _client = TestClient::connect(broker.addr, "").await;

    let clients = broker.broker.connected_clients();
    let assigned = clients[0].client_id.as_deref().expect("client id assigned");
    assert!(assigned.starts_with("auto-"));
}

#[tokio::test]
async fn test_publish_before_connect_closes_connection() {
    let broker = start_broker();
    let mut client = TestClient::open(broker.addr).await;

    client.publish("x", b"too early").await;

    client.expect_closed().await;
    eventually(|| broker.broker.session_count() == 0).await;
}

#[tokio::test]
async fn test_second_connect_closes_connection() {
    let broker = start_broker();
    let mut client = TestClient::connect(broker.addr, "twice").await;

    client
        .send(Packet::Connect(ConnectPacket::new("twice", 0)))
        .await;

    client.expect_closed().await;
}

// ── Subscribe ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_subscribe_receives_suback_with_same_packet_id() {
    // Arrange
    let broker = start_broker();
    let mut controller = TestClient::connect(broker.addr, "controller").await;

    // Act
    controller
        .send(Packet::Subscribe(SubscribePacket::single(7, "rover/control")))
        .await;

    // Assert
    match controller.recv().await {
        Packet::SubAck(ack) => {
            assert_eq!(ack.packet_id, 7);
            assert_eq!(
                ack.return_codes,
                vec![SubscribeReturnCode::Granted(QoS::AtMostOnce)]
            );
        }
        other => panic!("expected SUBACK, got {other:?}"),
    }
    controller.expect_silence().await;
    assert_eq!(broker.broker.subscriber_count("rover/control"), 1);
}

// ── Fan-out ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_publish_reaches_subscriber_only() {
    // Arrange: A on "x", C on "y", B publishes to "x"
    let broker = start_broker();
    let mut a = TestClient::connect(broker.addr, "A").await;
    let mut b = TestClient::connect(broker.addr, "B").await;
    let mut c = TestClient::connect(broker.addr, "C").await;
    a.subscribe(1, "x").await;
    c.subscribe(1, "y").await;

    // Act
    b.publish("x", b"hi").await;

    // Assert
    match a.recv().await {
        Packet::Publish(p) => {
            assert_eq!(p.topic, "x");
            assert_eq!(&p.payload[..], b"hi");
            assert_eq!(p.qos, QoS::AtMostOnce);
        }
        other => panic!("expected PUBLISH, got {other:?}"),
    }
    a.expect_silence().await;
    b.expect_silence().await;
    c.expect_silence().await;
}

#[tokio::test]
async fn test_publisher_subscribed_to_own_topic_gets_no_echo() {
    let broker = start_broker();
    let mut a = TestClient::connect(broker.addr, "A").await;
    let mut b = TestClient::connect(broker.addr, "B").await;
    a.subscribe(1, "x").await;
    b.subscribe(1, "x").await;

    b.publish("x", b"from b").await;

    assert!(matches!(a.recv().await, Packet::Publish(p) if &p.payload[..] == b"from b"));
    b.expect_silence().await;
}

#[tokio::test]
async fn test_every_subscriber_gets_one_copy() {
    // Arrange
    let broker = start_broker();
    let mut dashboards = Vec::new();
    for i in 0..5 {
        let mut d = TestClient::connect(broker.addr, &format!("dash{i}")).await;
        d.subscribe(1, "rover/status").await;
        dashboards.push(d);
    }
    let mut rover = TestClient::connect(broker.addr, "rover").await;

    // Act
    rover.publish("rover/status", b"battery=81").await;

    // Assert
    for d in &mut dashboards {
        assert!(matches!(d.recv().await, Packet::Publish(p) if p.topic == "rover/status"));
        d.expect_silence().await;
    }
}

#[tokio::test]
async fn test_messages_from_one_publisher_arrive_in_order() {
    let broker = start_broker();
    let mut sub = TestClient::connect(broker.addr, "sub").await;
    sub.subscribe(1, "seq").await;
    let mut publisher = TestClient::connect(broker.addr, "pub").await;

    for payload in [&b"1"[..], &b"2"[..], &b"3"[..]] {
        publisher.publish("seq", payload).await;
    }

    for expected in [&b"1"[..], &b"2"[..], &b"3"[..]] {
        match sub.recv().await {
            Packet::Publish(p) => assert_eq!(&p.payload[..], expected),
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_wildcard_characters_match_literally() {
    let broker = start_broker();
    let mut sub = TestClient::connect(broker.addr, "sub").await;
    sub.subscribe(1, "rover/#").await;
    let mut publisher = TestClient::connect(broker.addr, "pub").await;

    publisher.publish("rover/status", b"no match").await;
    sub.expect_silence().await;

    publisher.publish("rover/#", b"exact").await;
    assert!(matches!(sub.recv().await, Packet::Publish(p) if &p.payload[..] == b"exact"));
}

// ── Keep-alive ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pingreq_gets_pingresp_and_keeps_subscriptions() {
    // Arrange
    let broker = start_broker();
    let mut a = TestClient::connect(broker.addr, "A").await;
    a.subscribe(1, "x").await;

    // Act
    a.send(Packet::PingReq).await;

    // Assert
    assert_eq!(a.recv().await, Packet::PingResp);
    a.expect_silence().await;
    let session_id = broker.broker.connected_clients()[0].session_id;
    assert_eq!(broker.broker.topics_for(session_id), vec!["x".to_string()]);
}

// ── Teardown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_purges_subscriptions() {
    // Arrange
    let broker = start_broker();
    let mut a = TestClient::connect(broker.addr, "A").await;
    a.subscribe(1, "x").await;

    // Act
    a.send(Packet::Disconnect).await;

    // Assert
    a.expect_closed().await;
    eventually(|| broker.broker.subscriber_count("x") == 0).await;
    assert_eq!(broker.broker.session_count(), 0);
}

#[tokio::test]
async fn test_dropped_connection_gets_no_further_deliveries() {
    // Arrange
    let broker = start_broker();
    let mut a = TestClient::connect(broker.addr, "A").await;
    let mut c = TestClient::connect(broker.addr, "C").await;
    a.subscribe(1, "x").await;
    c.subscribe(1, "x").await;
    let mut b = TestClient::connect(broker.addr, "B").await;

    // Act: A vanishes without DISCONNECT
    drop(a);
    eventually(|| broker.broker.subscriber_count("x") == 1).await;
    b.publish("x", b"after").await;

    // Assert: the survivor still gets it and the broker keeps running
    assert!(matches!(c.recv().await, Packet::Publish(p) if &p.payload[..] == b"after"));
    eventually(|| broker.broker.session_count() == 2).await;
}

#[tokio::test]
async fn test_protocol_violation_only_closes_offending_session() {
    // Arrange
    let broker = start_broker();
    let mut a = TestClient::connect(broker.addr, "A").await;
    a.subscribe(1, "x").await;
    let mut bad = TestClient::connect(broker.addr, "bad").await;
    let mut b = TestClient::connect(broker.addr, "B").await;

    // Act: packet type 0 is reserved
    bad.send_raw(&[0x00, 0x00]).await;

    // Assert
    bad.expect_closed().await;
    b.publish("x", b"still here").await;
    assert!(matches!(a.recv().await, Packet::Publish(p) if &p.payload[..] == b"still here"));
}

#[tokio::test]
async fn test_malformed_remaining_length_closes_connection() {
    let broker = start_broker();
    let mut client = TestClient::connect(broker.addr, "c").await;

    client.send_raw(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF]).await;

    client.expect_closed().await;
}

// ── Framing over TCP ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_frames_split_across_writes_are_reassembled() {
    // Arrange
    let broker = start_broker();
    let mut client = TestClient::open(broker.addr).await;
    let connect = encode_packet(&Packet::Connect(ConnectPacket::new("slow", 0))).unwrap();

    // Act: one byte per write
    for byte in &connect {
        client.send_raw(std::slice::from_ref(byte)).await;
        client.stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // Assert
    assert_eq!(client.recv().await, Packet::ConnAck(ConnAckPacket::accepted()));
}

#[tokio::test]
async fn test_several_frames_in_one_write_are_all_handled() {
    let broker = start_broker();
    let mut client = TestClient::open(broker.addr).await;
    let mut burst = encode_packet(&Packet::Connect(ConnectPacket::new("burst", 0))).unwrap();
    burst.extend(encode_packet(&Packet::Subscribe(SubscribePacket::single(3, "x"))).unwrap());
    burst.extend(encode_packet(&Packet::PingReq).unwrap());

    client.send_raw(&burst).await;

    assert!(matches!(client.recv().await, Packet::ConnAck(_)));
    assert!(matches!(client.recv().await, Packet::SubAck(ack) if ack.packet_id == 3));
    assert_eq!(client.recv().await, Packet::PingResp);
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    // Arrange
    let TestBroker { broker, addr, run } = start_broker();
    let mut a = TestClient::connect(addr, "A").await;
    let mut b = TestClient::connect(addr, "B").await;

    // Act
    broker.shutdown_token().cancel();

    // Assert
    let result = timeout(Duration::from_secs(5), run)
        .await
        .expect("broker stops in time")
        .expect("acceptor task must not panic");
    assert!(result.is_ok());
    a.expect_closed().await;
    b.expect_closed().await;
    assert_eq!(broker.session_count(), 0);
}
