//! End-to-end bus tests over loopback TCP.
//!
//! Each test brings up real bus instances in-process: one listening node and
//! one or two dialing nodes sharing a key, mirroring how the processes are
//! deployed across hosts.

use secbus::codec::FrameCodec;
use secbus::net::{Bus, BusConfig, BusEvent, pump};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const PSK: [u8; 32] = [0x07; 32];

async fn start_server() -> (Bus, mpsc::Receiver<BusEvent>, SocketAddr) {
    let config = BusConfig {
        psk: PSK,
        server_addr: Some("127.0.0.1:0".parse().unwrap()),
        ..Default::default()
    };
    let (bus, events) = Bus::start(config).await.unwrap();
    let addr = bus.local_addr().unwrap();
    (bus, events, addr)
}

async fn connect_client(addr: SocketAddr) -> (Bus, mpsc::Receiver<BusEvent>) {
    let config = BusConfig {
        psk: PSK,
        remote_addrs: vec![addr],
        ..Default::default()
    };
    Bus::start(config).await.unwrap()
}

/// Next Output payload, skipping peer churn events.
async fn next_output(events: &mut mpsc::Receiver<BusEvent>) -> Vec<u8> {
    loop {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(BusEvent::Output(payload))) => return payload,
            Ok(Some(_)) => continue,
            other => panic!("expected output, got {other:?}"),
        }
    }
}

/// Wait until the next peer has registered.
async fn wait_connected(events: &mut mpsc::Receiver<BusEvent>) {
    loop {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(BusEvent::PeerConnected(_))) => return,
            Ok(Some(_)) => continue,
            other => panic!("expected connection, got {other:?}"),
        }
    }
}

/// Assert that no Output arrives within the window.
async fn expect_no_output(events: &mut mpsc::Receiver<BusEvent>, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match timeout(Duration::from_millis(50), events.recv()).await {
            Ok(Some(BusEvent::Output(payload))) => {
                panic!("unexpected output: {:?}", String::from_utf8_lossy(&payload))
            }
            Ok(Some(_)) => {}
            // A closed stream cannot produce output either.
            Ok(None) => return,
            Err(_) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
    }
}

#[tokio::test]
async fn basic_echo_both_directions() {
    let (server, mut server_events, addr) = start_server().await;
    let (client, mut client_events) = connect_client(addr).await;

    client.broadcast_chunk(b"hello").await.unwrap();
    assert_eq!(next_output(&mut server_events).await, b"hello");

    server.broadcast_chunk(b"world").await.unwrap();
    assert_eq!(next_output(&mut client_events).await, b"world");
}

#[tokio::test]
async fn chunks_from_one_speaker_arrive_in_order() {
    let (_server, mut server_events, addr) = start_server().await;
    let (client, _client_events) = connect_client(addr).await;

    for chunk in [&b"aa"[..], &b"bb"[..], &b"cc"[..]] {
        client.broadcast_chunk(chunk).await.unwrap();
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.extend(next_output(&mut server_events).await);
    }
    assert_eq!(delivered, b"aabbcc");
}

#[tokio::test]
async fn concurrent_speakers_do_not_interleave() {
    let (_server, mut server_events, addr) = start_server().await;
    let (b, mut b_events) = connect_client(addr).await;
    let (c, mut c_events) = connect_client(addr).await;
    wait_connected(&mut server_events).await;
    wait_connected(&mut server_events).await;

    // B takes the floor at the server; C's frame must wait.
    b.broadcast_chunk(b"aaa").await.unwrap();
    sleep(Duration::from_millis(300)).await;
    c.broadcast_chunk(b"bbb").await.unwrap();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(next_output(&mut server_events).await, b"aaa");
    expect_no_output(&mut server_events, Duration::from_millis(300)).await;

    // C's frame was still relayed; at C the only speaker so far is B.
    assert_eq!(next_output(&mut c_events).await, b"aaa");
    assert_eq!(next_output(&mut b_events).await, b"bbb");

    // B yields; the server drains C's backlog.
    b.end_turn().await.unwrap();
    assert_eq!(next_output(&mut server_events).await, b"bbb");
}

#[tokio::test]
async fn replayed_wire_bytes_are_delivered_once() {
    let (_server, mut server_events, addr) = start_server().await;

    let attacker_codec = FrameCodec::new(PSK);
    let frame = attacker_codec.encrypt(b"payload").unwrap();

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&frame).await.unwrap();
    raw.write_all(&frame).await.unwrap();
    raw.flush().await.unwrap();

    assert_eq!(next_output(&mut server_events).await, b"payload");
    expect_no_output(&mut server_events, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn tampered_wire_bytes_are_dropped() {
    let (_server, mut server_events, addr) = start_server().await;

    let codec = FrameCodec::new(PSK);
    let frame = codec.encrypt(b"clean").unwrap();
    let mut bent = frame.clone();
    bent[700] ^= 0x01;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&bent).await.unwrap();
    raw.flush().await.unwrap();
    expect_no_output(&mut server_events, Duration::from_millis(500)).await;

    // The tampered frame must not have advanced any state.
    raw.write_all(&frame).await.unwrap();
    raw.flush().await.unwrap();
    assert_eq!(next_output(&mut server_events).await, b"clean");
}

#[tokio::test]
async fn sentinel_flush_releases_the_floor() {
    let (_server, mut server_events, addr) = start_server().await;

    let config = BusConfig {
        psk: PSK,
        remote_addrs: vec![addr],
        sentinel_byte: Some(b'\n'),
        ..Default::default()
    };
    let (b, _b_events) = Bus::start(config).await.unwrap();
    let (c, _c_events) = connect_client(addr).await;

    // The pump sends "line\n", then the sentinel end-of-turn, then the EOF
    // end-of-turn.
    pump(&b"line\n"[..], &b).await.unwrap();
    assert_eq!(next_output(&mut server_events).await, b"line\n");
    sleep(Duration::from_millis(300)).await;

    // The floor is free, so another speaker gets through immediately.
    c.broadcast_chunk(b"next").await.unwrap();
    assert_eq!(next_output(&mut server_events).await, b"next");
}

#[tokio::test]
async fn transmit_only_node_ignores_inbound_frames() {
    let (server, mut server_events, addr) = start_server().await;

    let config = BusConfig {
        psk: PSK,
        remote_addrs: vec![addr],
        wait_input: false,
        ..Default::default()
    };
    let (deaf, mut deaf_events) = Bus::start(config).await.unwrap();
    wait_connected(&mut server_events).await;

    server.broadcast_chunk(b"anyone there").await.unwrap();
    expect_no_output(&mut deaf_events, Duration::from_millis(500)).await;

    // Transmitting still works.
    deaf.broadcast_chunk(b"talk only").await.unwrap();
    assert_eq!(next_output(&mut server_events).await, b"talk only");
}

#[tokio::test]
async fn mesh_relays_to_third_party() {
    let (_server, mut server_events, addr) = start_server().await;
    let (b, _b_events) = connect_client(addr).await;
    let (_c, mut c_events) = connect_client(addr).await;
    wait_connected(&mut server_events).await;
    wait_connected(&mut server_events).await;

    // B's frame reaches C only through the server's rebroadcast.
    b.broadcast_chunk(b"via relay").await.unwrap();
    assert_eq!(next_output(&mut c_events).await, b"via relay");
}
