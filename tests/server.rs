//! End-to-end tests over localhost sockets.

use bytes::BytesMut;
use shardcache::protocol::{Frame, Header, OpCode, Status, HEADER_SIZE};
use shardcache::server::{Config, Transport};
use shardcache::storage::Cas;
use shardcache::{DuplicatePolicy, Server};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> Config {
    Config::default()
        .with_bind("127.0.0.1")
        .with_port(0)
        .with_workers(2)
        .with_shards(8)
}

fn start(config: Config) -> Server {
    let mut server = Server::bind(config).unwrap();
    server.start().unwrap();
    server
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

fn encode(frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    buf.to_vec()
}

fn send(stream: &mut TcpStream, frame: &Frame) {
    stream.write_all(&encode(frame)).unwrap();
}

fn recv(stream: &mut TcpStream) -> Frame {
    let mut head = [0u8; HEADER_SIZE];
    stream.read_exact(&mut head).unwrap();
    let header = Header::decode(&head).unwrap();
    let mut body = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body).unwrap();
    Frame {
        header,
        body: body.into(),
    }
}

fn roundtrip(stream: &mut TcpStream, frame: &Frame) -> Frame {
    send(stream, frame);
    recv(stream)
}

/// Wait until the peer closes the connection
fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected close, read {} bytes", n),
        Err(e) => assert!(
            matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted),
            "unexpected error: {}",
            e
        ),
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_basic_store() {
    let server = start(config());
    let mut client = connect(&server);

    let response = roundtrip(
        &mut client,
        &Frame::set(b"foo", b"bar", 0, 0, Cas::default(), 1),
    );
    assert_eq!(response.status(), Some(Status::Success));
    assert_eq!(response.header.opaque, 1);

    let response = roundtrip(&mut client, &Frame::get(b"foo", 2));
    assert_eq!(response.status(), Some(Status::Success));
    assert_eq!(response.value(), b"bar");
    assert_eq!(response.header.opaque, 2);
    assert_eq!(server.store().len(), 1);
}

#[test]
fn test_round_trip_metadata() {
    let server = start(config());
    let mut client = connect(&server);

    let response = roundtrip(
        &mut client,
        &Frame::set(b"meta", b"value", 0x1234_5678, 3600, Cas(7, 9), 0),
    );
    assert_eq!(response.status(), Some(Status::Success));
    assert_eq!(response.header.cas, Cas(7, 9));

    let response = roundtrip(&mut client, &Frame::get(b"meta", 0));
    assert_eq!(response.flags(), Some(0x1234_5678));
    assert_eq!(response.header.cas, Cas(7, 9));
    assert_eq!(response.value(), b"value");

    let entry = server.store().get(b"meta").unwrap();
    assert_eq!(entry.expire(), 3600);
}

#[test]
fn test_miss() {
    let server = start(config());
    let mut client = connect(&server);

    let response = roundtrip(&mut client, &Frame::get(b"missing", 0));
    assert_eq!(response.status(), Some(Status::NotFound));
    assert_eq!(response.header.body_len, 0);
}

#[test]
fn test_malformed_set() {
    let server = start(config());
    let mut client = connect(&server);

    let frame = Frame::new(Header::request(OpCode::Set), &[], b"foo", b"bar");
    let response = roundtrip(&mut client, &frame);
    assert_eq!(response.status(), Some(Status::InvalidArgs));
    assert!(server.store().is_empty());

    // connection stays usable
    let response = roundtrip(&mut client, &Frame::get(b"foo", 0));
    assert_eq!(response.status(), Some(Status::NotFound));
}

#[test]
fn test_quit_releases_slot() {
    let server = start(config());
    let capacity = server.config().connection_count();
    let mut client = connect(&server);

    roundtrip(&mut client, &Frame::set(b"k", b"v", 0, 0, Cas::default(), 0));
    send(&mut client, &Frame::quit(0));
    expect_closed(&mut client);

    wait_for(|| {
        let stats = server.pool_stats();
        // the acceptor keeps one slot locked while it waits
        stats.used == 0 && stats.in_flight == 1 && stats.free == capacity - 1
    });
    assert_eq!(server.metrics().ops_by_command().get("QUIT"), Some(&1));
}

#[test]
fn test_pipelined_requests() {
    let server = start(config());
    let mut client = connect(&server);

    let mut wire = encode(&Frame::set(b"a", b"1", 0, 0, Cas::default(), 10));
    wire.extend(encode(&Frame::get(b"a", 11)));
    wire.extend(encode(&Frame::get(b"b", 12)));
    client.write_all(&wire).unwrap();

    let responses: Vec<_> = (0..3).map(|_| recv(&mut client)).collect();
    assert_eq!(responses[0].header.opaque, 10);
    assert_eq!(responses[1].value(), b"1");
    assert_eq!(responses[2].status(), Some(Status::NotFound));
}

#[test]
fn test_oversized_value() {
    let server = start(config().with_max_key_val(8, 8));
    let mut client = connect(&server);

    let response = roundtrip(
        &mut client,
        &Frame::set(b"k", b"123456789", 0, 0, Cas::default(), 0),
    );
    assert_eq!(response.status(), Some(Status::TooLarge));
    assert!(server.store().is_empty());
}

#[test]
fn test_keep_existing_policy() {
    let server = start(config().with_duplicate_policy(DuplicatePolicy::KeepExisting));
    let mut client = connect(&server);

    let first = roundtrip(&mut client, &Frame::set(b"k", b"one", 0, 0, Cas::default(), 0));
    assert_eq!(first.status(), Some(Status::Success));
    let second = roundtrip(&mut client, &Frame::set(b"k", b"two", 0, 0, Cas::default(), 0));
    assert_eq!(second.status(), Some(Status::Exists));

    let response = roundtrip(&mut client, &Frame::get(b"k", 0));
    assert_eq!(response.value(), b"one");
}

#[test]
fn test_pool_saturation() {
    let server = start(config().with_workers(1).with_max_connections(1));

    let mut first = connect(&server);
    roundtrip(&mut first, &Frame::set(b"k", b"v", 0, 0, Cas::default(), 0));

    // accepted by the kernel, but no slot is free to serve it
    let mut second = connect(&server);
    second
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    send(&mut second, &Frame::get(b"k", 7));
    let mut byte = [0u8; 1];
    let err = second.read(&mut byte).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));

    send(&mut first, &Frame::quit(0));
    expect_closed(&mut first);

    second.set_read_timeout(Some(TIMEOUT)).unwrap();
    let response = recv(&mut second);
    assert_eq!(response.header.opaque, 7);
    assert_eq!(response.value(), b"v");
}

#[test]
fn test_idle_connection_yields_worker() {
    let server = start(config().with_workers(1).with_max_connections(2));

    let _idle = connect(&server);
    thread::sleep(Duration::from_millis(50));

    let mut busy = connect(&server);
    let response = roundtrip(&mut busy, &Frame::set(b"k", b"v", 0, 0, Cas::default(), 0));
    assert_eq!(response.status(), Some(Status::Success));
}

#[test]
fn test_concurrent_clients() {
    let server = start(config().with_workers(4).with_max_connections(8));
    let addr = server.local_addr();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                let mut client = TcpStream::connect(addr).unwrap();
                client.set_read_timeout(Some(TIMEOUT)).unwrap();
                for j in 0..50 {
                    let key = format!("key-{}-{}", i, j);
                    let value = format!("value-{}", j);
                    let response = roundtrip(
                        &mut client,
                        &Frame::set(key.as_bytes(), value.as_bytes(), 0, 0, Cas::default(), j),
                    );
                    assert_eq!(response.status(), Some(Status::Success));

                    let response = roundtrip(&mut client, &Frame::get(key.as_bytes(), j));
                    assert_eq!(response.value(), value.as_bytes());
                }
                send(&mut client, &Frame::quit(0));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(server.store().len(), 400);
}

#[test]
fn test_udp_round_trip() {
    let server = start(config().with_transport(Transport::Udp));
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    client.connect(server.local_addr()).unwrap();

    let mut buf = [0u8; 512];
    let mut exchange = |frame: &Frame| {
        client.send(&encode(frame)).unwrap();
        let n = client.recv(&mut buf).unwrap();
        let header = Header::decode(&buf[..n]).unwrap();
        Frame {
            header,
            body: buf[HEADER_SIZE..n].to_vec().into(),
        }
    };

    let response = exchange(&Frame::set(b"foo", b"bar", 5, 0, Cas::default(), 1));
    assert_eq!(response.status(), Some(Status::Success));

    let response = exchange(&Frame::get(b"foo", 2));
    assert_eq!(response.status(), Some(Status::Success));
    assert_eq!(response.flags(), Some(5));
    assert_eq!(response.value(), b"bar");

    let response = exchange(&Frame::get(b"nope", 3));
    assert_eq!(response.status(), Some(Status::NotFound));
}

#[test]
fn test_shutdown_with_connected_client() {
    let mut server = start(config());
    let mut client = connect(&server);
    roundtrip(&mut client, &Frame::set(b"k", b"v", 0, 0, Cas::default(), 0));

    let started = Instant::now();
    server.shutdown();
    assert!(started.elapsed() < TIMEOUT);

    expect_closed(&mut client);
    let stats = server.pool_stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.used, 0);

    // idempotent
    server.shutdown();
}

#[test]
fn test_shutdown_with_client_not_reading() {
    let mut server = start(config().with_workers(1).with_max_key_val(0, 60_000));
    let mut client = connect(&server);

    let value = vec![b'x'; 60_000];
    let response = roundtrip(&mut client, &Frame::set(b"big", &value, 0, 0, Cas::default(), 0));
    assert_eq!(response.status(), Some(Status::Success));

    // responses pile up in the socket buffers until the worker blocks in write
    let mut wire = Vec::new();
    for i in 0..600 {
        wire.extend(encode(&Frame::get(b"big", i)));
    }
    client.write_all(&wire).unwrap();
    thread::sleep(Duration::from_millis(500));

    let (done_tx, done_rx) = crossbeam::channel::bounded(1);
    let shutdown = thread::spawn(move || {
        server.shutdown();
        let _ = done_tx.send(());
        server
    });
    assert!(
        done_rx.recv_timeout(TIMEOUT).is_ok(),
        "shutdown blocked on a client that stopped reading"
    );

    let server = shutdown.join().unwrap();
    assert_eq!(server.pool_stats().in_flight, 0);
    drop(client);
}

#[test]
fn test_start_twice() {
    let mut server = start(config());
    assert!(server.start().is_err());
}

#[test]
fn test_invalid_config() {
    assert!(Server::bind(config().with_shards(0)).is_err());
}
