//! End-to-end tests driving the relay over real loopback TCP sockets.
//!
//! Most tests stay on one thread: clients are non-blocking and the loop is
//! advanced with `EventLoop::turn` and a short timeout until the expected
//! bytes show up. The shutdown tests run the loop on its own thread to prove a
//! blocked `run` wakes up.
//!
//! ```bash
//! cargo test -p basalt-core --test relay_e2e
//! ```

use basalt_core::{EventLoop, LoopConfig, LoopState, Shutdown};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(5);

fn start_loop(config: LoopConfig) -> (EventLoop, SocketAddr, Shutdown) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new().unwrap();
    let relay = EventLoop::new(listener, shutdown.clone(), config).unwrap();
    (relay, addr, shutdown)
}

fn pump_until(relay: &mut EventLoop, mut done: impl FnMut(&EventLoop) -> bool) {
    let start = Instant::now();
    while !done(relay) {
        assert!(start.elapsed() < DEADLINE, "relay did not reach expected state");
        relay.turn(Some(TICK)).unwrap();
    }
}

fn connect(relay: &mut EventLoop, addr: SocketAddr) -> TcpStream {
    let before = relay.pool().len();
    let client = TcpStream::connect(addr).unwrap();
    client.set_nonblocking(true).unwrap();
    pump_until(relay, |r| r.pool().len() == before + 1);
    client
}

/// Advances the relay until `client` has received `len` bytes.
fn receive(relay: &mut EventLoop, client: &mut TcpStream, len: usize) -> Vec<u8> {
    let start = Instant::now();
    let mut got = Vec::new();
    let mut buf = [0u8; 1024];
    while got.len() < len {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for data");
        relay.turn(Some(TICK)).unwrap();
        match client.read(&mut buf) {
            Ok(0) => panic!("relay closed the connection"),
            Ok(n) => got.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => panic!("client read failed: {e}"),
        }
    }
    got
}

/// Advances the relay a few times and checks `client` got nothing.
fn assert_silent(relay: &mut EventLoop, client: &mut TcpStream) {
    let mut buf = [0u8; 64];
    for _ in 0..10 {
        relay.turn(Some(TICK)).unwrap();
        match client.read(&mut buf) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            other => panic!("expected no data, got {other:?}"),
        }
    }
}

#[test]
fn three_clients_hi_then_bye() {
    let (mut relay, addr, _shutdown) = start_loop(LoopConfig::default());
    let mut a = connect(&mut relay, addr);
    let mut b = connect(&mut relay, addr);
    let mut c = connect(&mut relay, addr);
    assert_eq!(relay.pool().len(), 3);

    a.write_all(b"hi").unwrap();
    assert_eq!(receive(&mut relay, &mut b, 2), b"hi");
    assert_eq!(receive(&mut relay, &mut c, 2), b"hi");
    assert_silent(&mut relay, &mut a);

    drop(b);
    pump_until(&mut relay, |r| r.pool().len() == 2);

    c.write_all(b"bye").unwrap();
    assert_eq!(receive(&mut relay, &mut a, 3), b"bye");
    assert_silent(&mut relay, &mut c);
}

#[test]
fn messages_reach_each_peer_in_send_order() {
    let (mut relay, addr, _shutdown) = start_loop(LoopConfig::default());
    let mut a = connect(&mut relay, addr);
    let mut b = connect(&mut relay, addr);
    let mut c = connect(&mut relay, addr);

    a.write_all(b"M1").unwrap();
    assert_eq!(receive(&mut relay, &mut c, 2), b"M1");
    b.write_all(b"M2").unwrap();
    assert_eq!(receive(&mut relay, &mut c, 2), b"M2");

    assert_eq!(receive(&mut relay, &mut b, 2), b"M1");
    assert_eq!(receive(&mut relay, &mut a, 2), b"M2");
}

#[test]
fn sends_larger_than_the_read_buffer_arrive_intact() {
    let config = LoopConfig {
        buffer_size: 4,
        ..LoopConfig::default()
    };
    let (mut relay, addr, _shutdown) = start_loop(config);
    let mut a = connect(&mut relay, addr);
    let mut b = connect(&mut relay, addr);

    let payload = b"0123456789abcdefghij";
    a.write_all(payload).unwrap();
    assert_eq!(receive(&mut relay, &mut b, payload.len()), payload);
}

#[test]
fn lone_client_hears_nothing() {
    let (mut relay, addr, _shutdown) = start_loop(LoopConfig::default());
    let mut a = connect(&mut relay, addr);
    a.write_all(b"anyone?").unwrap();
    assert_silent(&mut relay, &mut a);
    assert_eq!(relay.pool().len(), 1);
}

/// Reads whatever is buffered on `client` without blocking.
fn drain_client(client: &mut TcpStream) -> usize {
    let mut buf = [0u8; 16 * 1024];
    let mut total = 0;
    loop {
        match client.read(&mut buf) {
            Ok(0) => panic!("relay closed the connection"),
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return total,
            Err(e) => panic!("client read failed: {e}"),
        }
    }
}

#[test]
fn backlogged_peer_hanging_up_leaves_the_others_flowing() {
    let (mut relay, addr, _shutdown) = start_loop(LoopConfig::default());
    let mut a = connect(&mut relay, addr);
    let b = connect(&mut relay, addr);
    let mut c = connect(&mut relay, addr);
    let b_fd = relay.pool().descriptors()[1];

    // b never reads, so its socket buffers fill and the relay queues for it.
    let chunk = [7u8; 4096];
    let mut sent = 0usize;
    let mut c_got = 0usize;
    let start = Instant::now();
    while relay.pool().find(b_fd).unwrap().queue().len() < 8 {
        assert!(start.elapsed() < DEADLINE, "no backlog built up for the idle peer");
        match a.write(&chunk) {
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => panic!("client write failed: {e}"),
        }
        relay.turn(Some(TICK)).unwrap();
        c_got += drain_client(&mut c);
    }
    assert!(relay.pool().is_write_interested(b_fd));

    drop(b);
    pump_until(&mut relay, |r| !r.pool().contains(b_fd));
    assert_eq!(relay.pool().len(), 2);

    let start = Instant::now();
    while c_got < sent {
        assert!(start.elapsed() < DEADLINE, "remaining peer stopped receiving");
        relay.turn(Some(TICK)).unwrap();
        c_got += drain_client(&mut c);
    }
    assert_eq!(c_got, sent);

    c.write_all(b"still here").unwrap();
    assert_eq!(receive(&mut relay, &mut a, 10), b"still here");
}

#[test]
fn write_failure_closes_only_that_connection() {
    let (mut relay, addr, _shutdown) = start_loop(LoopConfig::default());
    let mut a = connect(&mut relay, addr);
    let _b = connect(&mut relay, addr);
    let mut c = connect(&mut relay, addr);
    let b_fd = relay.pool().descriptors()[1];

    // Relay-side half close: b stays quiet for reads, every write gets EPIPE.
    relay
        .pool()
        .find(b_fd)
        .unwrap()
        .stream()
        .shutdown(std::net::Shutdown::Write)
        .unwrap();

    a.write_all(b"ping").unwrap();
    assert_eq!(receive(&mut relay, &mut c, 4), b"ping");
    pump_until(&mut relay, |r| !r.pool().contains(b_fd));
    assert_eq!(relay.pool().len(), 2);

    c.write_all(b"pong").unwrap();
    assert_eq!(receive(&mut relay, &mut a, 4), b"pong");
}

#[test]
fn zero_buffer_size_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = LoopConfig {
        buffer_size: 0,
        ..LoopConfig::default()
    };
    let err = EventLoop::new(listener, Shutdown::new().unwrap(), config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn trigger_wakes_a_blocked_run_and_closes_clients() {
    let (mut relay, addr, shutdown) = start_loop(LoopConfig::default());
    let mut client = connect(&mut relay, addr);
    client.set_nonblocking(false).unwrap();
    client.set_read_timeout(Some(DEADLINE)).unwrap();

    let handle = thread::spawn(move || {
        relay.run();
        relay
    });

    thread::sleep(Duration::from_millis(50));
    shutdown.trigger();
    shutdown.trigger();

    let mut relay = handle.join().expect("relay thread panicked");
    assert_eq!(relay.state(), LoopState::Stopped);
    assert!(relay.pool().is_empty());

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    relay.shutdown();
    assert_eq!(relay.state(), LoopState::Stopped);
    relay.turn(Some(TICK)).unwrap();
    assert!(relay.pool().is_empty());
}

#[test]
fn stop_requested_before_run_returns_immediately() {
    let (mut relay, _addr, shutdown) = start_loop(LoopConfig::default());
    shutdown.trigger();
    relay.run();
    assert_eq!(relay.state(), LoopState::Stopped);
}
