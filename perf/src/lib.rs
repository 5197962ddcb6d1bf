pub mod report;

use basalt_core::ConnectionPool;
use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "cannot compute stats on empty samples");
    samples.sort_unstable();

    let count = samples.len();
    let sum: u64 = samples.iter().sum();

    Stats {
        min: samples[0],
        max: samples[count - 1],
        mean: sum as f64 / count as f64,
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    }
}

fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let len = sorted.len();
    let rank = (pct / 100.0 * len as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(len - 1)]
}

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// A pool of `n` relay-side sockets plus the client ends they write to.
pub struct SocketPool {
    pub pool: ConnectionPool<UnixStream>,
    pub clients: Vec<UnixStream>,
}

pub fn socket_pool(n: usize) -> SocketPool {
    let mut pool = ConnectionPool::new();
    let mut clients = Vec::with_capacity(n);
    for _ in 0..n {
        let (server, client) = UnixStream::pair().expect("failed to create socket pair");
        server.set_nonblocking(true).expect("failed to set non-blocking");
        client.set_nonblocking(true).expect("failed to set non-blocking");
        pool.register(server).expect("failed to register socket");
        clients.push(client);
    }
    SocketPool { pool, clients }
}

impl SocketPool {
    /// Flushes every queue and discards what the clients received, so queues
    /// don't grow across criterion iterations.
    pub fn settle(&mut self) {
        for fd in self.pool.descriptors().to_vec() {
            while self.pool.find(fd).map(|r| !r.queue().is_empty()).unwrap_or(false) {
                if self.pool.drain_once(fd).is_err() {
                    break;
                }
                for client in self.clients.iter_mut() {
                    discard_pending(client);
                }
            }
        }
    }
}

/// Reads and throws away whatever is buffered on `client`.
pub fn discard_pending(client: &mut UnixStream) -> usize {
    let mut buf = [0u8; 16 * 1024];
    let mut total = 0;
    loop {
        match client.read(&mut buf) {
            Ok(0) => return total,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return total,
        }
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
