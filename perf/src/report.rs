use crate::{Stats, compute_stats, payload};
use basalt_core::{EventLoop, LoopConfig, Shutdown};
use basalt_perf_recorder::{NUM_STAGES, PerfRecorder, PerfStage};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

pub const STAGE_NAMES: [&str; NUM_STAGES] =
    ["Poll", "Accept", "Read", "Broadcast", "Drain", "Iteration"];

pub const ALL_STAGES: [PerfStage; NUM_STAGES] = [
    PerfStage::Poll,
    PerfStage::Accept,
    PerfStage::Read,
    PerfStage::Broadcast,
    PerfStage::Drain,
    PerfStage::Iteration,
];

const TICK: Duration = Duration::from_millis(1);
const DEADLINE: Duration = Duration::from_secs(10);

/// Loopback traffic pushed through a live relay.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub clients: usize,
    pub messages: usize,
    pub payload_len: usize,
}

/// Runs `workload` against a fresh relay and returns it stopped, with its
/// per-stage samples intact. Senders rotate round-robin over the clients.
pub fn run_workload(workload: Workload) -> io::Result<EventLoop> {
    if workload.clients < 2 || workload.payload_len == 0 {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "workload needs two clients and a non-empty payload",
        ));
    }

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let mut relay = EventLoop::new(listener, Shutdown::new()?, LoopConfig::default())?;

    let start = Instant::now();
    let mut clients = Vec::with_capacity(workload.clients);
    for _ in 0..workload.clients {
        let client = TcpStream::connect(addr)?;
        client.set_nonblocking(true)?;
        clients.push(client);
        while relay.pool().len() < clients.len() {
            check_deadline(start)?;
            relay.turn(Some(TICK))?;
        }
    }

    let msg = payload(workload.payload_len);
    let mut expected = vec![0usize; workload.clients];
    let mut received = vec![0usize; workload.clients];

    for i in 0..workload.messages {
        let sender = i % workload.clients;
        let mut written = 0;
        while written < msg.len() {
            check_deadline(start)?;
            match clients[sender].write(&msg[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            relay.turn(Some(TICK))?;
            drain_all(&mut clients, &mut received)?;
        }
        for (j, total) in expected.iter_mut().enumerate() {
            if j != sender {
                *total += msg.len();
            }
        }
    }

    while received != expected {
        check_deadline(start)?;
        relay.turn(Some(TICK))?;
        drain_all(&mut clients, &mut received)?;
    }

    relay.shutdown();
    Ok(relay)
}

fn check_deadline(start: Instant) -> io::Result<()> {
    if start.elapsed() > DEADLINE {
        return Err(io::Error::new(ErrorKind::TimedOut, "relay workload stalled"));
    }
    Ok(())
}

fn drain_all(clients: &mut [TcpStream], received: &mut [usize]) -> io::Result<()> {
    let mut buf = [0u8; 16 * 1024];
    for (client, total) in clients.iter_mut().zip(received.iter_mut()) {
        loop {
            match client.read(&mut buf) {
                Ok(0) => return Err(io::Error::from(ErrorKind::UnexpectedEof)),
                Ok(n) => *total += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Summaries for every stage that recorded at least one sample.
pub fn stage_results(recorder: &PerfRecorder) -> Vec<(&'static str, Stats)> {
    ALL_STAGES
        .iter()
        .filter(|&&stage| recorder.count(stage) > 0)
        .map(|&stage| {
            let mut samples = recorder.samples(stage).to_vec();
            (STAGE_NAMES[stage as usize], compute_stats(&mut samples))
        })
        .collect()
}

pub fn print_stage_table(recorder: &PerfRecorder) {
    println!(
        "  {:<12} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {:>6}",
        "Stage", "p50", "p90", "p99", "p99.9", "max", "count", "% tot"
    );
    println!("  {}", "\u{2500}".repeat(80));

    let results = stage_results(recorder);
    let total_p50 = results
        .iter()
        .find(|(name, _)| *name == STAGE_NAMES[PerfStage::Iteration as usize])
        .map(|(_, s)| s.p50)
        .unwrap_or(0);

    for (name, stats) in &results {
        let pct = if total_p50 > 0 {
            format!("{:.0}%", stats.p50 as f64 / total_p50 as f64 * 100.0)
        } else {
            "-".to_string()
        };
        println!(
            "  {:<12} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {:>6}",
            name, stats.p50, stats.p90, stats.p99, stats.p999, stats.max, stats.count, pct
        );
    }
}
