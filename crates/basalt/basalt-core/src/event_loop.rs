//! Readiness-driven relay loop.
//!
//! One thread, one blocking point. Each turn:
//!
//! ```text
//!   interest sets ──▶ Snapshot ──▶ poll(2)
//!                                    │
//!        ┌───────────────┬───────────┴─────┬──────────────────┐
//!        ▼               ▼                 ▼                  ▼
//!   wake pipe        listener        readable peers     writable peers
//!   (stop request)   accept+register read ─▶ broadcast  drain_once
//! ```
//!
//! All reads of a turn are handled before any write, and a connection closed
//! while reading is skipped when writes are handled.

use crate::broadcast::broadcast;
use crate::error::PoolError;
use crate::poller::{Ready, Snapshot};
use crate::pool::ConnectionPool;
use crate::shutdown::Shutdown;
use basalt_perf_recorder::{PerfRecorder, PerfStage};
use std::io::{self, ErrorKind};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Upper bound on bytes taken from a socket per read; each read is
    /// broadcast as its own message.
    pub buffer_size: usize,
    /// Set `TCP_NODELAY` on accepted connections.
    pub nodelay: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            nodelay: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

pub struct EventLoop {
    listener: TcpListener,
    shutdown: Shutdown,
    pool: ConnectionPool<TcpStream>,
    snapshot: Snapshot,
    ready: Vec<Ready>,
    buffer: Vec<u8>,
    nodelay: bool,
    state: LoopState,
    perf: PerfRecorder,
}

impl EventLoop {
    /// Wraps a bound, listening socket. The listener is switched to
    /// non-blocking mode if it is not already.
    pub fn new(listener: TcpListener, shutdown: Shutdown, config: LoopConfig) -> io::Result<Self> {
        if config.buffer_size == 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "read buffer size must be non-zero",
            ));
        }
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            shutdown,
            pool: ConnectionPool::new(),
            snapshot: Snapshot::new(),
            ready: Vec::new(),
            buffer: vec![0u8; config.buffer_size],
            nodelay: config.nodelay,
            state: LoopState::Running,
            perf: PerfRecorder::new(),
        })
    }

    /// Runs until a stop is requested, then closes every connection.
    pub fn run(&mut self) {
        info!(listen_fd = self.listener.as_raw_fd(), "relay loop running");

        while self.state == LoopState::Running {
            if self.shutdown.is_requested() {
                break;
            }
            if let Err(e) = self.turn(None) {
                error!(error = %e, "poll failed");
            }
        }

        self.shutdown();
    }

    /// Performs one poll-and-dispatch iteration.
    ///
    /// `None` blocks until something is ready. Only a failed poll is returned
    /// as an error; an interrupted poll returns `Ok` so the caller can look at
    /// the stop flag. Per-connection failures are logged and handled here.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if self.state != LoopState::Running {
            return Ok(());
        }
        self.perf.begin(PerfStage::Iteration);

        let listen_fd = self.listener.as_raw_fd();
        let wake_fd = self.shutdown.wake_fd();

        self.snapshot.clear();
        self.snapshot.watch(listen_fd, false);
        self.snapshot.watch(wake_fd, false);
        self.pool.fill_snapshot(&mut self.snapshot);

        debug!(
            watched = self.snapshot.len(),
            highest_fd = self.pool.highest_fd(),
            "waiting on poll"
        );
        self.perf.begin(PerfStage::Poll);
        let polled = self.snapshot.poll(timeout);
        self.perf.end(PerfStage::Poll);

        match polled {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                debug!("poll interrupted");
                self.perf.end(PerfStage::Iteration);
                return Ok(());
            }
            Err(e) => {
                self.perf.end(PerfStage::Iteration);
                return Err(e);
            }
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.snapshot.ready());

        let mut listener_ready = false;
        for r in &ready {
            if r.fd == wake_fd {
                self.shutdown.acknowledge();
            } else if r.fd == listen_fd {
                listener_ready = true;
            }
        }

        if listener_ready {
            self.perf.begin(PerfStage::Accept);
            self.accept_connection();
            self.perf.end(PerfStage::Accept);
        }

        for r in ready.iter().filter(|r| r.readable) {
            if r.fd != listen_fd && r.fd != wake_fd {
                self.handle_readable(r.fd);
            }
        }

        for r in ready.iter().filter(|r| r.writable) {
            if self.pool.contains(r.fd) {
                self.handle_writable(r.fd);
            }
        }

        self.ready = ready;
        self.perf.end(PerfStage::Iteration);
        Ok(())
    }

    /// Closes every remaining connection and moves to [`LoopState::Stopped`].
    ///
    /// Pending writes are dropped. Calling this again is a no-op.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopping;

        let closed = self.pool.clear();
        for c in &closed {
            info!(fd = c.fd, discarded = c.discarded, "connection closed on shutdown");
        }
        info!(closed = closed.len(), "relay loop stopped");
        self.state = LoopState::Stopped;
    }

    fn accept_connection(&mut self) {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("listener woke with no pending connection");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
                return;
            }
        };

        let fd = stream.as_raw_fd();
        if let Err(e) = stream.set_nonblocking(true) {
            error!(fd, error = %e, "failed to make connection non-blocking");
            return;
        }
        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!(fd, error = %e, "failed to set TCP_NODELAY");
            }
        }

        match self.pool.register(stream) {
            Ok(fd) => info!(fd, %peer, "new incoming connection"),
            Err(rejected) => {
                error!(fd, error = %rejected.error, "failed to register connection");
                drop(rejected.stream);
            }
        }
    }

    fn handle_readable(&mut self, fd: RawFd) {
        self.perf.begin(PerfStage::Read);
        let read = match self.pool.find_mut(fd) {
            Ok(record) => record.read_chunk(&mut self.buffer),
            Err(_) => {
                self.perf.end(PerfStage::Read);
                return;
            }
        };
        self.perf.end(PerfStage::Read);

        match read {
            Ok(0) => self.close(fd),
            Ok(n) => {
                info!(fd, bytes = n, "bytes received");
                self.perf.begin(PerfStage::Broadcast);
                match broadcast(&mut self.pool, fd, &self.buffer[..n]) {
                    Ok(fan_out) => {
                        debug!(
                            fd,
                            delivered = fan_out.delivered,
                            missed = fan_out.missed,
                            "message fanned out"
                        );
                    }
                    Err(e) => error!(fd, error = %e, "failed to broadcast message"),
                }
                self.perf.end(PerfStage::Broadcast);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                error!(fd, error = %e, "failed to read from connection");
                self.close(fd);
            }
        }
    }

    fn handle_writable(&mut self, fd: RawFd) {
        self.perf.begin(PerfStage::Drain);
        let drained = self.pool.drain_once(fd);
        self.perf.end(PerfStage::Drain);

        match drained {
            Ok(status) => debug!(fd, ?status, "drained head message"),
            Err(PoolError::NotFound(_)) => {}
            Err(e) => {
                error!(fd, error = %e, "failed to write to connection");
                self.close(fd);
            }
        }
    }

    fn close(&mut self, fd: RawFd) {
        match self.pool.unregister(fd) {
            Ok(c) => info!(
                fd,
                bytes_in = c.bytes_in,
                bytes_out = c.bytes_out,
                discarded = c.discarded,
                "connection closed"
            ),
            Err(e) => warn!(fd, error = %e, "failed to remove connection"),
        }
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPool<TcpStream> {
        &self.pool
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn perf(&self) -> &PerfRecorder {
        &self.perf
    }
}
