use crate::queue::{DrainStatus, MessageQueue};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};

/// A byte stream the relay can poll, read and write.
///
/// Implemented for anything socket-like; the relay itself uses `TcpStream`,
/// tests and benches also use `UnixStream` pairs.
pub trait Transport: Read + Write + AsRawFd {}

impl<T: Read + Write + AsRawFd> Transport for T {}

/// State the pool keeps for one live client.
///
/// Owns the transport: dropping the record closes the socket and frees every
/// queued message.
#[derive(Debug)]
pub struct ConnectionRecord<S> {
    fd: RawFd,
    stream: S,
    queue: MessageQueue,
    bytes_in: u64,
}

impl<S: Transport> ConnectionRecord<S> {
    pub fn new(stream: S) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            stream,
            queue: MessageQueue::new(),
            bytes_in: 0,
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    #[inline]
    pub(crate) fn queue_mut(&mut self) -> &mut MessageQueue {
        &mut self.queue
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Reads one chunk from the peer into `buf`. `Ok(0)` is end-of-stream.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        self.bytes_in += n as u64;
        Ok(n)
    }

    /// Pushes the head of the outbound queue into the socket.
    pub fn flush_head(&mut self) -> io::Result<DrainStatus> {
        self.queue.drain_once(&mut self.stream)
    }

    #[inline]
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    #[inline]
    pub fn bytes_out(&self) -> u64 {
        self.queue.bytes_sent()
    }
}
