//! The set of live client connections and their readiness interest.
//!
//! Records are keyed by descriptor for O(1) lookup; a side vector keeps
//! registration order so fan-out visits peers deterministically. Two interest
//! sets mirror what the next poll should watch:
//!
//! - every registered descriptor is in `read_interest`
//! - a descriptor is in `write_interest` iff its outbound queue is non-empty
//!
//! Both sets are maintained by the pool's own mutators and never touched from
//! outside, so the invariants hold after every call.

use crate::connection::{ConnectionRecord, Transport};
use crate::error::PoolError;
use crate::poller::Snapshot;
use crate::queue::{DrainStatus, Message};
use std::collections::{BTreeSet, HashMap};
use std::os::fd::RawFd;

/// A stream the pool refused to take, handed back so the caller can close it.
#[derive(Debug)]
pub struct Rejected<S> {
    pub error: PoolError,
    pub stream: S,
}

/// What was torn down by [`ConnectionPool::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed {
    pub fd: RawFd,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Messages still queued when the connection went away.
    pub discarded: usize,
}

#[derive(Debug)]
pub struct ConnectionPool<S> {
    connections: HashMap<RawFd, ConnectionRecord<S>>,
    /// Registration order, oldest first.
    order: Vec<RawFd>,
    read_interest: BTreeSet<RawFd>,
    write_interest: BTreeSet<RawFd>,
    highest_fd: RawFd,
}

impl<S: Transport> Default for ConnectionPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Transport> ConnectionPool<S> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            order: Vec::new(),
            read_interest: BTreeSet::new(),
            write_interest: BTreeSet::new(),
            highest_fd: 0,
        }
    }

    /// Takes ownership of `stream` and starts watching it for input.
    ///
    /// On failure the stream is returned untouched inside [`Rejected`]; the
    /// caller decides whether to close it.
    pub fn register(&mut self, stream: S) -> Result<RawFd, Rejected<S>> {
        let fd = stream.as_raw_fd();

        if self.connections.contains_key(&fd) {
            return Err(Rejected {
                error: PoolError::AlreadyRegistered(fd),
                stream,
            });
        }
        if let Err(e) = self
            .connections
            .try_reserve(1)
            .and_then(|_| self.order.try_reserve(1))
        {
            return Err(Rejected {
                error: PoolError::Allocation(e),
                stream,
            });
        }

        self.connections.insert(fd, ConnectionRecord::new(stream));
        self.order.push(fd);
        self.read_interest.insert(fd);
        self.highest_fd = self.highest_fd.max(fd);
        Ok(fd)
    }

    /// Removes the connection, closing its transport and discarding its queue.
    pub fn unregister(&mut self, fd: RawFd) -> Result<Closed, PoolError> {
        let mut record = self.connections.remove(&fd).ok_or(PoolError::NotFound(fd))?;

        self.order.retain(|&other| other != fd);
        self.read_interest.remove(&fd);
        self.write_interest.remove(&fd);
        // O(n) rescan; removal is rare next to reads and writes.
        self.highest_fd = self.order.iter().copied().max().unwrap_or(0);

        let closed = Closed {
            fd,
            bytes_in: record.bytes_in(),
            bytes_out: record.bytes_out(),
            discarded: record.queue_mut().clear(),
        };
        drop(record);
        Ok(closed)
    }

    /// Unregisters every connection, oldest first.
    pub fn clear(&mut self) -> Vec<Closed> {
        let fds = self.order.clone();
        fds.into_iter()
            .filter_map(|fd| self.unregister(fd).ok())
            .collect()
    }

    pub fn find(&self, fd: RawFd) -> Result<&ConnectionRecord<S>, PoolError> {
        self.connections.get(&fd).ok_or(PoolError::NotFound(fd))
    }

    pub fn find_mut(&mut self, fd: RawFd) -> Result<&mut ConnectionRecord<S>, PoolError> {
        self.connections.get_mut(&fd).ok_or(PoolError::NotFound(fd))
    }

    #[inline]
    pub fn contains(&self, fd: RawFd) -> bool {
        self.connections.contains_key(&fd)
    }

    /// Copies `payload` onto the tail of `fd`'s outbound queue and marks the
    /// descriptor write-interested.
    pub fn enqueue(&mut self, fd: RawFd, payload: &[u8]) -> Result<(), PoolError> {
        let record = self.connections.get_mut(&fd).ok_or(PoolError::NotFound(fd))?;
        let message = Message::copy_from(payload)?;
        record.queue_mut().push(message)?;
        self.write_interest.insert(fd);
        Ok(())
    }

    /// Flushes the head message of `fd`'s queue.
    ///
    /// Write interest is dropped once the queue runs empty. An error means the
    /// transport is unusable and the connection should be unregistered.
    pub fn drain_once(&mut self, fd: RawFd) -> Result<DrainStatus, PoolError> {
        let record = self.connections.get_mut(&fd).ok_or(PoolError::NotFound(fd))?;
        let status = record
            .flush_head()
            .map_err(|source| PoolError::Write { fd, source })?;
        if status == DrainStatus::Empty {
            self.write_interest.remove(&fd);
        }
        Ok(status)
    }

    /// Appends every registered descriptor to `snapshot` with its current
    /// read/write interest.
    pub fn fill_snapshot(&self, snapshot: &mut Snapshot) {
        for &fd in &self.read_interest {
            snapshot.watch(fd, self.write_interest.contains(&fd));
        }
    }

    /// Registered descriptors, oldest first.
    #[inline]
    pub fn descriptors(&self) -> &[RawFd] {
        &self.order
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[inline]
    pub fn highest_fd(&self) -> RawFd {
        self.highest_fd
    }

    #[inline]
    pub fn is_read_interested(&self, fd: RawFd) -> bool {
        self.read_interest.contains(&fd)
    }

    #[inline]
    pub fn is_write_interested(&self, fd: RawFd) -> bool {
        self.write_interest.contains(&fd)
    }
}
