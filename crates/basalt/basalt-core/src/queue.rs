//! Per-connection outbound buffering.
//!
//! Every peer owns one [`MessageQueue`]. Broadcast payloads are copied into
//! owned [`Message`]s and appended at the tail; the event loop flushes the head
//! whenever the peer's socket reports write-readiness. Insertion order is
//! transmission order.

use crate::error::PoolError;
use std::collections::{TryReserveError, VecDeque};
use std::io::{self, ErrorKind, Write};

/// An immutable chunk of bytes waiting to be sent to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: Box<[u8]>,
}

impl Message {
    /// Copies `bytes` into a freshly allocated message.
    ///
    /// Allocation goes through `try_reserve_exact` so that running out of
    /// memory costs one recipient its copy instead of aborting the process.
    pub fn copy_from(bytes: &[u8]) -> Result<Self, PoolError> {
        if bytes.is_empty() {
            return Err(PoolError::InvalidArgument("empty payload"));
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes.len())?;
        buf.extend_from_slice(bytes);
        Ok(Self {
            payload: buf.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }
}

/// Result of one [`MessageQueue::drain_once`] call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The head went out and nothing else is queued.
    Empty,
    /// The head went out and more messages are waiting.
    Remaining,
    /// The transport stopped accepting bytes mid-message. The write offset is
    /// kept and the next write-readiness resumes from it.
    Blocked,
}

/// FIFO of pending messages plus the offset already written from the head.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: VecDeque<Message>,
    /// Bytes of the head message already accepted by the transport.
    offset: usize,
    /// Total bytes handed to the transport over the queue's lifetime.
    sent: u64,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` at the tail in O(1).
    pub fn push(&mut self, message: Message) -> Result<(), TryReserveError> {
        self.messages.try_reserve(1)?;
        self.messages.push_back(message);
        Ok(())
    }

    /// Writes the head message to `out`, starting at the recorded offset.
    ///
    /// Partial writes advance the offset and the write is retried until the
    /// whole head is sent, the transport would block, or it errors. A write
    /// that reports zero accepted bytes is returned as [`ErrorKind::WriteZero`]
    /// and the caller is expected to drop the connection: on a non-blocking
    /// socket that result cannot be told apart from a dead peer.
    pub fn drain_once<W: Write>(&mut self, out: &mut W) -> io::Result<DrainStatus> {
        let Some(head) = self.messages.front() else {
            return Ok(DrainStatus::Empty);
        };

        while self.offset < head.len() {
            match out.write(&head.as_bytes()[self.offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "transport accepted zero bytes",
                    ));
                }
                Ok(n) => {
                    self.offset += n;
                    self.sent += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(DrainStatus::Blocked),
                Err(e) => return Err(e),
            }
        }

        self.messages.pop_front();
        self.offset = 0;

        if self.messages.is_empty() {
            Ok(DrainStatus::Empty)
        } else {
            Ok(DrainStatus::Remaining)
        }
    }

    /// Drops every pending message. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.messages.len();
        self.messages.clear();
        self.offset = 0;
        discarded
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bytes of the head message already written.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that replays a script of per-call outcomes, then accepts
    /// everything. `Some(n)` accepts at most `n` bytes, `None` would block.
    struct ScriptedWriter {
        script: VecDeque<Option<usize>>,
        written: Vec<u8>,
    }

    impl ScriptedWriter {
        fn new(script: &[Option<usize>]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                written: Vec::new(),
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.script.pop_front() {
                Some(Some(limit)) => limit.min(buf.len()),
                Some(None) => return Err(ErrorKind::WouldBlock.into()),
                None => buf.len(),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn queue_of(chunks: &[&[u8]]) -> MessageQueue {
        let mut q = MessageQueue::new();
        for chunk in chunks {
            q.push(Message::copy_from(chunk).unwrap()).unwrap();
        }
        q
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            Message::copy_from(b""),
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn message_copies_its_payload() {
        let mut src = b"hello".to_vec();
        let msg = Message::copy_from(&src).unwrap();
        src[0] = b'j';
        assert_eq!(msg.as_bytes(), b"hello");
        assert_eq!(msg.len(), 5);
    }

    #[test]
    fn drains_one_message_per_call_in_fifo_order() {
        let mut q = queue_of(&[b"M1", b"M2"]);
        let mut out = ScriptedWriter::new(&[]);

        assert_eq!(q.drain_once(&mut out).unwrap(), DrainStatus::Remaining);
        assert_eq!(out.written, b"M1");
        assert_eq!(q.drain_once(&mut out).unwrap(), DrainStatus::Empty);
        assert_eq!(out.written, b"M1M2");
        assert_eq!(q.bytes_sent(), 4);
    }

    #[test]
    fn partial_writes_are_retried_until_the_head_is_sent() {
        let mut q = queue_of(&[b"abcdef", b"gh"]);
        let mut out = ScriptedWriter::new(&[Some(1), Some(2), Some(1)]);

        assert_eq!(q.drain_once(&mut out).unwrap(), DrainStatus::Remaining);
        assert_eq!(out.written, b"abcdef");
        assert_eq!(q.len(), 1);
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn would_block_keeps_offset_and_resumes() {
        let mut q = queue_of(&[b"abcdef"]);
        let mut out = ScriptedWriter::new(&[Some(4), None]);

        assert_eq!(q.drain_once(&mut out).unwrap(), DrainStatus::Blocked);
        assert_eq!(q.offset(), 4);
        assert_eq!(q.len(), 1);

        assert_eq!(q.drain_once(&mut out).unwrap(), DrainStatus::Empty);
        assert_eq!(out.written, b"abcdef");
        assert!(q.is_empty());
    }

    #[test]
    fn zero_byte_write_is_fatal() {
        let mut q = queue_of(&[b"abc"]);
        let mut out = ScriptedWriter::new(&[Some(0)]);

        let err = q.drain_once(&mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn draining_an_empty_queue_is_a_no_op() {
        let mut q = MessageQueue::new();
        let mut out = ScriptedWriter::new(&[]);
        assert_eq!(q.drain_once(&mut out).unwrap(), DrainStatus::Empty);
        assert!(out.written.is_empty());
    }

    #[test]
    fn clear_discards_pending_messages() {
        let mut q = queue_of(&[b"a", b"b", b"c"]);
        assert_eq!(q.clear(), 3);
        assert!(q.is_empty());
        assert_eq!(q.offset(), 0);
    }
}
