use crate::connection::Transport;
use crate::error::PoolError;
use crate::pool::ConnectionPool;
use std::os::fd::RawFd;
use tracing::warn;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Peers that got a copy queued.
    pub delivered: usize,
    /// Peers whose copy could not be queued.
    pub missed: usize,
}

/// Queues `payload` on every connection in `pool` except `sender`.
///
/// Best effort: a recipient whose enqueue fails is logged and skipped, the
/// rest still get their copy. Each recipient's own queue stays FIFO, so chunks
/// from one sender reach every peer in the order they were read.
pub fn broadcast<S: Transport>(
    pool: &mut ConnectionPool<S>,
    sender: RawFd,
    payload: &[u8],
) -> Result<FanOut, PoolError> {
    if payload.is_empty() {
        return Err(PoolError::InvalidArgument("empty payload"));
    }

    let mut fan_out = FanOut::default();
    for i in 0..pool.len() {
        let fd = pool.descriptors()[i];
        if fd == sender {
            continue;
        }
        match pool.enqueue(fd, payload) {
            Ok(()) => fan_out.delivered += 1,
            Err(e) => {
                warn!(fd, sender, error = %e, "failed to queue message for peer");
                fan_out.missed += 1;
            }
        }
    }
    Ok(fan_out)
}
