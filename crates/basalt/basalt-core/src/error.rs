use std::collections::TryReserveError;
use std::io;
use std::os::fd::RawFd;

/// Failures surfaced by the connection pool and its per-connection queues.
///
/// None of these are fatal to the process: the event loop logs them and either
/// continues or drops the one connection involved.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("descriptor {0} is not registered")]
    NotFound(RawFd),

    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("allocation failed")]
    Allocation(#[from] TryReserveError),

    #[error("write to descriptor {fd} failed")]
    Write {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
}
