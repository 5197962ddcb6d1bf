mod broadcast;
mod connection;
mod error;
mod event_loop;
mod poller;
mod pool;
mod queue;
mod shutdown;

pub use broadcast::{FanOut, broadcast};
pub use connection::{ConnectionRecord, Transport};
pub use error::PoolError;
pub use event_loop::{DEFAULT_BUFFER_SIZE, EventLoop, LoopConfig, LoopState};
pub use poller::{Ready, Snapshot};
pub use pool::{Closed, ConnectionPool, Rejected};
pub use queue::{DrainStatus, Message, MessageQueue};
pub use shutdown::{Shutdown, install_signal_handlers};
