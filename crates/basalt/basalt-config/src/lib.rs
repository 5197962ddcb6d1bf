mod config;

pub use config::{ConfigError, RelayConfig};
