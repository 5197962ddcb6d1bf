use anyhow::{Context, Result};
use basalt_config::RelayConfig;
use basalt_core::{EventLoop, LoopConfig, Shutdown, install_signal_handlers};
use std::net::TcpListener;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: basalt <port> [config.toml]";

/// Accepts exactly one port argument in `0..=65535`, optionally followed by a
/// config file path.
fn parse_args(args: &[String]) -> Option<(u16, Option<&str>)> {
    match args {
        [_, port] => Some((port.parse().ok()?, None)),
        [_, port, config] => Some((port.parse().ok()?, Some(config.as_str()))),
        _ => None,
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some((port, config_path)) = parse_args(&args) else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let config = match config_path {
        Some(path) => RelayConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => RelayConfig::default(),
    };
    init_tracing(&config.log_level);

    let listener = TcpListener::bind((config.bind_address.as_str(), port))
        .with_context(|| format!("binding {}:{port}", config.bind_address))?;
    listener
        .set_nonblocking(true)
        .context("making listener non-blocking")?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let shutdown = Shutdown::new().context("creating shutdown pipe")?;
    install_signal_handlers(&shutdown).context("installing signal handlers")?;

    let loop_config = LoopConfig {
        buffer_size: config.buffer_size,
        nodelay: config.nodelay,
    };
    let mut relay = EventLoop::new(listener, shutdown, loop_config)?;
    relay.run();
    Ok(())
}
