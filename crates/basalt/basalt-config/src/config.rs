use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,
    /// Bytes read per socket readiness; every read is broadcast as one chunk.
    #[serde(default = "defaults::buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "defaults::nodelay")]
    pub nodelay: bool,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    pub fn bind_address() -> String {
        "0.0.0.0".into()
    }

    pub fn buffer_size() -> usize {
        4096
    }

    pub fn nodelay() -> bool {
        true
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::bind_address(),
            buffer_size: defaults::buffer_size(),
            nodelay: defaults::nodelay(),
            log_level: defaults::log_level(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than zero"));
        }
        Ok(())
    }
}
