//! Bridge configuration (`bridge.toml`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Chunk size for push-direction reads: 16 KiB plus room for a record header.
pub const DEFAULT_CHUNK_SIZE: usize = 16_640;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Largest chunk read from a blocking reader per host `pull`.
    pub chunk_size: usize,
    /// Async worker threads driving socket deadline races.
    pub worker_threads: usize,
    /// Upper bound on concurrently running bridge I/O tasks (reader pulls,
    /// socket operations). Relays of one host stream into another hold a
    /// thread per hop while they wait.
    pub max_blocking_threads: usize,
    /// Upper bound on concurrently running handlers and `waitUntil` tasks.
    /// Invocations beyond it queue until a handler returns.
    pub max_handler_threads: usize,
    pub thread_name: String,
    pub socket: SocketConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Applied as both read and write deadline of newly connected sockets,
    /// relative to connect time. Absent means no deadline.
    pub default_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_threads: 1,
            max_blocking_threads: 512,
            max_handler_threads: 512,
            thread_name: "warpgrid-bridge".to_string(),
            socket: SocketConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let config: BridgeConfig =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.chunk_size == 0 {
            return Err(BridgeError::Config("chunk_size must be > 0".into()));
        }
        if self.worker_threads == 0 {
            return Err(BridgeError::Config("worker_threads must be > 0".into()));
        }
        if self.max_blocking_threads == 0 {
            return Err(BridgeError::Config("max_blocking_threads must be > 0".into()));
        }
        if self.max_handler_threads == 0 {
            return Err(BridgeError::Config("max_handler_threads must be > 0".into()));
        }
        Ok(())
    }
}

impl SocketConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.chunk_size, 16_640);
        assert_eq!(config.socket.default_timeout(), None);
    }

    #[test]
    fn parse_overrides() {
        let config = BridgeConfig::from_toml_str(
            r#"
chunk_size = 4096
max_blocking_threads = 8
max_handler_threads = 32

[socket]
default_timeout_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.max_blocking_threads, 8);
        assert_eq!(config.max_handler_threads, 32);
        assert_eq!(
            config.socket.default_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = BridgeConfig::from_toml_str("chunk_size = 0").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = BridgeConfig::default();
        config.socket.default_timeout_ms = Some(1_000);
        let text = config.to_toml_string().unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }
}
