//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::codec::MAX_PAYLOAD_LEN;
use crate::error::{ClientError, Result};
use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Default reconnect interval in seconds.
pub const DEFAULT_RECONNECT_SECS: u64 = 5;

/// Socket-level options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    /// Enable TCP_NODELAY (disable Nagle's algorithm).
    pub no_delay: bool,
    /// Connection timeout. `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
    /// Per-frame write timeout. `None` means no timeout.
    pub write_timeout: Option<Duration>,
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            no_delay: false,
            connect_timeout: Some(Duration::from_secs(30)),
            write_timeout: None,
            read_buffer_size: 8192,
        }
    }
}

impl SocketConfig {
    /// Create a socket configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = enabled;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Disable the connection timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect_timeout = None;
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

/// Reconnect policy: a fixed delay between attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before each reconnect attempt.
    pub interval: Duration,
    /// Maximum consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(DEFAULT_RECONNECT_SECS))
    }
}

impl ReconnectConfig {
    /// Retry forever, waiting `interval` between attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` consecutive failures.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Configuration for an [`AsyncClient`](super::AsyncClient).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sockline::ClientConfig;
///
/// let config = ClientConfig::new("127.0.0.1", 9000)
///     .reconnect_interval(Duration::from_secs(1))
///     .no_delay(true)
///     .chunk_size(16 * 1024);
///
/// assert_eq!(config.address(), "127.0.0.1:9000");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Socket-level options.
    pub socket: SocketConfig,
    /// Reconnect policy. `None` ends in `Disconnected` after the first loss.
    pub reconnect: Option<ReconnectConfig>,
    /// Maximum file chunk size in bytes.
    pub chunk_size: usize,
    /// Directory received files are confined to. `None` uses remote paths as
    /// given.
    pub receive_root: Option<PathBuf>,
    /// Start reading as soon as a connection is established. When off,
    /// nothing is read until `receive()` is called.
    pub auto_receive: bool,
}

impl ClientConfig {
    /// Create a configuration with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: SocketConfig::default(),
            reconnect: Some(ReconnectConfig::default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            receive_root: None,
            auto_receive: true,
        }
    }

    /// Set socket options.
    pub fn socket_config(mut self, config: SocketConfig) -> Self {
        self.socket = config;
        self
    }

    /// Reconnect every `interval` after a loss or failed attempt.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        let max_attempts = self.reconnect.as_ref().and_then(|r| r.max_attempts);
        self.reconnect = Some(ReconnectConfig {
            interval,
            max_attempts,
        });
        self
    }

    /// Set the reconnect policy.
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    /// Never reconnect.
    pub fn no_reconnect(mut self) -> Self {
        self.reconnect = None;
        self
    }

    /// Give up after `attempts` consecutive failed reconnects.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect = Some(self.reconnect.unwrap_or_default().max_attempts(attempts));
        self
    }

    /// Enable TCP_NODELAY.
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.socket.no_delay = enabled;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.socket.connect_timeout = Some(timeout);
        self
    }

    /// Set the per-frame write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.socket.write_timeout = Some(timeout);
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.socket.read_buffer_size = size;
        self
    }

    /// Set the file chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Confine received files to `root`.
    pub fn receive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.receive_root = Some(root.into());
        self
    }

    /// Choose whether reading starts automatically on connect.
    pub fn auto_receive(mut self, enabled: bool) -> Self {
        self.auto_receive = enabled;
        self
    }

    /// Get the address string (host:port).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must not be zero".into()));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_LEN {
            return Err(ClientError::Config(format!(
                "chunk size must be between 1 and {MAX_PAYLOAD_LEN} bytes"
            )));
        }
        if self.socket.read_buffer_size == 0 {
            return Err(ClientError::Config("read buffer size must not be zero".into()));
        }
        if let Some(reconnect) = &self.reconnect
            && reconnect.interval.is_zero()
        {
            return Err(ClientError::Config("reconnect interval must not be zero".into()));
        }
        Ok(())
    }

    /// Parse a configuration from TOML.
    ///
    /// ```
    /// use sockline::ClientConfig;
    ///
    /// let config = ClientConfig::from_toml_str(r#"
    ///     host = "10.0.0.5"
    ///     port = 7000
    ///
    ///     [reconnect]
    ///     interval_secs = 2
    ///     max_attempts = 10
    ///
    ///     [transfer]
    ///     chunk_size = 4096
    /// "#).unwrap();
    ///
    /// assert_eq!(config.chunk_size, 4096);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| ClientError::Config(e.message().to_string()))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

/// On-disk layout. Durations are whole seconds; zero disables a timeout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    host: String,
    port: u16,
    #[serde(default)]
    socket: SocketSection,
    #[serde(default)]
    reconnect: ReconnectSection,
    #[serde(default)]
    transfer: TransferSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SocketSection {
    no_delay: Option<bool>,
    connect_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    read_buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReconnectSection {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransferSection {
    chunk_size: Option<usize>,
    receive_root: Option<PathBuf>,
    auto_receive: Option<bool>,
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ConfigFile {
    fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig::new(self.host, self.port);

        let socket = &mut config.socket;
        if let Some(no_delay) = self.socket.no_delay {
            socket.no_delay = no_delay;
        }
        if let Some(secs) = self.socket.connect_timeout_secs {
            socket.connect_timeout = seconds(secs);
        }
        if let Some(secs) = self.socket.write_timeout_secs {
            socket.write_timeout = seconds(secs);
        }
        if let Some(size) = self.socket.read_buffer_size {
            socket.read_buffer_size = size;
        }

        config.reconnect = if self.reconnect.enabled == Some(false) {
            None
        } else {
            Some(ReconnectConfig {
                interval: Duration::from_secs(
                    self.reconnect.interval_secs.unwrap_or(DEFAULT_RECONNECT_SECS),
                ),
                max_attempts: self.reconnect.max_attempts,
            })
        };

        if let Some(size) = self.transfer.chunk_size {
            config.chunk_size = size;
        }
        config.receive_root = self.transfer.receive_root;
        if let Some(enabled) = self.transfer.auto_receive {
            config.auto_receive = enabled;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("localhost", 8080);
        assert_eq!(config.address(), "localhost:8080");
        assert_eq!(
            config.reconnect,
            Some(ReconnectConfig::fixed(Duration::from_secs(5)))
        );
        assert_eq!(config.socket.connect_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.socket.read_buffer_size, 8192);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert!(config.auto_receive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("localhost", 8080)
            .max_attempts(3)
            .reconnect_interval(Duration::from_secs(1))
            .no_delay(true)
            .write_timeout(Duration::from_secs(2))
            .receive_root("/srv/inbox")
            .auto_receive(false);

        assert_eq!(
            config.reconnect,
            Some(ReconnectConfig::fixed(Duration::from_secs(1)).max_attempts(3))
        );
        assert!(config.socket.no_delay);
        assert_eq!(config.socket.write_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.receive_root, Some(PathBuf::from("/srv/inbox")));
        assert!(!config.auto_receive);

        assert!(config.no_reconnect().reconnect.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = ClientConfig::new("localhost", 8080);
        assert!(base.clone().chunk_size(0).validate().is_err());
        assert!(base.clone().chunk_size(MAX_PAYLOAD_LEN + 1).validate().is_err());
        assert!(base.clone().read_buffer_size(0).validate().is_err());
        assert!(base.clone().reconnect_interval(Duration::ZERO).validate().is_err());
        assert!(ClientConfig::new("", 1).validate().is_err());
        assert!(ClientConfig::new("h", 0).validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            host = "127.0.0.1"
            port = 9000

            [socket]
            no_delay = true
            connect_timeout_secs = 0
            write_timeout_secs = 4

            [reconnect]
            interval_secs = 1
            max_attempts = 3

            [transfer]
            receive_root = "inbox"
            auto_receive = false
            "#,
        )
        .unwrap();

        assert_eq!(config.address(), "127.0.0.1:9000");
        assert!(config.socket.no_delay);
        assert_eq!(config.socket.connect_timeout, None);
        assert_eq!(config.socket.write_timeout, Some(Duration::from_secs(4)));
        assert_eq!(
            config.reconnect,
            Some(ReconnectConfig::fixed(Duration::from_secs(1)).max_attempts(3))
        );
        assert_eq!(config.receive_root, Some(PathBuf::from("inbox")));
        assert!(!config.auto_receive);
    }

    #[test]
    fn test_from_toml_errors() {
        let err = ClientConfig::from_toml_str("host = \"h\"\nport = 1\nbogus = true").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let config = ClientConfig::from_toml_str("host = \"h\"\nport = 1\n[reconnect]\nenabled = false")
            .unwrap();
        assert!(config.reconnect.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "host = \"example.org\"\nport = 443\n").unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.address(), "example.org:443");

        assert!(ClientConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
