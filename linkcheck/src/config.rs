use anyhow::{Context, Result};
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf};
use tokio::time::Duration;

// Parses a duration string (e.g., "5s", "1m") into a `tokio::time::Duration`.
// Used for deserializing duration values from the config file.
fn parse_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// HTTP listener settings.
/// Corresponds to the [server] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_listen")]
    pub listen: SocketAddr,
}

impl ServerConfig {
    fn default_listen() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 8080))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
        }
    }
}

/// Where the state snapshot lives.
/// Corresponds to the [storage] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_state_file")]
    pub state_file: PathBuf,
}

impl StorageConfig {
    fn default_state_file() -> PathBuf {
        PathBuf::from("state.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: Self::default_state_file(),
        }
    }
}

/// Task queue settings.
/// Corresponds to the [queue] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    // The number of worker tasks to spawn.
    #[serde(default = "QueueConfig::default_num_workers")]
    pub num_workers: usize,

    // Capacity of the dispatch channel.
    #[serde(default = "QueueConfig::default_channel_capacity")]
    pub channel_capacity: usize,

    // How long enqueue waits for channel space before deferring the task.
    #[serde(
        default = "QueueConfig::default_enqueue_timeout",
        deserialize_with = "parse_duration"
    )]
    pub enqueue_timeout: Duration,

    // How long shutdown waits for workers before cancelling them.
    #[serde(
        default = "QueueConfig::default_shutdown_timeout",
        deserialize_with = "parse_duration"
    )]
    pub shutdown_timeout: Duration,

    // Whether markers left in the processing phase are retried on startup.
    #[serde(default = "QueueConfig::default_retry_processing")]
    pub retry_processing: bool,
}

impl QueueConfig {
    fn default_num_workers() -> usize {
        5
    }

    fn default_channel_capacity() -> usize {
        100
    }

    fn default_enqueue_timeout() -> Duration {
        Duration::from_secs(1)
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_retry_processing() -> bool {
        true
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_workers: Self::default_num_workers(),
            channel_capacity: Self::default_channel_capacity(),
            enqueue_timeout: Self::default_enqueue_timeout(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            retry_processing: Self::default_retry_processing(),
        }
    }
}

/// Probe settings.
/// Corresponds to the [checker] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct CheckerConfig {
    #[serde(
        default = "CheckerConfig::default_timeout",
        deserialize_with = "parse_duration"
    )]
    pub timeout: Duration,

    #[serde(default = "CheckerConfig::default_user_agent")]
    pub user_agent: String,
}

impl CheckerConfig {
    fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_user_agent() -> String {
        "LinkCheck/1.0".to_string()
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Self::default_timeout(),
            user_agent: Self::default_user_agent(),
        }
    }
}

/// Logging settings.
/// Corresponds to the [log] section in the TOML config file.
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    // Filter directives used when RUST_LOG is not set.
    #[serde(default = "LogConfig::default_filter")]
    pub filter: String,

    // Directory for daily rotated log files. Logs go to stdout when unset.
    pub directory: Option<PathBuf>,
}

impl LogConfig {
    fn default_filter() -> String {
        "linkcheck=info".to_string()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
            directory: None,
        }
    }
}

/// Represents the overall application configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub checker: CheckerConfig,
}

impl Config {
    /// Loads the config file if one is given, otherwise the defaults.
    pub fn new(config_path: Option<&PathBuf>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Replaces the listen port, keeping the address.
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.listen.set_port(port);
        self
    }

    // Loads configuration from a TOML file.
    fn load_from_file(config_path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Helper function to create a temporary config file with given content.
    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[server]
listen = "127.0.0.1:9000"

[storage]
state_file = "/var/lib/linkcheck/state.json"

[queue]
num_workers = 3
channel_capacity = 10
enqueue_timeout = "250ms"
shutdown_timeout = "1m"
retry_processing = false

[checker]
timeout = "2s"
user_agent = "test-agent"

[log]
filter = "linkcheck=debug"
directory = "/var/log/linkcheck"
"#;
        let temp_file = create_temp_config(config_content);
        let config_path = temp_file.path().to_path_buf();

        let config = Config::load_from_file(&config_path).expect("valid config");

        assert_eq!(config.server.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(
            config.storage.state_file,
            PathBuf::from("/var/lib/linkcheck/state.json")
        );
        assert_eq!(config.queue.num_workers, 3);
        assert_eq!(config.queue.channel_capacity, 10);
        assert_eq!(config.queue.enqueue_timeout, Duration::from_millis(250));
        assert_eq!(config.queue.shutdown_timeout, Duration::from_secs(60));
        assert!(!config.queue.retry_processing);
        assert_eq!(config.checker.timeout, Duration::from_secs(2));
        assert_eq!(config.checker.user_agent, "test-agent");
        assert_eq!(config.log.filter, "linkcheck=debug");
        assert_eq!(config.log.directory, Some(PathBuf::from("/var/log/linkcheck")));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let config_content = r#"
[queue]
num_workers = 20
"#;
        let temp_file = create_temp_config(config_content);
        let config_path = temp_file.path().to_path_buf();

        let config = Config::load_from_file(&config_path).expect("valid config");

        assert_eq!(config.queue.num_workers, 20);
        assert_eq!(
            config.queue.channel_capacity,
            QueueConfig::default_channel_capacity()
        );
        assert_eq!(config.queue.enqueue_timeout, Duration::from_secs(1));
        assert!(config.queue.retry_processing);
        assert_eq!(config.server.listen, ServerConfig::default_listen());
        assert_eq!(config.storage.state_file, PathBuf::from("state.json"));
        assert_eq!(config.checker.user_agent, "LinkCheck/1.0");
        assert_eq!(config.log.filter, "linkcheck=info");
        assert!(config.log.directory.is_none());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config_path =
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/linkcheck.toml");

        let config = Config::new(Some(&config_path)).expect("shipped config should parse");
        assert_eq!(config.queue.num_workers, 5);
        assert_eq!(config.server.listen, ServerConfig::default_listen());
    }

    #[test]
    fn test_no_config_path_uses_defaults() {
        let config = Config::new(None).expect("defaults");

        assert_eq!(config.queue.num_workers, 5);
        assert_eq!(config.queue.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.checker.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_with_port_overrides_listen_port() {
        let config = Config::default().with_port(3000);
        assert_eq!(config.server.listen, "0.0.0.0:3000".parse().unwrap());
    }

    #[test]
    fn test_load_invalid_toml() {
        let config_content = r#"
[queue
num_workers = 1 # Missing closing bracket
"#;
        let temp_file = create_temp_config(config_content);
        let config_path = temp_file.path().to_path_buf();

        let err = Config::load_from_file(&config_path).unwrap_err();
        let found = err.chain().any(|e| e.is::<toml::de::Error>());
        assert!(found, "Error should be toml::de::Error");
    }

    #[test]
    fn test_load_non_existent_file() {
        let config_path = PathBuf::from("non_existent_config_file.toml");
        let err = Config::new(Some(&config_path)).unwrap_err();
        let io_err = err
            .downcast_ref::<std::io::Error>()
            .expect("Error should be std::io::Error");
        assert_eq!(io_err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_load_config_with_invalid_duration() {
        let config_content = r#"
[queue]
enqueue_timeout = "5xyz"
"#;
        let temp_file = create_temp_config(config_content);
        let config_path = temp_file.path().to_path_buf();

        let err = Config::load_from_file(&config_path).unwrap_err();
        let found = err.chain().any(|e| e.is::<toml::de::Error>());
        assert!(found, "Error should be toml::de::Error");
    }
}
