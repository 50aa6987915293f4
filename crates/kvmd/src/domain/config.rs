//! Daemon configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty (or missing) file yields a working
//! daemon for local development.  A typical appliance config looks like:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! auth_token = "s3cret"
//!
//! [serial]
//! port = "/dev/ttyGS0"
//! command_settle_secs = 5
//!
//! [battery]
//! port = "/dev/ttyAMA3"
//! protocol = "sta"
//!
//! [[streams]]
//! name = "streamer"
//! command = ["/usr/bin/ustreamer", "--device=/dev/video0"]
//!
//! [[streams]]
//! name = "streamer_aux"
//! forever = true
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take the value of
//! `some_fn()` when absent, so older files keep working when new fields are
//! added.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes an unusable daemon.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub keymaps: KeymapsConfig,
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
}

/// HTTP listener and request-auth settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Shared token required on every request.  `None` disables auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Diagnostic serial link supervised by the heartbeat watchdog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound on a single blocking read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// How long a command may produce output before the response is taken.
    #[serde(default = "default_command_settle_secs")]
    pub command_settle_secs: u64,
    /// Cadence of the supervising read loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls without a heartbeat before the link is recycled.
    #[serde(default = "default_max_wait_count")]
    pub max_wait_count: u32,
    /// Pause between closing and reopening a stalled link.
    #[serde(default = "default_reopen_delay_ms")]
    pub reopen_delay_ms: u64,
    /// Liveness marker printed periodically by the target.
    #[serde(default = "default_heartbeat_marker")]
    pub heartbeat_marker: String,
    /// Appended to every command before it is written.
    #[serde(default = "default_line_ending")]
    pub line_ending: String,
    /// Command issued by `POST /api/serial/reset_edk`.
    #[serde(default = "default_reset_command")]
    pub reset_command: String,
}

/// Microcontroller link used for battery simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatteryConfig {
    #[serde(default = "default_battery_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Firmware generation: `"sta"` or `"start"`.
    #[serde(default = "default_battery_protocol")]
    pub protocol: String,
}

/// Location of the HID keymap catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeymapsConfig {
    #[serde(default = "default_keymaps_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_keymap")]
    pub default: String,
}

/// One video stream and its lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Unique name; also the `/api/streamer/<name>` path segment.
    pub name: String,
    /// Keep the stream running even without viewers.
    #[serde(default)]
    pub forever: bool,
    /// Streamer program and fixed arguments.  Empty means "no process".
    #[serde(default)]
    pub command: Vec<String>,
    /// Grace period before a stream without viewers is stopped.
    #[serde(default = "default_shutdown_delay_secs")]
    pub shutdown_delay_secs: u64,
    /// Parameters the streamer starts with; only these keys can be changed.
    #[serde(default = "default_stream_params")]
    pub params: toml::Table,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_serial_port() -> String {
    "/dev/ttyGS0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_read_timeout_ms() -> u64 {
    1_000
}
fn default_command_settle_secs() -> u64 {
    5
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_max_wait_count() -> u32 {
    1_000
}
fn default_reopen_delay_ms() -> u64 {
    1_000
}
fn default_heartbeat_marker() -> String {
    "Heartbeat".to_string()
}
fn default_line_ending() -> String {
    "\r\n".to_string()
}
fn default_reset_command() -> String {
    "reset -c >a fs0:log.txt".to_string()
}
fn default_battery_port() -> String {
    "/dev/ttyAMA3".to_string()
}
fn default_battery_protocol() -> String {
    "sta".to_string()
}
fn default_keymaps_dir() -> PathBuf {
    PathBuf::from("/usr/share/kvmd/keymaps")
}
fn default_keymap() -> String {
    "en-us".to_string()
}
fn default_shutdown_delay_secs() -> u64 {
    10
}
fn default_stream_params() -> toml::Table {
    let mut params = toml::Table::new();
    params.insert("quality".to_string(), toml::Value::Integer(80));
    params.insert("desired_fps".to_string(), toml::Value::Integer(30));
    params
}
fn default_streams() -> Vec<StreamConfig> {
    vec![StreamConfig {
        name: "streamer".to_string(),
        forever: false,
        command: Vec::new(),
        shutdown_delay_secs: default_shutdown_delay_secs(),
        params: default_stream_params(),
    }]
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            serial: SerialConfig::default(),
            battery: BatteryConfig::default(),
            keymaps: KeymapsConfig::default(),
            streams: default_streams(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            command_settle_secs: default_command_settle_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_count: default_max_wait_count(),
            reopen_delay_ms: default_reopen_delay_ms(),
            heartbeat_marker: default_heartbeat_marker(),
            line_ending: default_line_ending(),
            reset_command: default_reset_command(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            port: default_battery_port(),
            baud_rate: default_baud_rate(),
            protocol: default_battery_protocol(),
        }
    }
}

impl Default for KeymapsConfig {
    fn default() -> Self {
        Self {
            dir: default_keymaps_dir(),
            default: default_keymap(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_settle(&self) -> Duration {
        Duration::from_secs(self.command_settle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }
}

impl StreamConfig {
    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.shutdown_delay_secs)
    }
}

impl DaemonConfig {
    /// Checks cross-field rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for duplicate or empty stream names,
    /// an unknown battery protocol, or a zero `max_wait_count`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for stream in &self.streams {
            if stream.name.is_empty() {
                return Err(ConfigError::Invalid("stream name must not be empty".into()));
            }
            if !seen.insert(stream.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stream name {:?}",
                    stream.name
                )));
            }
        }
        if kvmd_core::protocol::battery::protocol_by_name(&self.battery.protocol).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown battery protocol {:?} (expected \"sta\" or \"start\")",
                self.battery.protocol
            )));
        }
        if self.serial.max_wait_count == 0 {
            return Err(ConfigError::Invalid("serial.max_wait_count must be at least 1".into()));
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads and validates the config at `path`, returning
/// `DaemonConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<DaemonConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    config.validate()?;
    Ok(config)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_matches_appliance_defaults() {
        // Arrange / Act
        let cfg = DaemonConfig::default();

        // Assert
        assert_eq!(cfg.server.bind.port(), 8080);
        assert_eq!(cfg.serial.port, "/dev/ttyGS0");
        assert_eq!(cfg.serial.baud_rate, 115_200);
        assert_eq!(cfg.serial.max_wait_count, 1_000);
        assert_eq!(cfg.serial.command_settle(), Duration::from_secs(5));
        assert_eq!(cfg.serial.heartbeat_marker, "Heartbeat");
        assert_eq!(cfg.battery.protocol, "sta");
    }

    #[test]
    fn test_default_config_has_one_stream() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.streams.len(), 1);
        assert_eq!(cfg.streams[0].name, "streamer");
        assert!(!cfg.streams[0].forever);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: DaemonConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn test_partial_serial_section_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[serial]
port = "/dev/ttyUSB1"
max_wait_count = 5
"#;

        // Act
        let cfg: DaemonConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.serial.port, "/dev/ttyUSB1");
        assert_eq!(cfg.serial.max_wait_count, 5);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.serial.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_multiple_streams_parse_in_order() {
        let toml_str = r#"
[[streams]]
name = "main"
command = ["/bin/streamer", "--device=/dev/video0"]

[[streams]]
name = "aux"
forever = true
shutdown_delay_secs = 0
"#;
        let cfg: DaemonConfig = toml::from_str(toml_str).expect("deserialize streams");

        assert_eq!(cfg.streams.len(), 2);
        assert_eq!(cfg.streams[0].command.len(), 2);
        assert!(cfg.streams[1].forever);
        assert_eq!(cfg.streams[1].shutdown_delay(), Duration::ZERO);
        assert!(cfg.streams[1].params.contains_key("quality"));
    }

    #[test]
    fn test_validate_rejects_duplicate_stream_names() {
        let mut cfg = DaemonConfig::default();
        cfg.streams.push(cfg.streams[0].clone());

        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_battery_protocol() {
        let mut cfg = DaemonConfig::default();
        cfg.battery.protocol = "legacy".to_string();

        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&dir.path().join("missing.toml")).expect("defaults");
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[server]\nbind = \"127.0.0.1:9000\"\nauth_token = \"abc\"").unwrap();

        // Act
        let cfg = load_config(file.path()).expect("load");

        // Assert
        assert_eq!(cfg.server.bind.port(), 9000);
        assert_eq!(cfg.server.auth_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_load_config_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }
}
