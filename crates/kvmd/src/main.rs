//! kvmd: KVM-over-IP control-plane daemon, entry point.
//!
//! Loads the TOML configuration, applies command-line overrides, initialises
//! logging and runs the server until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```text
//! kvmd [OPTIONS]
//!
//! Options:
//!   --config      <PATH>  Configuration file [default: /etc/kvmd/kvmd.toml]
//!   --bind        <ADDR>  HTTP listen address, overrides [server].bind
//!   --serial-port <PATH>  Diagnostic serial port, overrides [serial].port
//!   --log-level   <LEVEL> Log level when RUST_LOG is unset, overrides [server].log_level
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Description                   |
//! |--------------------|-------------------------------|
//! | `KVMD_CONFIG`      | Configuration file path       |
//! | `KVMD_BIND`        | HTTP listen address           |
//! | `KVMD_SERIAL_PORT` | Diagnostic serial port        |
//! | `KVMD_LOG_LEVEL`   | Fallback log level            |
//! | `RUST_LOG`         | Full `tracing` filter; wins over everything else |
//!
//! # Shutdown
//!
//! SIGINT and SIGTERM both start the graceful shutdown sequence.  A deadly
//! background task that dies sends SIGTERM to this process, so it goes
//! through the same path.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kvmd::domain::{load_config, DaemonConfig};
use kvmd::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// KVM-over-IP control-plane daemon.
#[derive(Debug, Parser)]
#[command(name = "kvmd", about = "KVM-over-IP control-plane daemon", version)]
struct Cli {
    /// Path to the TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "/etc/kvmd/kvmd.toml", env = "KVMD_CONFIG")]
    config: PathBuf,

    /// HTTP listen address.
    #[arg(long, env = "KVMD_BIND")]
    bind: Option<SocketAddr>,

    /// Diagnostic serial port device.
    #[arg(long, env = "KVMD_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "KVMD_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the configuration file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.serial_port {
            config.serial.port = port;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        Ok(config)
    }
}

// ── Shutdown signals ──────────────────────────────────────────────────────────

/// Resolves on the first SIGINT or SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a fatal task
/// signalling us during startup is not lost.
#[cfg(unix)]
fn shutdown_signal() -> anyhow::Result<impl std::future::Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
            },
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> anyhow::Result<impl std::future::Future<Output = ()> + Send + 'static> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
        }
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    let fallback = config.server.log_level.clone();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "kvmd {} starting: bind={}, serial={}, streams={}",
        env!("CARGO_PKG_VERSION"),
        config.server.bind,
        config.serial.port,
        config.streams.len()
    );

    let shutdown = shutdown_signal()?;
    run_server(&config, shutdown).await?;

    info!("kvmd stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli::parse_from(["kvmd"]);
        assert_eq!(cli.config, PathBuf::from("/etc/kvmd/kvmd.toml"));
        assert!(cli.bind.is_none());
    }

    #[test]
    fn test_cli_bind_override() {
        let cli = Cli::parse_from(["kvmd", "--bind", "127.0.0.1:9000"]);
        assert_eq!(cli.bind, Some("127.0.0.1:9000".parse().unwrap()));
    }

    #[test]
    fn test_cli_rejects_invalid_bind() {
        assert!(Cli::try_parse_from(["kvmd", "--bind", "not-an-addr"]).is_err());
    }

    #[test]
    fn test_into_config_missing_file_gives_defaults_with_overrides() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config: dir.path().join("absent.toml"),
            bind: Some("127.0.0.1:9000".parse().unwrap()),
            serial_port: Some("/dev/ttyUSB0".to_string()),
            log_level: Some("debug".to_string()),
        };

        // Act
        let config = cli.into_config().unwrap();

        // Assert
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.serial.baud_rate, 115_200);
    }

    #[test]
    fn test_into_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvmd.toml");
        std::fs::write(&path, "[serial]\nport = \"/dev/ttyS1\"\n").unwrap();
        let cli = Cli {
            config: path,
            bind: None,
            serial_port: None,
            log_level: None,
        };

        let config = cli.into_config().unwrap();

        assert_eq!(config.serial.port, "/dev/ttyS1");
    }

    #[test]
    fn test_into_config_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvmd.toml");
        std::fs::write(&path, "[serial\nport = ").unwrap();
        let cli = Cli {
            config: path,
            bind: None,
            serial_port: None,
            log_level: None,
        };

        assert!(cli.into_config().is_err());
    }
}
