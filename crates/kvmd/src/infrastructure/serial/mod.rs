//! Serial transport to the attached microcontroller and the diagnostic target.
//!
//! Two links exist on a typical appliance:
//!
//! - the **diagnostic link** (`/dev/ttyGS0`), a USB gadget serial port wired
//!   to the managed host's firmware shell.  It is driven by the
//!   [`watchdog::WatchdogSerialClient`], which supervises it with a heartbeat
//!   and recycles the port when the target goes quiet;
//! - the **battery link** (`/dev/ttyAMA3`), a UART to the microcontroller
//!   that simulates a laptop battery, driven by [`battery::BatteryService`].
//!
//! # Testability
//!
//! Physical ports sit behind the [`SerialLink`] trait.  Production code uses
//! [`link::TokioSerialLink`]; tests use [`mock::MockSerialLink`], which plays
//! back scripted input and records what was written.

use async_trait::async_trait;
use thiserror::Error;

pub mod battery;
pub mod link;
pub mod mock;
pub mod watchdog;

/// Error type for serial transport operations.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("serial port is not open")]
    NotOpen,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no command provided")]
    EmptyCommand,

    #[error("no response from serial device")]
    NoResponse,
}

/// A byte-oriented serial port that can be closed and reopened.
#[async_trait]
pub trait SerialLink: Send {
    /// Device path, for logs.
    fn port_name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Opens the port.  Opening an already open port is a no-op.
    async fn open(&mut self) -> Result<(), SerialError>;

    /// Closes the port.  Closing a closed port is a no-op.
    fn close(&mut self);

    /// Writes all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<(), SerialError>;

    /// Returns whatever arrives within the link's read timeout; empty when
    /// the line was quiet.
    async fn read_available(&mut self) -> Result<Vec<u8>, SerialError>;
}
