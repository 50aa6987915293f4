//! Heartbeat-supervised request/response client for the diagnostic link.
//!
//! The target's firmware shell prints a liveness marker (`Heartbeat` by
//! default) at a steady cadence.  While a command is in flight a
//! [`HeartbeatReader`] polls the port, appends everything it reads to a shared
//! response buffer and counts polls since the last marker.  If the count
//! reaches `max_wait_count` the link is assumed wedged: it is closed, left
//! alone for `reopen_delay` and reopened.  That recovery is silent; callers
//! only ever see a response or an error.
//!
//! Each poll reports a [`PollOutcome`] instead of raising, so a stall (self
//! healing) and a real I/O failure (terminal for this read loop) are handled
//! by different match arms rather than by exception type.
//!
//! # Request lifecycle
//!
//! ```text
//! open → clear buffer → write → read loop runs for `command_settle`
//!      → stop read loop → drain buffer → close
//! ```
//!
//! The link is closed on every exit path.  One client exists per physical
//! port and is shared behind an async mutex, which serializes callers.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{SerialError, SerialLink};
use crate::domain::config::SerialConfig;

type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

/// Timing and marker settings for the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
    pub max_wait_count: u32,
    pub reopen_delay: Duration,
    pub command_settle: Duration,
    pub heartbeat_marker: String,
    pub line_ending: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from(&SerialConfig::default())
    }
}

impl From<&SerialConfig> for WatchdogConfig {
    fn from(config: &SerialConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_wait_count: config.max_wait_count,
            reopen_delay: config.reopen_delay(),
            command_settle: config.command_settle(),
            heartbeat_marker: config.heartbeat_marker.clone(),
            line_ending: config.line_ending.clone(),
        }
    }
}

/// Result of one read-loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing arrived.
    Idle,
    /// Data arrived and was appended to the buffer.
    Data { bytes: usize, heartbeat: bool },
    /// No heartbeat for too long; the link was closed and reopened.
    StallRecovered,
    /// The link failed and was closed.  The read loop ends.
    IoFailure(String),
}

fn lock_buffer(buffer: &StdMutex<String>) -> MutexGuard<'_, String> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The supervising read loop.
pub struct HeartbeatReader {
    link: SharedLink,
    buffer: Arc<StdMutex<String>>,
    config: WatchdogConfig,
    wait_count: u32,
}

impl HeartbeatReader {
    /// Polls since the last heartbeat (or since the last recovery).
    pub fn wait_count(&self) -> u32 {
        self.wait_count
    }

    /// One iteration: read, append, detect the marker, wait one interval,
    /// then either count the poll or recover from a stall.
    pub async fn tick(&mut self) -> PollOutcome {
        let read = self.link.lock().await.read_available().await;
        let data = match read {
            Ok(data) => data,
            Err(e) => {
                self.link.lock().await.close();
                return PollOutcome::IoFailure(e.to_string());
            }
        };

        let mut outcome = PollOutcome::Idle;
        if !data.is_empty() {
            let text = String::from_utf8_lossy(&data);
            let heartbeat = text.contains(self.config.heartbeat_marker.as_str());
            lock_buffer(&self.buffer).push_str(&text);
            debug!("Received from serial: {}", text.trim());
            if heartbeat {
                self.wait_count = 0;
            }
            outcome = PollOutcome::Data {
                bytes: data.len(),
                heartbeat,
            };
        }

        tokio::time::sleep(self.config.poll_interval).await;

        if self.wait_count >= self.config.max_wait_count {
            warn!(
                "Target is not ready: no heartbeat after {} polls, resetting serial port ...",
                self.wait_count
            );
            self.link.lock().await.close();
            tokio::time::sleep(self.config.reopen_delay).await;
            if let Err(e) = self.link.lock().await.open().await {
                return PollOutcome::IoFailure(e.to_string());
            }
            self.wait_count = 0;
            info!("Serial port reopened successfully");
            return PollOutcome::StallRecovered;
        }
        self.wait_count += 1;
        outcome
    }

    /// Ticks until an I/O failure.
    pub async fn run(mut self) {
        loop {
            if let PollOutcome::IoFailure(reason) = self.tick().await {
                error!("Error during serial read: {reason}");
                break;
            }
        }
    }
}

/// Request/response client for one serial port.
pub struct WatchdogSerialClient {
    link: SharedLink,
    buffer: Arc<StdMutex<String>>,
    config: WatchdogConfig,
    reader: Option<JoinHandle<()>>,
}

impl WatchdogSerialClient {
    pub fn new(link: Box<dyn SerialLink>, config: WatchdogConfig) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
            buffer: Arc::new(StdMutex::new(String::new())),
            config,
            reader: None,
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub async fn is_open(&self) -> bool {
        self.link.lock().await.is_open()
    }

    /// Opens the link if it is closed.
    ///
    /// # Errors
    ///
    /// [`SerialError::Open`] if the port cannot be opened.
    pub async fn open(&self) -> Result<(), SerialError> {
        let mut link = self.link.lock().await;
        if link.is_open() {
            return Ok(());
        }
        link.open().await?;
        info!("Serial port {} initialized", link.port_name());
        Ok(())
    }

    /// Writes `command` followed by the configured line ending.
    ///
    /// # Errors
    ///
    /// [`SerialError::NotOpen`] or an I/O error from the link.
    pub async fn write(&self, command: &str) -> Result<(), SerialError> {
        let line = format!("{command}{}", self.config.line_ending);
        self.link.lock().await.write(line.as_bytes()).await?;
        info!("Command sent: {command}");
        Ok(())
    }

    /// Takes everything accumulated so far, leaving the buffer empty.
    pub fn read_accumulated(&self) -> String {
        std::mem::take(&mut *lock_buffer(&self.buffer))
    }

    /// A reader sharing this client's link and buffer.
    pub fn heartbeat_reader(&self) -> HeartbeatReader {
        HeartbeatReader {
            link: Arc::clone(&self.link),
            buffer: Arc::clone(&self.buffer),
            config: self.config.clone(),
            wait_count: 0,
        }
    }

    /// Spawns the read loop unless one is already running.
    pub fn start_reading(&mut self) {
        if self.reader.as_ref().is_some_and(|r| !r.is_finished()) {
            return;
        }
        self.reader = Some(tokio::spawn(self.heartbeat_reader().run()));
    }

    /// Cancels the read loop and waits for it to let go of the link.
    pub async fn stop_reading(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            // Cancellation is the expected outcome here.
            let _ = reader.await;
        }
    }

    /// Stops reading and closes the link.
    pub async fn close(&mut self) {
        self.stop_reading().await;
        self.link.lock().await.close();
    }

    /// Sends `command` and returns the trimmed output collected during the
    /// settle window.  The link is closed afterwards whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`SerialError::EmptyCommand`] for a blank command (nothing is opened).
    /// - [`SerialError::Open`] if the port cannot be opened.
    /// - [`SerialError::NoResponse`] if nothing but whitespace came back.
    /// - Any I/O error raised by the write.
    pub async fn request(&mut self, command: &str) -> Result<String, SerialError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(SerialError::EmptyCommand);
        }
        let result = self.exchange(command).await;
        self.close().await;
        result
    }

    async fn exchange(&mut self, command: &str) -> Result<String, SerialError> {
        self.open().await?;
        lock_buffer(&self.buffer).clear();
        self.write(command).await?;
        self.start_reading();
        tokio::time::sleep(self.config.command_settle).await;
        self.stop_reading().await;

        let response = self.read_accumulated();
        let response = response.trim();
        if response.is_empty() {
            return Err(SerialError::NoResponse);
        }
        Ok(response.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
