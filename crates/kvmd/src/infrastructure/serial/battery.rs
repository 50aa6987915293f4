//! Battery-simulation commands over the microcontroller UART.
//!
//! Each request opens the link, writes one encoded command and closes it
//! again; the firmware does not answer.  The service remembers the last
//! mode and charge level it set so the UI can show them.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use kvmd_core::{BatteryError, BatteryMode, BatteryProtocol};

use super::{SerialError, SerialLink};

/// Errors from a battery command.
#[derive(Debug, Error)]
pub enum BatteryServiceError {
    #[error(transparent)]
    Encode(#[from] BatteryError),

    #[error(transparent)]
    Serial(#[from] SerialError),
}

/// Last values successfully sent to the firmware.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatteryState {
    pub mode: Option<String>,
    pub percent: Option<u8>,
}

struct Inner {
    link: Box<dyn SerialLink>,
    state: BatteryState,
}

/// Sends battery commands with the configured firmware protocol.
pub struct BatteryService {
    protocol: Box<dyn BatteryProtocol>,
    inner: Mutex<Inner>,
}

impl BatteryService {
    pub fn new(protocol: Box<dyn BatteryProtocol>, link: Box<dyn SerialLink>) -> Self {
        Self {
            protocol,
            inner: Mutex::new(Inner {
                link,
                state: BatteryState::default(),
            }),
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    /// Sets the simulated charge level.
    ///
    /// # Errors
    ///
    /// [`BatteryServiceError::Encode`] for an out-of-range percent, or a
    /// serial error if the link cannot be opened or written.
    pub async fn set_percent(&self, percent: u8) -> Result<(), BatteryServiceError> {
        let bytes = self.protocol.encode_percent(percent)?;
        let mut inner = self.inner.lock().await;
        send(&mut *inner.link, &bytes).await?;
        inner.state.percent = Some(percent);
        info!("Battery simulation set to {percent}% ({} firmware)", self.protocol.name());
        Ok(())
    }

    /// Switches between simulated, real and detached battery.
    ///
    /// # Errors
    ///
    /// [`BatteryServiceError::Encode`] if the firmware lacks `mode`, or a
    /// serial error.
    pub async fn set_mode(&self, mode: BatteryMode) -> Result<(), BatteryServiceError> {
        let bytes = self.protocol.encode_mode(mode)?;
        let mut inner = self.inner.lock().await;
        send(&mut *inner.link, &bytes).await?;
        inner.state.mode = Some(mode.to_string());
        info!("Battery mode set to {mode}");
        Ok(())
    }

    pub async fn state(&self) -> BatteryState {
        self.inner.lock().await.state.clone()
    }

    /// State as a realtime event payload.
    pub async fn state_json(&self) -> Value {
        let state = self.state().await;
        serde_json::json!({
            "protocol": self.protocol.name(),
            "mode": state.mode,
            "percent": state.percent,
        })
    }

    /// Closes the link if a previous command left it open.
    pub async fn close(&self) {
        self.inner.lock().await.link.close();
    }
}

async fn send(link: &mut dyn SerialLink, bytes: &[u8]) -> Result<(), SerialError> {
    link.open().await?;
    let result = link.write(bytes).await;
    link.close();
    result
}
