//! Battery-simulation command encoders.
//!
//! The microcontroller can impersonate a laptop battery.  Two firmware
//! generations exist and they disagree on almost every wire detail, so each
//! one gets its own [`BatteryProtocol`] implementation:
//!
//! | | [`StartProtocol`] | [`StaProtocol`] |
//! |---|---|---|
//! | Header | `start:1:RPI:USBUart` | `sta:2` |
//! | Percent value | decimal percent | remaining capacity, 4 lower-case hex digits |
//! | Trailer | `CRC:XXXX:end` | bare `XXXX` |
//! | Line ending | `\r\n` | `\n` |
//! | Frame prefix | none | `@\x02,` |
//!
//! Mode switches are not frames at all: they are a two-byte `@<code>` command.
//!
//! All encoders are pure; the daemon writes the returned bytes to the port.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::protocol::frame::{self, Frame, FrameError, TrailerStyle};

/// Payload tag the firmware uses for "set simulated charge level".
pub const SIMULATION_PERCENT_TAG: &str = "15";

/// Full-charge capacity (mAh) reported by the `sta` firmware.
pub const STA_FULL_CAPACITY: u32 = 0x2303;

/// First byte of every mode command and of the `sta` frame prefix.
const COMMAND_MARKER: u8 = b'@';

/// Which battery the host should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryMode {
    /// The simulated battery, driven by percent frames.
    Simulated,
    /// The physical battery, passed through.
    Real,
    /// No battery at all.
    Detach,
}

impl fmt::Display for BatteryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simulated => "simulated",
            Self::Real => "real",
            Self::Detach => "detach",
        };
        f.write_str(name)
    }
}

/// Errors raised while building a battery command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatteryError {
    #[error("battery percent must be 0..=100, got {0}")]
    PercentOutOfRange(u8),

    #[error("the {protocol} firmware has no {mode} mode")]
    UnsupportedMode {
        protocol: &'static str,
        mode: BatteryMode,
    },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Encodes battery commands for one firmware generation.
pub trait BatteryProtocol: Send + Sync {
    /// Short identifier used in config files and logs.
    fn name(&self) -> &'static str;

    /// Builds the bytes that set the simulated charge level.
    ///
    /// # Errors
    ///
    /// [`BatteryError::PercentOutOfRange`] if `percent > 100`.
    fn encode_percent(&self, percent: u8) -> Result<Vec<u8>, BatteryError>;

    /// Builds the bytes that switch battery mode.
    ///
    /// # Errors
    ///
    /// [`BatteryError::UnsupportedMode`] if this firmware lacks `mode`.
    fn encode_mode(&self, mode: BatteryMode) -> Result<Vec<u8>, BatteryError>;
}

/// Looks a protocol up by its config name (`"start"` or `"sta"`).
pub fn protocol_by_name(name: &str) -> Option<Box<dyn BatteryProtocol>> {
    match name {
        "start" => Some(Box::new(StartProtocol)),
        "sta" => Some(Box::new(StaProtocol)),
        _ => None,
    }
}

fn check_percent(percent: u8) -> Result<(), BatteryError> {
    if percent > 100 {
        return Err(BatteryError::PercentOutOfRange(percent));
    }
    Ok(())
}

// ── start:1 firmware ─────────────────────────────────────────────────────────

/// The first-generation firmware on the USB UART.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartProtocol;

impl BatteryProtocol for StartProtocol {
    fn name(&self) -> &'static str {
        "start"
    }

    fn encode_percent(&self, percent: u8) -> Result<Vec<u8>, BatteryError> {
        check_percent(percent)?;
        let body = frame::payload(SIMULATION_PERCENT_TAG, &percent.to_string());
        let frame = Frame::new(frame::DEFAULT_HEADER, body)?;

        let mut line = frame.render(TrailerStyle::TaggedWithEnd);
        line.push_str(frame::LINE_TERMINATOR);
        debug!("start frame for {percent}%: {}", line.trim_end());
        Ok(line.into_bytes())
    }

    fn encode_mode(&self, mode: BatteryMode) -> Result<Vec<u8>, BatteryError> {
        let code = match mode {
            BatteryMode::Simulated => 0x01,
            BatteryMode::Real => 0x02,
            BatteryMode::Detach => {
                return Err(BatteryError::UnsupportedMode {
                    protocol: self.name(),
                    mode,
                })
            }
        };
        Ok(vec![COMMAND_MARKER, code])
    }
}

// ── sta:2 firmware ───────────────────────────────────────────────────────────

/// The second-generation firmware that reports capacity in mAh.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaProtocol;

impl StaProtocol {
    const HEADER: &'static str = "sta:2";
    const FRAME_PREFIX: [u8; 3] = [COMMAND_MARKER, 0x02, b','];

    /// Converts a charge percentage to the capacity the firmware expects,
    /// rounded to the nearest mAh.
    pub fn capacity_for_percent(percent: u8) -> u32 {
        (STA_FULL_CAPACITY * u32::from(percent) + 50) / 100
    }
}

impl BatteryProtocol for StaProtocol {
    fn name(&self) -> &'static str {
        "sta"
    }

    fn encode_percent(&self, percent: u8) -> Result<Vec<u8>, BatteryError> {
        check_percent(percent)?;
        let capacity = format!("{:04x}", Self::capacity_for_percent(percent));
        let body = frame::payload(SIMULATION_PERCENT_TAG, &capacity);
        let frame = Frame::new(Self::HEADER, body)?;
        let line = frame.render(TrailerStyle::Bare);
        debug!("sta frame for {percent}%: {line}");

        let mut bytes = Self::FRAME_PREFIX.to_vec();
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn encode_mode(&self, mode: BatteryMode) -> Result<Vec<u8>, BatteryError> {
        let code = match mode {
            BatteryMode::Real => 0x01,
            BatteryMode::Detach => 0x03,
            BatteryMode::Simulated => 0x04,
        };
        Ok(vec![COMMAND_MARKER, code, b'\n'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_percent_frame_layout() {
        let bytes = StartProtocol.encode_percent(50).unwrap();
        assert_eq!(bytes, b"start:1:RPI:USBUart,15:2:50,CRC:F6D2:end\r\n".to_vec());
    }

    #[test]
    fn test_start_percent_frame_decodes() {
        let bytes = StartProtocol.encode_percent(100).unwrap();
        let decoded = frame::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, "15:3:100");
        assert_eq!(decoded.crc, 0x18D4);
    }

    #[test]
    fn test_start_modes() {
        assert_eq!(StartProtocol.encode_mode(BatteryMode::Simulated).unwrap(), vec![b'@', 0x01]);
        assert_eq!(StartProtocol.encode_mode(BatteryMode::Real).unwrap(), vec![b'@', 0x02]);
    }

    #[test]
    fn test_start_rejects_detach() {
        let result = StartProtocol.encode_mode(BatteryMode::Detach);
        assert_eq!(
            result,
            Err(BatteryError::UnsupportedMode {
                protocol: "start",
                mode: BatteryMode::Detach,
            })
        );
    }

    #[test]
    fn test_sta_capacity_rounding() {
        assert_eq!(StaProtocol::capacity_for_percent(0), 0);
        assert_eq!(StaProtocol::capacity_for_percent(50), 0x1182);
        assert_eq!(StaProtocol::capacity_for_percent(75), 0x1a42);
        assert_eq!(StaProtocol::capacity_for_percent(100), STA_FULL_CAPACITY);
    }

    #[test]
    fn test_sta_percent_frame_layout() {
        let bytes = StaProtocol.encode_percent(50).unwrap();

        let mut expected = vec![b'@', 0x02, b','];
        expected.extend_from_slice(b"sta:2,15:4:1182,2CB6\n");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_sta_frame_body_decodes_after_prefix() {
        let bytes = StaProtocol.encode_percent(100).unwrap();
        let decoded = frame::decode(&bytes[3..]).unwrap();
        assert_eq!(decoded.header, "sta:2");
        assert_eq!(decoded.payload, "15:4:2303");
    }

    #[test]
    fn test_sta_modes() {
        assert_eq!(StaProtocol.encode_mode(BatteryMode::Real).unwrap(), b"@\x01\n".to_vec());
        assert_eq!(StaProtocol.encode_mode(BatteryMode::Detach).unwrap(), b"@\x03\n".to_vec());
        assert_eq!(StaProtocol.encode_mode(BatteryMode::Simulated).unwrap(), b"@\x04\n".to_vec());
    }

    #[test]
    fn test_percent_over_100_rejected_by_both() {
        assert_eq!(StartProtocol.encode_percent(101), Err(BatteryError::PercentOutOfRange(101)));
        assert_eq!(StaProtocol.encode_percent(255), Err(BatteryError::PercentOutOfRange(255)));
    }

    #[test]
    fn test_protocol_by_name() {
        assert_eq!(protocol_by_name("sta").map(|p| p.name()), Some("sta"));
        assert_eq!(protocol_by_name("start").map(|p| p.name()), Some("start"));
        assert!(protocol_by_name("legacy").is_none());
    }
}
