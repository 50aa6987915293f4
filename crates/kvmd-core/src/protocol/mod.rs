//! Serial protocol: CRC, line frames and the battery command encoders.

pub mod battery;
pub mod crc;
pub mod frame;

pub use battery::{BatteryError, BatteryMode, BatteryProtocol, StaProtocol, StartProtocol};
pub use crc::crc16;
pub use frame::{Frame, FrameError};
