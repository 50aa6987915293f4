//! # kvmd-core
//!
//! Shared protocol code for the kvmd control plane: the CRC16 used by the
//! attached microcontroller firmware, the line-based frame codec that carries
//! it, and the battery-simulation command encoders built on top of the codec.
//!
//! This crate performs no I/O.  The daemon crate owns the serial ports and
//! hands encoded bytes to them; everything here is pure and deterministic so
//! it can be tested without hardware.
//!
//! # Architecture overview
//!
//! An appliance running kvmd talks to a small microcontroller over a UART.
//! Every command the daemon sends is a single ASCII line:
//!
//! ```text
//! start:1:RPI:USBUart,15:2:50,CRC:F6D2:end\r\n
//! └──────── header ─┘ └payload┘ └ trailer ┘
//! ```
//!
//! - **`protocol::crc`** – the table-driven CRC-16/DNP implementation.  The
//!   firmware on the other side is fixed, so this must match bit-for-bit.
//! - **`protocol::frame`** – [`Frame`] encode/decode with CRC verification.
//! - **`protocol::battery`** – the two battery-simulation wire variants the
//!   firmware family understands, behind the [`BatteryProtocol`] trait.

pub mod protocol;

// Re-export the most-used items at the crate root so callers can write
// `kvmd_core::Frame` instead of `kvmd_core::protocol::frame::Frame`.
pub use protocol::battery::{
    BatteryError, BatteryMode, BatteryProtocol, StaProtocol, StartProtocol,
};
pub use protocol::crc::crc16;
pub use protocol::frame::{Frame, FrameError};
