//! Infrastructure layer for kvmd.
//!
//! The infrastructure layer handles all I/O: serial ports, streamer child
//! processes, the keymap directory, and the HTTP/WebSocket listener.
//!
//! # Responsibilities
//!
//! - Driving the diagnostic and battery serial links
//! - Launching and stopping streamer processes
//! - Answering stage-1 state fetches (keymaps, OCR)
//! - Serving the `/api` routes and realtime sessions
//! - Assembling every component and running the shutdown sequence
//!
//! # What does NOT belong here?
//!
//! - Demand evaluation and fan-out logic (that is the application layer)
//! - Config and event type definitions (that is the domain layer)
//! - Frame encoding and CRC (that is `kvmd-core`)

pub mod http;
pub mod keymaps;
pub mod serial;
pub mod server;
pub mod streamer;
pub mod ws;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use server::{run_server, KvmdServer, ServerParts, StreamSpec};
