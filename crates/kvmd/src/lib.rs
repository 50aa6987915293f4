//! kvmd library crate.
//!
//! This crate is the control plane of a KVM-over-IP appliance: it fronts
//! video streamers, the battery simulator and the diagnostic serial link
//! with one HTTP API and one multiplexed realtime WebSocket channel.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (REST + JSON over WebSocket)
//!         ↕
//! [kvmd]
//!   ├── domain/           Pure types: DaemonConfig, RealtimeEvent, param validation
//!   ├── application/      Adapters, registry, stream controllers, realtime hub,
//!   │                     handshake aggregator, deadly-task supervisor
//!   └── infrastructure/
//!         ├── serial/     Watchdog serial client, battery service (tokio-serial)
//!         ├── streamer/   Streamer child processes
//!         ├── keymaps/    Stage-1 state sources
//!         ├── http/ ws/   axum routes and realtime sessions
//!         └── server/     Wiring, startup and shutdown sequence
//!         ↕
//! Microcontroller / managed host (kvmd-core frames over UART)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and talks to hardware only through
//!   traits (`StreamPipeline`, `StateSource`, adapter hooks).
//! - `infrastructure` implements those traits and owns every socket, port and
//!   process.
//!
//! # For beginners: why hooks instead of a trait per subsystem?
//!
//! Each subsystem exposes a different subset of lifecycle steps.  A builder
//! with optional closures lets the registry treat them uniformly without
//! forcing every subsystem to implement five methods it does not need.

/// Domain layer: configuration, realtime events, parameter validation.
pub mod domain;

/// Application layer: lifecycle orchestration and realtime fan-out.
pub mod application;

/// Infrastructure layer: serial ports, processes, HTTP and WebSocket.
pub mod infrastructure;
