//! Application layer for kvmd.
//!
//! Orchestration that knows *what* to do but not *how* the hardware is
//! reached:
//!
//! - [`adapter`] and [`registry`]: uniform lifecycle for every subsystem
//! - [`stream_controller`]: demand-driven start/stop of each video stream
//! - [`realtime_hub`] and [`aggregator`]: session fan-out and the staged
//!   initial-state handshake
//! - [`supervisor`]: tasks whose death takes the process down
//!
//! Serial ports, child processes and sockets live in the infrastructure layer.

pub mod adapter;
pub mod aggregator;
pub mod realtime_hub;
pub mod registry;
pub mod stream_controller;
pub mod supervisor;

pub use adapter::{AdapterBuilder, AdapterError, SubsystemAdapter};
pub use aggregator::{StateAggregator, StateSource};
pub use realtime_hub::RealtimeHub;
pub use registry::{ComponentRegistry, RegistryError};
pub use stream_controller::{
    DemandSource, PipelineError, SnapshotHold, SnapshotHolds, StreamController, StreamDemand,
    StreamHandle, StreamPipeline,
};
pub use supervisor::TaskSupervisor;
