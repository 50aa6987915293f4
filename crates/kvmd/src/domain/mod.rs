//! Domain layer for kvmd.
//!
//! Pure types with no I/O: the TOML configuration schema, the realtime event
//! envelope and streamer parameter validation.  Everything here can be tested
//! without a runtime.

pub mod config;
pub mod events;
pub mod params;

pub use config::{load_config, ConfigError, DaemonConfig, StreamConfig};
pub use events::RealtimeEvent;
pub use params::{stage_params, ParamError, StreamParams};
