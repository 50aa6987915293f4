//! Server shell: wires every component together and runs the daemon.
//!
//! This module is responsible for:
//!
//! 1. Building the component registry (auth, info, battery, serial and one
//!    adapter per video stream) plus one [`StreamController`] per stream.
//! 2. Running every adapter's prepare hook before the listener accepts
//!    anything.
//! 3. Spawning the deadly tasks: stream controllers, adapter background tasks
//!    and state pollers whose snapshots are broadcast to realtime clients.
//! 4. Serving the HTTP/WebSocket routes until the shutdown future resolves.
//! 5. Shutting down in a fixed order: stop deadly tasks, disconnect realtime
//!    clients, stop HTTP, run every cleanup hook.
//!
//! # Testability
//!
//! [`ServerParts`] holds every hardware-facing collaborator, so integration
//! tests can assemble a server from mock serial links and virtual pipelines
//! and serve it on an ephemeral port.  [`ServerParts::from_config`] builds the
//! production set.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};

use kvmd_core::protocol::battery::protocol_by_name;

use super::http::{self, AppState, StreamEntry, TokenAuth};
use super::keymaps::{KeymapsSource, OcrSource};
use super::serial::battery::BatteryService;
use super::serial::link::TokioSerialLink;
use super::serial::watchdog::{WatchdogConfig, WatchdogSerialClient};
use super::serial::SerialLink;
use super::streamer::{state_changes, ProcessPipeline};
use crate::application::{
    ComponentRegistry, RealtimeHub, SnapshotHolds, StateAggregator, StateSource, StreamController,
    StreamDemand, StreamPipeline, SubsystemAdapter, TaskSupervisor,
};
use crate::domain::{DaemonConfig, RealtimeEvent};

/// How often stream state is sampled for change broadcasts.
pub const DEFAULT_STATE_POLL: Duration = Duration::from_secs(1);

/// One video stream to drive.
pub struct StreamSpec {
    pub name: String,
    pub forever: bool,
    pub pipeline: Arc<dyn StreamPipeline>,
}

/// Every collaborator the server needs.
pub struct ServerParts {
    pub serial_link: Box<dyn SerialLink>,
    pub watchdog: WatchdogConfig,
    pub reset_command: String,
    pub battery: BatteryService,
    pub streams: Vec<StreamSpec>,
    pub stage_one: Vec<Arc<dyn StateSource>>,
    /// Adapters for subsystems outside this crate (HID, ATX, MSD, ...).
    pub extra_adapters: Vec<SubsystemAdapter>,
    pub auth_token: Option<String>,
    pub state_poll: Duration,
}

impl ServerParts {
    /// Production collaborators: real serial ports, process pipelines and
    /// the keymap catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the battery protocol name is unknown.
    pub fn from_config(config: &DaemonConfig) -> anyhow::Result<Self> {
        let protocol = protocol_by_name(&config.battery.protocol)
            .with_context(|| format!("unknown battery protocol {:?}", config.battery.protocol))?;
        let battery_link = TokioSerialLink::new(
            config.battery.port.clone(),
            config.battery.baud_rate,
            config.serial.read_timeout(),
        );
        let serial_link = TokioSerialLink::new(
            config.serial.port.clone(),
            config.serial.baud_rate,
            config.serial.read_timeout(),
        );

        let streams = config
            .streams
            .iter()
            .map(|stream| StreamSpec {
                name: stream.name.clone(),
                forever: stream.forever,
                pipeline: Arc::new(ProcessPipeline::from_config(stream)) as Arc<dyn StreamPipeline>,
            })
            .collect();

        Ok(Self {
            serial_link: Box::new(serial_link),
            watchdog: WatchdogConfig::from(&config.serial),
            reset_command: config.serial.reset_command.clone(),
            battery: BatteryService::new(protocol, Box::new(battery_link)),
            streams,
            stage_one: vec![
                Arc::new(KeymapsSource::new(&config.keymaps)) as Arc<dyn StateSource>,
                Arc::new(OcrSource),
            ],
            extra_adapters: Vec::new(),
            auth_token: config.server.auth_token.clone(),
            state_poll: DEFAULT_STATE_POLL,
        })
    }
}

/// The assembled daemon, ready to serve.
pub struct KvmdServer {
    state: AppState,
    registry: Arc<ComponentRegistry>,
    controllers: Vec<StreamController>,
    supervisor: Arc<TaskSupervisor>,
}

impl KvmdServer {
    /// Assembles the server with a supervisor that terminates the process
    /// when a deadly task dies.
    ///
    /// # Errors
    ///
    /// Returns an error if two adapters share an event type.
    pub fn new(parts: ServerParts) -> anyhow::Result<Self> {
        Self::with_supervisor(parts, TaskSupervisor::new())
    }

    /// Same as [`new`](Self::new) with a caller-supplied supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if two adapters share an event type.
    pub fn with_supervisor(parts: ServerParts, supervisor: TaskSupervisor) -> anyhow::Result<Self> {
        let hub = Arc::new(RealtimeHub::new());
        let battery = Arc::new(parts.battery);
        let serial = Arc::new(Mutex::new(WatchdogSerialClient::new(
            parts.serial_link,
            parts.watchdog,
        )));

        let mut adapters = vec![
            auth_adapter(
                parts
                    .auth_token
                    .as_deref()
                    .is_some_and(|t| !t.is_empty()),
            )?,
            info_adapter()?,
        ];
        adapters.extend(parts.extra_adapters);

        let mut controllers = Vec::with_capacity(parts.streams.len());
        let mut entries = HashMap::new();
        for stream in parts.streams {
            let snapshots = SnapshotHolds::new();
            let demand = StreamDemand::new(Arc::clone(&hub), snapshots.clone(), stream.forever);
            let controller =
                StreamController::new(&stream.name, Arc::clone(&stream.pipeline), Arc::new(demand));
            let handle = controller.handle();
            hub.attach_stream_waker(handle.notifier());

            adapters.push(stream_adapter(
                &stream.name,
                Arc::clone(&stream.pipeline),
                parts.state_poll,
            )?);
            entries.insert(
                stream.name,
                StreamEntry {
                    pipeline: stream.pipeline,
                    handle,
                    snapshots,
                },
            );
            controllers.push(controller);
        }

        adapters.push(battery_adapter(Arc::clone(&battery))?);
        adapters.push(serial_adapter(Arc::clone(&serial))?);

        let registry = Arc::new(ComponentRegistry::new(adapters)?);
        let aggregator = Arc::new(StateAggregator::new(parts.stage_one, Arc::clone(&registry)));

        let state = AppState {
            hub,
            aggregator,
            registry: Arc::clone(&registry),
            serial,
            reset_command: Arc::from(parts.reset_command),
            battery,
            streams: Arc::new(entries),
            auth: Arc::new(TokenAuth::new(parts.auth_token)),
        };

        Ok(Self {
            state,
            registry,
            controllers,
            supervisor: Arc::new(supervisor),
        })
    }

    /// Shared state, for tests that drive components directly.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Runs the daemon on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if a prepare hook fails (nothing has been spawned
    /// yet) or the HTTP server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            state,
            registry,
            controllers,
            supervisor,
        } = self;

        registry.prepare_all()?;

        // ── Deadly tasks ──────────────────────────────────────────────────────
        for controller in controllers {
            let name = format!("Stream controller {}", controller.handle().name());
            supervisor.spawn_deadly(name, controller.run());
        }
        for adapter in registry.adapters() {
            if let Some(task) = adapter.background_task() {
                supervisor.spawn_deadly(format!("{} background task", adapter.name()), task);
            }
            if let Some(mut states) = adapter.poll_state() {
                let hub = Arc::clone(&state.hub);
                let tag = adapter.event_type().to_string();
                let name = adapter.name().to_string();
                supervisor.spawn_deadly(format!("{name} poller"), async move {
                    while let Some(snapshot) = states.next().await {
                        hub.broadcast(&RealtimeEvent::new(tag.clone(), snapshot));
                    }
                    anyhow::bail!("state stream of {name} ended")
                });
            }
        }
        info!("Started {} deadly task(s)", supervisor.task_count());

        // ── HTTP ──────────────────────────────────────────────────────────────
        let address = listener.local_addr().context("listener has no local address")?;
        let app = http::router(state.clone());
        let hub = Arc::clone(&state.hub);
        let stopper = Arc::clone(&supervisor);
        info!("Listening HTTP on {address}");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutting down ...");
                stopper.stop_all().await;
                hub.close_all();
            })
            .await
            .context("HTTP server failed");

        // ── Cleanup ───────────────────────────────────────────────────────────
        let failures = registry.cleanup_all().await;
        if failures > 0 {
            error!("{failures} cleanup hook(s) failed");
        }
        info!("Bye-bye");
        served
    }
}

/// Binds `config.server.bind` and runs the production daemon until
/// `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server<F>(config: &DaemonConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = KvmdServer::new(ServerParts::from_config(config)?)?;
    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.server.bind))?;
    server.serve(listener, shutdown).await
}

// ── Built-in adapters ─────────────────────────────────────────────────────────

fn auth_adapter(enabled: bool) -> anyhow::Result<SubsystemAdapter> {
    Ok(SubsystemAdapter::builder("Auth manager")
        .on_prepare(move || {
            info!("API token auth is {}", if enabled { "enabled" } else { "disabled" });
            Ok(())
        })
        .build()?)
}

fn info_adapter() -> anyhow::Result<SubsystemAdapter> {
    Ok(SubsystemAdapter::builder("Info manager (system)")
        .event_type("info_state")
        .state(|| async {
            Ok(json!({
                "system": {
                    "kvmd": {"version": env!("CARGO_PKG_VERSION")},
                    "platform": {"os": std::env::consts::OS, "arch": std::env::consts::ARCH},
                }
            }))
        })
        .build()?)
}

fn stream_adapter(
    name: &str,
    pipeline: Arc<dyn StreamPipeline>,
    poll_every: Duration,
) -> anyhow::Result<SubsystemAdapter> {
    let for_state = Arc::clone(&pipeline);
    let for_poll = Arc::clone(&pipeline);
    Ok(SubsystemAdapter::builder(format!("Streamer {name}"))
        .event_type(format!("{name}_state"))
        .state(move || {
            let pipeline = Arc::clone(&for_state);
            async move { Ok(pipeline.get_state().await) }
        })
        .poll(move || state_changes(Arc::clone(&for_poll), poll_every))
        .on_cleanup(move || {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.ensure_stop(true).await.map_err(anyhow::Error::from) }
        })
        .build()?)
}

fn battery_adapter(battery: Arc<BatteryService>) -> anyhow::Result<SubsystemAdapter> {
    let for_cleanup = Arc::clone(&battery);
    Ok(SubsystemAdapter::builder("Battery")
        .event_type("battery_state")
        .state(move || {
            let battery = Arc::clone(&battery);
            async move { Ok(battery.state_json().await) }
        })
        .on_cleanup(move || {
            let battery = Arc::clone(&for_cleanup);
            async move {
                battery.close().await;
                Ok(())
            }
        })
        .build()?)
}

fn serial_adapter(serial: Arc<Mutex<WatchdogSerialClient>>) -> anyhow::Result<SubsystemAdapter> {
    Ok(SubsystemAdapter::builder("Serial")
        .on_cleanup(move || {
            let serial = Arc::clone(&serial);
            async move {
                serial.lock().await.close().await;
                Ok(())
            }
        })
        .build()?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
