//! Process-backed [`StreamPipeline`].
//!
//! Runs the configured streamer program as a child process, passing the
//! current parameters as `--key=value` arguments.  A graceful stop waits
//! `shutdown_delay` before killing the child so a viewer who reconnects
//! quickly does not pay for a restart; [`ensure_start`] during that window
//! cancels the pending stop.
//!
//! A stream configured with an empty command has no process at all and only
//! tracks its running flag, which is enough for development setups.
//!
//! [`ensure_start`]: StreamPipeline::ensure_start

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::stream_controller::{PipelineError, StreamPipeline};
use crate::domain::config::StreamConfig;
use crate::domain::StreamParams;

enum Running {
    Process(Child),
    Virtual,
}

#[derive(Default)]
struct PipelineState {
    running: Option<Running>,
    params: StreamParams,
    pending_stop: Option<JoinHandle<()>>,
    restarts: u64,
}

impl PipelineState {
    fn is_working(&mut self) -> bool {
        match &mut self.running {
            Some(Running::Virtual) => true,
            Some(Running::Process(child)) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn cancel_pending_stop(&mut self) {
        if let Some(task) = self.pending_stop.take() {
            task.abort();
        }
    }

    async fn stop_now(&mut self, name: &str) -> Result<(), PipelineError> {
        match self.running.take() {
            Some(Running::Process(mut child)) => {
                if matches!(child.try_wait(), Ok(None)) {
                    child
                        .kill()
                        .await
                        .map_err(|e| PipelineError::Stop(e.to_string()))?;
                }
                info!("Streamer {name} stopped");
            }
            Some(Running::Virtual) => info!("Streamer {name} stopped"),
            None => {}
        }
        Ok(())
    }
}

/// Streamer child process plus its parameters.
pub struct ProcessPipeline {
    name: String,
    command: Vec<String>,
    shutdown_delay: Duration,
    state: Arc<Mutex<PipelineState>>,
}

impl ProcessPipeline {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        shutdown_delay: Duration,
        params: StreamParams,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            shutdown_delay,
            state: Arc::new(Mutex::new(PipelineState {
                params,
                ..PipelineState::default()
            })),
        }
    }

    /// Builds a pipeline from its `[[streams]]` entry.
    pub fn from_config(config: &StreamConfig) -> Self {
        let params = match serde_json::to_value(&config.params) {
            Ok(Value::Object(map)) => map,
            _ => StreamParams::new(),
        };
        Self::new(
            config.name.clone(),
            config.command.clone(),
            config.shutdown_delay(),
            params,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn render_args(params: &StreamParams) -> Vec<String> {
        params
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("--{key}={s}"),
                other => format!("--{key}={other}"),
            })
            .collect()
    }

    fn spawn(&self, params: &StreamParams) -> Result<Running, PipelineError> {
        let Some((program, fixed_args)) = self.command.split_first() else {
            return Ok(Running::Virtual);
        };
        let child = Command::new(program)
            .args(fixed_args)
            .args(Self::render_args(params))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Start(format!("{program}: {e}")))?;
        Ok(Running::Process(child))
    }
}

/// Emits the pipeline state every time it differs from the last emitted
/// one, checking every `interval`.  The first state is emitted at once.
pub fn state_changes(
    pipeline: Arc<dyn StreamPipeline>,
    interval: Duration,
) -> impl Stream<Item = Value> + Send {
    futures_util::stream::unfold((pipeline, None::<Value>), move |(pipeline, last)| async move {
        loop {
            let state = pipeline.get_state().await;
            if last.as_ref() != Some(&state) {
                return Some((state.clone(), (pipeline, Some(state))));
            }
            tokio::time::sleep(interval).await;
        }
    })
}

#[async_trait]
impl StreamPipeline for ProcessPipeline {
    async fn ensure_start(&self, reset: bool) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.cancel_pending_stop();
        if state.is_working() {
            return Ok(());
        }
        if reset {
            state.restarts += 1;
        }
        let running = self.spawn(&state.params)?;
        state.running = Some(running);
        info!("Streamer {} started (reset={reset})", self.name);
        Ok(())
    }

    async fn ensure_stop(&self, immediately: bool) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        if immediately {
            state.cancel_pending_stop();
            return state.stop_now(&self.name).await;
        }
        if state.pending_stop.is_some() || !state.is_working() {
            return Ok(());
        }

        let shared = Arc::clone(&self.state);
        let name = self.name.clone();
        let delay = self.shutdown_delay;
        info!("Streamer {name} will stop in {delay:?}");
        state.pending_stop = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock().await;
            state.pending_stop = None;
            if let Err(e) = state.stop_now(&name).await {
                warn!("Delayed stop of {name} failed: {e}");
            }
        }));
        Ok(())
    }

    async fn is_working(&self) -> bool {
        self.state.lock().await.is_working()
    }

    async fn set_params(&self, params: StreamParams) {
        self.state.lock().await.params.extend(params);
    }

    async fn get_params(&self) -> StreamParams {
        self.state.lock().await.params.clone()
    }

    async fn get_state(&self) -> Value {
        let mut state = self.state.lock().await;
        json!({
            "online": state.is_working(),
            "stopping": state.pending_stop.is_some(),
            "restarts": state.restarts,
            "params": state.params,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
