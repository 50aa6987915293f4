//! Demand-driven lifecycle of one video stream.
//!
//! A [`StreamController`] owns a [`StreamPipeline`] and decides when it must
//! run.  It sleeps on a coalescing [`Notify`] and, on every wake-up:
//!
//! 1. samples demand (a viewer wants video, a snapshot is being taken, or the
//!    stream is configured `forever`);
//! 2. starts the pipeline on a `false → true` demand edge and schedules a
//!    graceful stop on a `true → false` edge;
//! 3. if a reset or parameter change was requested, stops the pipeline
//!    immediately, applies the parameters and restarts it if it had been
//!    working.
//!
//! Requests arrive through a cloneable [`StreamHandle`].  Any number of
//! requests made before the controller wakes collapse into a single
//! stop/apply/restart cycle, and a request made *during* that cycle is kept
//! for the next one because the notifier remembers the pending wake.
//!
//! A pipeline failure ends [`StreamController::run`] with an error.  The
//! server runs controllers as deadly tasks, so the daemon goes down instead
//! of serving a stream that no wake-up will ever bring back.
//!
//! # For beginners: why `Notify` and not a channel?
//!
//! The controller never needs to know *how many* times it was poked, only
//! that something changed since it last looked.  `Notify::notify_one` stores
//! at most one permit, which is exactly that "dirty" bit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::realtime_hub::RealtimeHub;
use crate::domain::StreamParams;

/// Errors reported by a stream pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to start streamer: {0}")]
    Start(String),

    #[error("failed to stop streamer: {0}")]
    Stop(String),
}

/// The video pipeline driven by a controller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamPipeline: Send + Sync {
    /// Starts the pipeline if not running.  A pending delayed stop is
    /// cancelled.  `reset` asks for a cold restart of any hardware state.
    async fn ensure_start(&self, reset: bool) -> Result<(), PipelineError>;

    /// Stops the pipeline, either at once or after its shutdown delay.
    async fn ensure_stop(&self, immediately: bool) -> Result<(), PipelineError>;

    async fn is_working(&self) -> bool;

    async fn set_params(&self, params: StreamParams);

    async fn get_params(&self) -> StreamParams;

    async fn get_state(&self) -> Value;
}

/// Answers "does anything currently need this stream?".
pub trait DemandSource: Send + Sync {
    fn has_demand(&self) -> bool;
}

/// Number of in-flight snapshots keeping one stream up.
#[derive(Clone, Debug, Default)]
pub struct SnapshotHolds(Arc<AtomicUsize>);

impl SnapshotHolds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hold and wakes the controller.  The hold is released, and the
    /// controller woken again, when the returned guard is dropped.
    pub fn hold(&self, handle: &StreamHandle) -> SnapshotHold {
        self.0.fetch_add(1, Ordering::SeqCst);
        handle.wake();
        SnapshotHold {
            count: Arc::clone(&self.0),
            handle: handle.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

/// One snapshot's claim on a stream.  See [`SnapshotHolds::hold`].
pub struct SnapshotHold {
    count: Arc<AtomicUsize>,
    handle: StreamHandle,
}

impl Drop for SnapshotHold {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
        self.handle.wake();
    }
}

/// Production demand: stream viewers, an in-flight snapshot or `forever`.
pub struct StreamDemand {
    hub: Arc<RealtimeHub>,
    snapshots: SnapshotHolds,
    forever: bool,
}

impl StreamDemand {
    pub fn new(hub: Arc<RealtimeHub>, snapshots: SnapshotHolds, forever: bool) -> Self {
        Self {
            hub,
            snapshots,
            forever,
        }
    }
}

impl DemandSource for StreamDemand {
    fn has_demand(&self) -> bool {
        self.forever || self.snapshots.is_held() || self.hub.has_stream_clients()
    }
}

#[derive(Debug, Default)]
struct StreamControl {
    reset_requested: bool,
    pending_params: Option<StreamParams>,
}

/// Cloneable request side of a controller.
#[derive(Clone)]
pub struct StreamHandle {
    name: Arc<str>,
    control: Arc<Mutex<StreamControl>>,
    notify: Arc<Notify>,
}

impl StreamHandle {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            control: Arc::new(Mutex::new(StreamControl::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    fn control(&self) -> MutexGuard<'_, StreamControl> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The notifier to register with anything that changes demand.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Wakes the controller to re-evaluate demand.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Requests a stop/restart cycle with `reset = true`.
    pub fn request_reset(&self) {
        self.control().reset_requested = true;
        self.wake();
    }

    /// Merges `params` into the pending change set and wakes the controller.
    pub fn request_params(&self, params: StreamParams) {
        if params.is_empty() {
            return;
        }
        self.control()
            .pending_params
            .get_or_insert_with(StreamParams::new)
            .extend(params);
        self.wake();
    }

    fn take_requests(&self) -> (bool, Option<StreamParams>) {
        let mut control = self.control();
        (
            std::mem::take(&mut control.reset_requested),
            control.pending_params.take(),
        )
    }

    /// Puts back requests whose cycle failed.  Params requested in the
    /// meantime win over the restored ones.
    fn restore_requests(&self, reset: bool, params: Option<StreamParams>) {
        let mut control = self.control();
        control.reset_requested |= reset;
        if let Some(mut restored) = params {
            if let Some(newer) = control.pending_params.take() {
                restored.extend(newer);
            }
            control.pending_params = Some(restored);
        }
    }
}

/// Runs one stream's state machine.
pub struct StreamController {
    pipeline: Arc<dyn StreamPipeline>,
    demand: Arc<dyn DemandSource>,
    handle: StreamHandle,
    running: bool,
}

impl StreamController {
    pub fn new(
        name: &str,
        pipeline: Arc<dyn StreamPipeline>,
        demand: Arc<dyn DemandSource>,
    ) -> Self {
        Self {
            pipeline,
            demand,
            handle: StreamHandle::new(name),
            running: false,
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Whether the last successful demand edge left the stream running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One evaluation: demand edges first, then any batched reset/params.
    ///
    /// # Errors
    ///
    /// The first [`PipelineError`] encountered.  A failed edge is not
    /// recorded and failed reset/params requests are put back, so the next
    /// evaluation tries again.
    pub async fn evaluate(&mut self) -> Result<(), PipelineError> {
        let demand = self.demand.has_demand();
        if !self.running && demand {
            info!("Stream {}: demand appeared, starting", self.handle.name());
            self.pipeline.ensure_start(false).await?;
        } else if self.running && !demand {
            info!("Stream {}: demand gone, scheduling stop", self.handle.name());
            self.pipeline.ensure_stop(false).await?;
        }
        self.running = demand;

        let (reset, params) = self.handle.take_requests();
        if reset || params.is_some() {
            if let Err(e) = self.restart_with(reset, params.clone()).await {
                self.handle.restore_requests(reset, params);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn restart_with(
        &self,
        reset: bool,
        params: Option<StreamParams>,
    ) -> Result<(), PipelineError> {
        let was_working = self.pipeline.is_working().await;
        self.pipeline.ensure_stop(true).await?;
        if let Some(params) = params {
            info!("Stream {}: applying params {params:?}", self.handle.name());
            self.pipeline.set_params(params).await;
        }
        if was_working {
            self.pipeline.ensure_start(reset).await?;
        }
        Ok(())
    }

    /// Evaluates, then waits for the next wake-up, until the pipeline fails.
    ///
    /// # Errors
    ///
    /// The first pipeline failure, with the stream name attached.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            self.evaluate()
                .await
                .with_context(|| format!("stream {} controller failed", self.handle.name()))?;
            debug!("Stream {}: waiting for the next wake-up", self.handle.name());
            self.handle.notify.notified().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
