//! Initial-state handshake for new realtime sessions.
//!
//! A new client must see the full current state before incremental updates.
//! The handshake is built from two stages:
//!
//! - **stage 1**: ad-hoc [`StateSource`]s with statically known tags (keymap
//!   catalog, OCR languages, ...) that are not registry adapters;
//! - **stage 2**: every registry adapter exposing a state accessor.
//!
//! Both stages are fetched concurrently and merged into one tag → value map.
//! Events are then emitted in stage order (stage 1 tags, then stage 2 tags),
//! skipping tags whose fetch failed, followed by the terminal `loop` event.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::warn;

use super::registry::ComponentRegistry;
use crate::domain::RealtimeEvent;

/// A stage-1 state fetch with a fixed tag.
#[async_trait]
pub trait StateSource: Send + Sync {
    fn event_type(&self) -> &str;

    async fn fetch(&self) -> anyhow::Result<Value>;
}

/// Builds the handshake sequence for new sessions.
pub struct StateAggregator {
    stage_one: Vec<Arc<dyn StateSource>>,
    registry: Arc<ComponentRegistry>,
}

impl StateAggregator {
    pub fn new(stage_one: Vec<Arc<dyn StateSource>>, registry: Arc<ComponentRegistry>) -> Self {
        Self { stage_one, registry }
    }

    async fn fetch_stage_one(&self) -> Vec<(String, Value)> {
        let fetches = self.stage_one.iter().map(|source| async move {
            match source.fetch().await {
                Ok(state) => Some((source.event_type().to_string(), state)),
                Err(e) => {
                    warn!("Can't get {}: {e:#}", source.event_type());
                    None
                }
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Returns the handshake events, ending with `loop`.
    pub async fn handshake_events(&self) -> Vec<RealtimeEvent> {
        let (stage_one, stage_two) =
            tokio::join!(self.fetch_stage_one(), self.registry.collect_states());

        let order: Vec<String> = self
            .stage_one
            .iter()
            .map(|s| s.event_type().to_string())
            .chain(self.registry.state_event_types())
            .collect();

        let mut states: HashMap<String, Value> = HashMap::new();
        for (tag, state) in stage_one.into_iter().chain(stage_two) {
            states.insert(tag, state);
        }

        let mut events = Vec::with_capacity(states.len() + 1);
        for tag in order {
            // remove() also de-duplicates a tag present in both stages
            if let Some(state) = states.remove(&tag) {
                events.push(RealtimeEvent::new(tag, state));
            }
        }
        events.push(RealtimeEvent::loop_marker());
        events
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
