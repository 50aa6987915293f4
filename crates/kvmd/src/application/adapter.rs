//! Uniform lifecycle wrapper around one subsystem.
//!
//! Every subsystem the daemon fronts (auth, info, HID, power, mass storage,
//! each video stream) is registered as a [`SubsystemAdapter`].  An adapter is
//! a name, an event type and up to five optional hooks:
//!
//! | Hook         | When it runs                                          |
//! |--------------|-------------------------------------------------------|
//! | `prepare`    | once, synchronously, before the listener opens        |
//! | `background` | spawned as a supervised task for the process lifetime |
//! | `state`      | once per new realtime session, to seed its state      |
//! | `poll`       | a never-ending stream of snapshots to broadcast       |
//! | `cleanup`    | once at shutdown                                      |
//!
//! Adapters are assembled with [`AdapterBuilder`] and are immutable once
//! built.  [`AdapterBuilder::build`] rejects an adapter that exposes state
//! without an event type, because its snapshots could not be routed.
//!
//! # Example
//!
//! ```rust
//! use kvmd::application::SubsystemAdapter;
//! use serde_json::json;
//!
//! let adapter = SubsystemAdapter::builder("HID")
//!     .event_type("hid_state")
//!     .state(|| async { Ok(json!({"online": true})) })
//!     .build()
//!     .unwrap();
//! assert!(adapter.has_state());
//! ```

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;

type PrepareHook = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
type TaskHook = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type StateHook = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
type PollHook = Box<dyn Fn() -> BoxStream<'static, Value> + Send + Sync>;

/// Errors raised while assembling an adapter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("adapter {0:?} exposes state but has no event type")]
    MissingEventType(String),
}

/// One registered subsystem and its lifecycle hooks.
pub struct SubsystemAdapter {
    name: String,
    event_type: String,
    prepare: Option<PrepareHook>,
    background: Option<TaskHook>,
    state: Option<StateHook>,
    poll: Option<PollHook>,
    cleanup: Option<TaskHook>,
}

impl std::fmt::Debug for SubsystemAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemAdapter")
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("prepare", &self.prepare.is_some())
            .field("background", &self.background.is_some())
            .field("state", &self.state.is_some())
            .field("poll", &self.poll.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

impl SubsystemAdapter {
    pub fn builder(name: impl Into<String>) -> AdapterBuilder {
        AdapterBuilder {
            adapter: SubsystemAdapter {
                name: name.into(),
                event_type: String::new(),
                prepare: None,
                background: None,
                state: None,
                poll: None,
                cleanup: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag attached to this adapter's state snapshots.  Empty when the
    /// adapter publishes no state.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// Runs the prepare hook, if any.
    ///
    /// # Errors
    ///
    /// Whatever the hook returns; the caller aborts startup on error.
    pub fn prepare(&self) -> anyhow::Result<()> {
        match &self.prepare {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    pub fn background_task(&self) -> Option<BoxFuture<'static, anyhow::Result<()>>> {
        self.background.as_ref().map(|hook| hook())
    }

    pub fn get_state(&self) -> Option<BoxFuture<'static, anyhow::Result<Value>>> {
        self.state.as_ref().map(|hook| hook())
    }

    pub fn poll_state(&self) -> Option<BoxStream<'static, Value>> {
        self.poll.as_ref().map(|hook| hook())
    }

    pub fn cleanup(&self) -> Option<BoxFuture<'static, anyhow::Result<()>>> {
        self.cleanup.as_ref().map(|hook| hook())
    }
}

/// Builder for [`SubsystemAdapter`].
pub struct AdapterBuilder {
    adapter: SubsystemAdapter,
}

impl AdapterBuilder {
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.adapter.event_type = event_type.into();
        self
    }

    pub fn on_prepare<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.adapter.prepare = Some(Box::new(hook));
        self
    }

    pub fn background<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.adapter.background = Some(Box::new(move || hook().boxed()));
        self
    }

    pub fn state<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.adapter.state = Some(Box::new(move || hook().boxed()));
        self
    }

    pub fn poll<F, S>(mut self, hook: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Value> + Send + 'static,
    {
        self.adapter.poll = Some(Box::new(move || hook().boxed()));
        self
    }

    pub fn on_cleanup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.adapter.cleanup = Some(Box::new(move || hook().boxed()));
        self
    }

    /// Finishes the adapter.
    ///
    /// # Errors
    ///
    /// [`AdapterError::MissingEventType`] if a state accessor or poll stream
    /// was given without an event type.
    pub fn build(self) -> Result<SubsystemAdapter, AdapterError> {
        let adapter = self.adapter;
        if (adapter.state.is_some() || adapter.poll.is_some()) && adapter.event_type.is_empty() {
            return Err(AdapterError::MissingEventType(adapter.name));
        }
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    #[test]
    fn test_state_without_event_type_is_rejected() {
        let result = SubsystemAdapter::builder("HID")
            .state(|| async { Ok(json!({})) })
            .build();
        assert_eq!(result.unwrap_err(), AdapterError::MissingEventType("HID".to_string()));
    }

    #[test]
    fn test_poll_without_event_type_is_rejected() {
        let result = SubsystemAdapter::builder("ATX")
            .poll(stream::empty::<Value>)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_cleanup_only_adapter_needs_no_event_type() {
        let adapter = SubsystemAdapter::builder("Auth manager")
            .on_cleanup(|| async { Ok(()) })
            .build()
            .unwrap();
        assert_eq!(adapter.event_type(), "");
        assert!(!adapter.has_state());
        assert!(adapter.cleanup().is_some());
        assert!(adapter.background_task().is_none());
    }

    #[test]
    fn test_prepare_hook_error_is_returned() {
        let adapter = SubsystemAdapter::builder("MSD")
            .on_prepare(|| Err(anyhow::anyhow!("no storage")))
            .build()
            .unwrap();
        assert!(adapter.prepare().is_err());
    }

    #[test]
    fn test_missing_prepare_hook_succeeds() {
        let adapter = SubsystemAdapter::builder("GPIO").build().unwrap();
        assert!(adapter.prepare().is_ok());
    }

    #[tokio::test]
    async fn test_state_hook_can_be_called_repeatedly() {
        let adapter = SubsystemAdapter::builder("HID")
            .event_type("hid_state")
            .state(|| async { Ok(json!({"online": true})) })
            .build()
            .unwrap();

        for _ in 0..2 {
            let state = adapter.get_state().unwrap().await.unwrap();
            assert_eq!(state, json!({"online": true}));
        }
    }

    #[tokio::test]
    async fn test_poll_stream_yields_snapshots() {
        let adapter = SubsystemAdapter::builder("ATX")
            .event_type("atx_state")
            .poll(|| stream::iter(vec![json!(1), json!(2)]))
            .build()
            .unwrap();

        let items: Vec<Value> = adapter.poll_state().unwrap().collect().await;
        assert_eq!(items, vec![json!(1), json!(2)]);
    }
}
