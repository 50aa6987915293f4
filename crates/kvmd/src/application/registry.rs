//! Flat registry of every subsystem adapter.
//!
//! The registry is built once at startup and shared read-only afterwards.
//! It drives the whole-fleet lifecycle steps:
//!
//! - [`ComponentRegistry::prepare_all`] before the listener opens; the first
//!   failure aborts startup.
//! - [`ComponentRegistry::collect_states`] for every new realtime session.
//! - [`ComponentRegistry::cleanup_all`] at shutdown.
//!
//! State fetches and cleanups are isolated per adapter: one failing adapter is
//! logged and skipped, the rest proceed.  A panicking cleanup counts as a
//! failure.

use std::panic::AssertUnwindSafe;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::adapter::SubsystemAdapter;
use super::supervisor::panic_message;

/// Errors raised by whole-registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("preparing {name} failed: {source:#}")]
    Prepare {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("event type {0:?} is registered by more than one adapter")]
    DuplicateEventType(String),
}

/// All registered adapters, in registration order.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    adapters: Vec<SubsystemAdapter>,
}

impl ComponentRegistry {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateEventType`] if two adapters publish under the
    /// same non-empty tag.
    pub fn new(adapters: Vec<SubsystemAdapter>) -> Result<Self, RegistryError> {
        let mut seen = std::collections::HashSet::new();
        for adapter in &adapters {
            let tag = adapter.event_type();
            if !tag.is_empty() && !seen.insert(tag) {
                return Err(RegistryError::DuplicateEventType(tag.to_string()));
            }
        }
        Ok(Self { adapters })
    }

    pub fn adapters(&self) -> &[SubsystemAdapter] {
        &self.adapters
    }

    /// Event types of every adapter with a state accessor, in order.
    pub fn state_event_types(&self) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|a| a.has_state())
            .map(|a| a.event_type().to_string())
            .collect()
    }

    /// Runs every prepare hook in registration order.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Prepare`] naming the first adapter that failed.
    pub fn prepare_all(&self) -> Result<(), RegistryError> {
        for adapter in &self.adapters {
            debug!("Preparing {} ...", adapter.name());
            adapter.prepare().map_err(|source| RegistryError::Prepare {
                name: adapter.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Fetches the current state of every adapter that has one, concurrently.
    ///
    /// Failed fetches are logged and left out; the result keeps registration
    /// order.
    pub async fn collect_states(&self) -> Vec<(String, Value)> {
        let fetches = self.adapters.iter().filter_map(|adapter| {
            let future = adapter.get_state()?;
            let name = adapter.name().to_string();
            let tag = adapter.event_type().to_string();
            Some(async move {
                match future.await {
                    Ok(state) => Some((tag, state)),
                    Err(e) => {
                        warn!("Can't get state of {name}: {e:#}");
                        None
                    }
                }
            })
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Runs every cleanup hook, in order.  Failures are logged and never stop
    /// the remaining cleanups.
    ///
    /// Returns the number of cleanups that failed.
    pub async fn cleanup_all(&self) -> usize {
        let mut failures = 0;
        for adapter in &self.adapters {
            let name = adapter.name();
            let outcome = AssertUnwindSafe(async {
                match adapter.cleanup() {
                    Some(cleanup) => {
                        info!("Cleaning up {name} ...");
                        cleanup.await
                    }
                    None => Ok(()),
                }
            })
            .catch_unwind()
            .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Cleanup error on {name}: {e:#}");
                    failures += 1;
                }
                Err(panic) => {
                    error!("Cleanup of {name} panicked: {}", panic_message(panic.as_ref()));
                    failures += 1;
                }
            }
        }
        failures
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_cleanup(name: &str, counter: &Arc<AtomicUsize>, fail: bool) -> SubsystemAdapter {
        let counter = Arc::clone(counter);
        SubsystemAdapter::builder(name)
            .on_cleanup(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        anyhow::bail!("device vanished");
                    }
                    Ok(())
                }
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_stop_others() {
        // Arrange: middle adapter fails
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = ComponentRegistry::new(vec![
            counting_cleanup("A", &counter, false),
            counting_cleanup("B", &counter, true),
            counting_cleanup("C", &counter, false),
        ])
        .unwrap();

        // Act
        let failures = registry.cleanup_all().await;

        // Assert
        assert_eq!(counter.load(Ordering::SeqCst), 3, "all cleanups must run");
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_panicking_cleanup_does_not_stop_others() {
        // Arrange: middle adapter panics inside its cleanup
        let counter = Arc::new(AtomicUsize::new(0));
        async fn crashing_cleanup() -> anyhow::Result<()> {
            panic!("driver bug")
        }
        let panicking = SubsystemAdapter::builder("B")
            .on_cleanup(crashing_cleanup)
            .build()
            .unwrap();
        let registry = ComponentRegistry::new(vec![
            counting_cleanup("A", &counter, false),
            panicking,
            counting_cleanup("C", &counter, false),
        ])
        .unwrap();

        // Act
        let failures = registry.cleanup_all().await;

        // Assert
        assert_eq!(counter.load(Ordering::SeqCst), 2, "A and C must still run");
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }

    #[tokio::test]
    async fn test_collect_states_skips_failures_and_keeps_order() {
        let registry = ComponentRegistry::new(vec![
            SubsystemAdapter::builder("HID")
                .event_type("hid_state")
                .state(|| async { Ok(json!({"online": true})) })
                .build()
                .unwrap(),
            SubsystemAdapter::builder("ATX")
                .event_type("atx_state")
                .state(|| async { Err(anyhow::anyhow!("gpio busy")) })
                .build()
                .unwrap(),
            SubsystemAdapter::builder("Auth manager").build().unwrap(),
            SubsystemAdapter::builder("MSD")
                .event_type("msd_state")
                .state(|| async { Ok(json!({"enabled": false})) })
                .build()
                .unwrap(),
        ])
        .unwrap();

        let states = registry.collect_states().await;

        let tags: Vec<&str> = states.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, vec!["hid_state", "msd_state"]);
    }

    #[test]
    fn test_prepare_all_stops_at_first_failure() {
        let registry = ComponentRegistry::new(vec![
            SubsystemAdapter::builder("ok").on_prepare(|| Ok(())).build().unwrap(),
            SubsystemAdapter::builder("broken")
                .on_prepare(|| Err(anyhow::anyhow!("missing device")))
                .build()
                .unwrap(),
        ])
        .unwrap();

        match registry.prepare_all() {
            Err(RegistryError::Prepare { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("expected prepare error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_event_types_rejected() {
        let make = || {
            SubsystemAdapter::builder("streamer")
                .event_type("streamer_state")
                .state(|| async { Ok(json!({})) })
                .build()
                .unwrap()
        };
        let result = ComponentRegistry::new(vec![make(), make()]);
        assert!(matches!(result, Err(RegistryError::DuplicateEventType(_))));
    }

    #[test]
    fn test_state_event_types_lists_state_adapters_only() {
        let registry = ComponentRegistry::new(vec![
            SubsystemAdapter::builder("Auth manager").build().unwrap(),
            SubsystemAdapter::builder("HID")
                .event_type("hid_state")
                .state(|| async { Ok(json!({})) })
                .build()
                .unwrap(),
        ])
        .unwrap();
        assert_eq!(registry.state_event_types(), vec!["hid_state".to_string()]);
    }
}
